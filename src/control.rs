//! 控制面 (Control surface)
//!
//! 启停采集与预测, 以及整体重置。失败只记录日志, 不影响另一部分。

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::capture::{CaptureSupervisor, SourceFactory, SupervisorSettings, WorkerSettings};
use crate::config::{Config, Paths};
use crate::detection::Detector;
use crate::error::Error;
use crate::ledger::{ParamsFile, SqliteStore, Store};
use crate::pipeline::{Predictor, PredictorHandle};

/// 运行时控制器
pub struct Controller {
    config: Config,
    paths: Paths,
    store: Arc<dyn Store>,
    params: Arc<ParamsFile>,
    capture: Option<CaptureSupervisor>,
    predictor: Option<PredictorHandle>,
    factory: Option<SourceFactory>,
}

impl Controller {
    /// 创建数据目录并打开持久账本
    pub fn open(config: Config) -> Result<Self, Error> {
        let paths = config.paths();
        paths.create_folders().map_err(|source| Error::Io {
            path: paths.root.clone(),
            source,
        })?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&paths.ledger)?);
        let params = Arc::new(ParamsFile::load(&paths.params));
        info!(data_dir = %paths.root.display(), "控制器就绪");
        Ok(Self::with_store(config, store, params))
    }

    pub fn with_store(config: Config, store: Arc<dyn Store>, params: Arc<ParamsFile>) -> Self {
        Self {
            paths: config.paths(),
            config,
            store,
            params,
            capture: None,
            predictor: None,
            factory: None,
        }
    }

    /// 替换帧源工厂
    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn capture_running(&self) -> bool {
        self.capture.as_ref().is_some_and(CaptureSupervisor::is_running)
    }

    pub fn predictor_running(&self) -> bool {
        self.predictor.as_ref().is_some_and(PredictorHandle::is_running)
    }

    // ========== 采集 ==========

    pub fn start_capture(&mut self) -> Result<(), Error> {
        if self.capture_running() {
            warn!("capture already running");
            return Ok(());
        }
        let capture = &self.config.capture;
        let worker_settings = WorkerSettings::new(capture, self.paths.images.clone(), self.params.timestamp_ref_ms()?);
        let settings = SupervisorSettings {
            rotation_interval: Duration::from_secs(capture.rotation_interval_secs),
            termination_grace: Duration::from_millis(capture.termination_grace_ms),
        };
        let cameras = self.config.cameras.clone();
        let store = Arc::clone(&self.store);
        let mut supervisor = match &self.factory {
            Some(factory) => {
                CaptureSupervisor::with_factory(cameras, settings, worker_settings, store, Arc::clone(factory))
            }
            None => CaptureSupervisor::new(cameras, settings, worker_settings, store),
        };
        supervisor.start();
        self.capture = Some(supervisor);
        Ok(())
    }

    pub fn stop_capture(&mut self) {
        match self.capture.take() {
            Some(mut supervisor) => supervisor.stop(),
            None => info!("capture not running"),
        }
    }

    /// 单独停止一个摄像头
    pub fn stop_camera(&self, camera: &str) {
        match &self.capture {
            Some(supervisor) => supervisor.stop_camera(camera),
            None => info!(camera, "capture not running"),
        }
    }

    // ========== 预测 ==========

    pub fn start_predictor(&mut self, detector: Box<dyn Detector>) -> Result<(), Error> {
        if self.predictor_running() {
            warn!("predictor already running");
            return Ok(());
        }
        let predictor = Predictor::new(&self.config, Arc::clone(&self.store), Arc::clone(&self.params), detector)?;
        let handle = PredictorHandle::start(predictor).map_err(|source| Error::Io {
            path: self.paths.root.clone(),
            source,
        })?;
        self.predictor = Some(handle);
        Ok(())
    }

    pub fn stop_predictor(&mut self) {
        match self.predictor.take() {
            Some(handle) => {
                handle.stop();
            }
            None => info!("predictor not running"),
        }
    }

    // ========== 重置 ==========

    /// 停止全部工作, 清空账本、参数与生成的图片/视频
    pub fn reset(&mut self) -> Result<(), Error> {
        self.stop_predictor();
        self.stop_capture();

        self.store.reset()?;
        self.params.clear()?;
        for dir in [&self.paths.images, &self.paths.annotated, &self.paths.videos, &self.paths.tmp] {
            clear_dir(dir)?;
        }
        info!("🧹 流水线已重置");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.stop_predictor();
        self.stop_capture();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 删除目录内容并重建空目录
fn clear_dir(dir: &Path) -> Result<(), Error> {
    let io = |source| Error::Io {
        path: dir.to_path_buf(),
        source,
    };
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(io)?;
    }
    fs::create_dir_all(dir).map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::detection::ScriptedDetector;
    use crate::ledger::NewFrame;

    fn config(dir: &Path) -> Config {
        let mut config = Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        };
        config.pipeline.poll_interval_ms = 5;
        config
    }

    #[test]
    fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::open(config(dir.path())).unwrap();
        let paths = config(dir.path()).paths();

        let image = paths.camera_images("door");
        fs::create_dir_all(&image).unwrap();
        fs::write(image.join("x.png"), b"x").unwrap();
        controller
            .store()
            .create_frame(NewFrame {
                camera: "door".into(),
                timestamp: 0,
                timestamp_label: "x".into(),
                image_path: image.join("x.png"),
            })
            .unwrap();

        controller.reset().unwrap();
        assert_eq!(controller.store().latest_frame_id().unwrap(), None);
        assert!(paths.images.exists());
        assert!(!image.exists());
        assert_eq!(ParamsFile::load(&paths.params).get(), Default::default());
    }

    #[test]
    fn test_start_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        fs::create_dir_all(&frames).unwrap();

        let mut cfg = config(&dir.path().join("data"));
        cfg.cameras.push(CameraConfig {
            name: "door".into(),
            source: frames.display().to_string(),
            source_fps: 10.0,
        });
        let mut controller = Controller::open(cfg).unwrap();

        controller.start_capture().unwrap();
        controller.start_capture().unwrap();
        controller.start_predictor(Box::new(ScriptedDetector::new())).unwrap();
        assert!(controller.predictor_running());

        controller.stop_predictor();
        controller.stop_predictor();
        controller.stop_capture();
        assert!(!controller.predictor_running());
        assert!(!controller.capture_running());
    }
}
