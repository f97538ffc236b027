/// 采集工作线程 (Capture worker)
///
/// 单个摄像头的采集循环: 读帧 → 抽帧 → 保存图片 → 写入账本 → 检查信号
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::signal::SignalTable;
use crate::config::{CameraConfig, CaptureConfig};
use crate::error::CaptureError;
use crate::input::{Decimator, FrameSource};
use crate::ledger::{FrameId, NewFrame, Store};

/// 帧源工厂 (可替换, 便于测试)
pub type SourceFactory =
    Arc<dyn Fn(&CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> + Send + Sync>;

/// 工作线程退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// 读到终止信号 (或已被新一代取代)
    Terminated,
    /// 源流自然结束
    StreamEnded,
    /// 帧源打开失败
    OpenFailed,
}

/// 所有工作线程共享的采集参数
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub target_fps: f64,
    pub datetime_format: String,
    pub image_extension: String,
    pub images_dir: PathBuf,
    pub read_retry: Duration,
    /// 帧时间戳参考时间 (Unix 毫秒)
    pub timestamp_ref_ms: i64,
}

impl WorkerSettings {
    pub fn new(capture: &CaptureConfig, images_dir: PathBuf, timestamp_ref_ms: i64) -> Self {
        Self {
            target_fps: capture.target_fps,
            datetime_format: capture.datetime_format.clone(),
            image_extension: capture.image_extension.clone(),
            images_dir,
            read_retry: Duration::from_millis(capture.read_retry_ms),
            timestamp_ref_ms,
        }
    }
}

/// 单摄像头采集工作线程
pub struct CaptureWorker {
    pub camera: CameraConfig,
    pub generation: u64,
    pub settings: Arc<WorkerSettings>,
    pub store: Arc<dyn Store>,
    pub signals: Arc<SignalTable>,
    pub factory: SourceFactory,
    /// 本摄像头已消费的帧数, 跨代共享; 轮换后从这里继续读
    pub position: Arc<AtomicU64>,
}

impl CaptureWorker {
    /// 运行采集循环直到终止或流结束
    pub fn run(self) -> WorkerExit {
        let camera = self.camera.name.as_str();
        let mut source = match (self.factory)(&self.camera) {
            Ok(source) => source,
            Err(e) => {
                error!(camera, error = %e, "❌ 无法打开帧源");
                return WorkerExit::OpenFailed;
            }
        };

        let mut decimator = Decimator::new(source.source_fps(), self.settings.target_fps);
        let resume_at = self.position.load(Ordering::SeqCst);
        if resume_at > 0 && source.seek(resume_at) {
            decimator = decimator.starting_at(resume_at);
        }
        info!(
            camera,
            generation = self.generation,
            step = decimator.step(),
            position = resume_at,
            "📷 采集线程启动"
        );

        loop {
            let read = source.read();
            if let Some(position) = source.position() {
                self.position.store(position, Ordering::SeqCst);
            }
            match read {
                Ok(Some(image)) => {
                    if decimator.accept() {
                        match self.persist(&image) {
                            Ok(frame_id) => debug!(camera, frame_id, "frame stored"),
                            Err(e) => warn!(camera, error = %e, "frame dropped"),
                        }
                    }
                }
                Ok(None) => {
                    info!(camera, generation = self.generation, "stream ended");
                    return WorkerExit::StreamEnded;
                }
                Err(e) => {
                    warn!(camera, error = %e, "frame read failed");
                    if !self.keep_running() {
                        break;
                    }
                    std::thread::sleep(self.settings.read_retry);
                    continue;
                }
            }

            if !self.keep_running() {
                break;
            }
        }

        info!(camera, generation = self.generation, "🛑 采集线程退出");
        WorkerExit::Terminated
    }

    fn keep_running(&self) -> bool {
        self.signals.is_current(&self.camera.name, self.generation)
    }

    /// 保存图片并写入账本
    fn persist(&self, image: &RgbImage) -> crate::Result<FrameId> {
        let now = chrono::Local::now();
        let label = now.format(&self.settings.datetime_format).to_string();

        let dir = self.settings.images_dir.join(&self.camera.name);
        fs::create_dir_all(&dir).map_err(|source| CaptureError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{label}{}", self.settings.image_extension));
        image.save(&path).map_err(CaptureError::from)?;

        let frame_id = self.store.create_frame(NewFrame {
            camera: self.camera.name.clone(),
            timestamp: now.timestamp_millis() - self.settings.timestamp_ref_ms,
            timestamp_label: label,
            image_path: path,
        })?;
        Ok(frame_id)
    }
}
