/// 预测器线程句柄
/// 在独立线程运行 Predictor, stop() 设置停止标志并等待线程退出
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::error;

use super::predictor::Predictor;

pub struct PredictorHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Predictor>>,
}

impl PredictorHandle {
    pub fn start(mut predictor: Predictor) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("predictor".into())
            .spawn(move || {
                predictor.run(&flag);
                predictor
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// 停止并取回预测器
    pub fn stop(mut self) -> Option<Predictor> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<Predictor> {
        self.stop.store(true, Ordering::SeqCst);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(predictor) => Some(predictor),
            Err(_) => {
                error!("predictor thread panicked");
                None
            }
        }
    }
}

impl Drop for PredictorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::detection::{BBox, Detection, ScriptedDetector};
    use crate::ledger::{MemoryStore, NewFrame, ParamsFile, Store};
    use std::time::{Duration, Instant};

    #[test]
    fn test_background_predictor_drains_frames_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            let image_path = dir.path().join(format!("{i}.png"));
            image::RgbImage::new(16, 16).save(&image_path).unwrap();
            store
                .create_frame(NewFrame {
                    camera: "door".into(),
                    timestamp: i * 100,
                    timestamp_label: i.to_string(),
                    image_path,
                })
                .unwrap();
        }

        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.pipeline.poll_interval_ms = 5;
        let detector = ScriptedDetector::new()
            .with("0.png", vec![Detection::new(BBox::new(1.0, 1.0, 9.0, 9.0), 0, 0.9)]);
        let params = Arc::new(ParamsFile::load(dir.path().join("params.json")));
        let predictor = Predictor::new(&config, store.clone(), params, Box::new(detector)).unwrap();

        let handle = PredictorHandle::start(predictor).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.next_unprocessed_frame(crate::ledger::Stage::Action).unwrap().is_some() {
            assert!(Instant::now() < deadline, "predictor did not drain frames");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_running());

        let predictor = handle.stop().unwrap();
        assert_eq!(predictor.cursor().person(), 4);
        assert_eq!(predictor.cursor().action(), 4);
    }
}
