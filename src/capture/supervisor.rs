/// 采集监督器 (Capture supervisor)
///
/// - 每个摄像头一个工作线程
/// - 轮换线程按固定间隔依次重启仍在运行的工作线程, 限制单个线程的生命周期
/// - 代数ID (generation) 保证被替换的旧线程即使未及时退出也不会再写入
/// - 读取位置跨代保留, 有限源 (图片目录) 轮换后接着读, 不会重复入账
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use super::signal::SignalTable;
use super::worker::{CaptureWorker, SourceFactory, WorkerExit, WorkerSettings};
use crate::config::CameraConfig;
use crate::input::open_source;
use crate::ledger::Store;

/// 轮换线程检查全局信号的粒度
const SIGNAL_POLL: Duration = Duration::from_millis(50);

/// 监督参数
#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    pub rotation_interval: Duration,
    pub termination_grace: Duration,
}

/// 运行中的工作线程槽位
struct WorkerSlot {
    camera: CameraConfig,
    generation: u64,
    handle: Option<JoinHandle<WorkerExit>>,
    /// 线程结束时发送端被丢弃
    done: Receiver<()>,
    position: Arc<AtomicU64>,
}

impl WorkerSlot {
    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// 监督器内部共享状态 (轮换线程持有一份)
struct Shared {
    cameras: Vec<CameraConfig>,
    settings: SupervisorSettings,
    worker_settings: Arc<WorkerSettings>,
    store: Arc<dyn Store>,
    signals: Arc<SignalTable>,
    factory: SourceFactory,
    next_generation: AtomicU64,
}

/// 采集监督器
pub struct CaptureSupervisor {
    shared: Arc<Shared>,
    rotation: Option<JoinHandle<()>>,
}

impl CaptureSupervisor {
    pub fn new(
        cameras: Vec<CameraConfig>,
        settings: SupervisorSettings,
        worker_settings: WorkerSettings,
        store: Arc<dyn Store>,
    ) -> Self {
        let factory: SourceFactory = Arc::new(|camera: &CameraConfig| open_source(camera));
        Self::with_factory(cameras, settings, worker_settings, store, factory)
    }

    /// 指定帧源工厂
    pub fn with_factory(
        cameras: Vec<CameraConfig>,
        settings: SupervisorSettings,
        worker_settings: WorkerSettings,
        store: Arc<dyn Store>,
        factory: SourceFactory,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cameras,
                settings,
                worker_settings: Arc::new(worker_settings),
                store,
                signals: Arc::new(SignalTable::new()),
                factory,
                next_generation: AtomicU64::new(1),
            }),
            rotation: None,
        }
    }

    pub fn signals(&self) -> &Arc<SignalTable> {
        &self.shared.signals
    }

    pub fn is_running(&self) -> bool {
        self.rotation.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 启动所有摄像头的工作线程与轮换线程
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("capture already running");
            return;
        }
        // 回收已结束的旧轮换线程
        if let Some(old) = self.rotation.take() {
            if old.join().is_err() {
                error!("previous rotation thread panicked");
            }
        }

        self.shared.signals.start_global();
        let shared = Arc::clone(&self.shared);
        self.rotation = Some(std::thread::spawn(move || shared.rotation_loop()));
        info!(cameras = self.shared.cameras.len(), "🚀 采集已启动");
    }

    /// 终止全部工作线程, 阻塞直到轮换线程退出
    pub fn stop(&mut self) {
        self.shared.signals.terminate_global();
        if let Some(handle) = self.rotation.take() {
            if handle.join().is_err() {
                error!("rotation thread panicked");
            }
        }
        debug!(signals = ?self.shared.signals.snapshot(), "signal table after stop");
        info!("⏹ 采集已停止");
    }

    /// 单独终止一个摄像头 (轮换不会再重启它)
    pub fn stop_camera(&self, camera: &str) {
        info!(camera, "stopping camera");
        self.shared.signals.terminate(camera);
    }
}

impl Drop for CaptureSupervisor {
    fn drop(&mut self) {
        if self.rotation.is_some() {
            self.stop();
        }
    }
}

impl Shared {
    fn rotation_loop(&self) {
        let mut slots: Vec<WorkerSlot> = self
            .cameras
            .iter()
            .map(|camera| self.spawn_worker(camera.clone(), Arc::new(AtomicU64::new(0))))
            .collect();

        let mut turn = 0usize;
        while self.sleep_unless_terminated(self.settings.rotation_interval) {
            if slots.is_empty() {
                continue;
            }
            let index = turn % slots.len();
            turn += 1;

            // 已自然结束或被单独终止的摄像头不再重启
            let slot = &slots[index];
            if !slot.is_alive() || !self.signals.is_current(&slot.camera.name, slot.generation) {
                continue;
            }
            let camera = slots[index].camera.clone();
            let position = Arc::clone(&slots[index].position);
            info!(camera = %camera.name, "🔄 轮换采集线程");
            self.join_with_grace(&mut slots[index]);
            slots[index] = self.spawn_worker(camera, position);
        }

        for slot in &mut slots {
            self.join_with_grace(slot);
        }
    }

    fn spawn_worker(&self, camera: CameraConfig, position: Arc<AtomicU64>) -> WorkerSlot {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.signals.set_running(&camera.name, generation);

        let (done_tx, done) = bounded::<()>(0);
        let worker = CaptureWorker {
            camera: camera.clone(),
            generation,
            settings: Arc::clone(&self.worker_settings),
            store: Arc::clone(&self.store),
            signals: Arc::clone(&self.signals),
            factory: Arc::clone(&self.factory),
            position: Arc::clone(&position),
        };
        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", camera.name))
            .spawn(move || {
                let _done = done_tx;
                worker.run()
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(camera = %camera.name, error = %e, "❌ 无法创建采集线程");
                None
            }
        };
        WorkerSlot {
            camera,
            generation,
            handle,
            done,
            position,
        }
    }

    /// 发出终止信号并在宽限期内等待退出, 超时则放弃该线程
    fn join_with_grace(&self, slot: &mut WorkerSlot) {
        let camera = slot.camera.name.as_str();
        // 只终止本代, 避免覆盖已被替换的键
        if self.signals.is_current(camera, slot.generation) {
            self.signals.terminate(camera);
        }
        let Some(handle) = slot.handle.take() else {
            return;
        };

        match slot.done.recv_timeout(self.settings.termination_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match handle.join() {
                Ok(exit) => info!(camera, generation = slot.generation, ?exit, "worker joined"),
                Err(_) => error!(camera, generation = slot.generation, "worker panicked"),
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    camera,
                    generation = slot.generation,
                    grace_ms = self.settings.termination_grace.as_millis() as u64,
                    "⚠️ 采集线程未在宽限期内退出, 已放弃"
                );
            }
        }
    }

    /// 睡眠指定时长, 期间收到全局终止返回 false
    fn sleep_unless_terminated(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.signals.global_terminated() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SIGNAL_POLL.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::error::CaptureError;
    use crate::input::FrameSource;
    use crate::ledger::MemoryStore;
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;

    /// 无限帧源, 每次读取前休眠
    struct Endless {
        delay: Duration,
    }

    impl FrameSource for Endless {
        fn source_fps(&self) -> f64 {
            100.0
        }

        fn read(&mut self) -> Result<Option<RgbImage>, CaptureError> {
            std::thread::sleep(self.delay);
            Ok(Some(RgbImage::new(2, 2)))
        }
    }

    fn cameras(names: &[&str]) -> Vec<CameraConfig> {
        names
            .iter()
            .map(|name| CameraConfig {
                name: name.to_string(),
                source: "memory".into(),
                source_fps: 100.0,
            })
            .collect()
    }

    fn supervisor(
        dir: &std::path::Path,
        names: &[&str],
        rotation_ms: u64,
        grace_ms: u64,
        read_delay: Duration,
        opened: Arc<AtomicUsize>,
    ) -> (CaptureSupervisor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let capture = CaptureConfig {
            target_fps: 100.0,
            datetime_format: "%H-%M-%S-%9f".into(),
            ..CaptureConfig::default()
        };
        let factory: SourceFactory = Arc::new(move |_: &CameraConfig| {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Endless { delay: read_delay }) as Box<dyn FrameSource>)
        });
        let sup = CaptureSupervisor::with_factory(
            cameras(names),
            SupervisorSettings {
                rotation_interval: Duration::from_millis(rotation_ms),
                termination_grace: Duration::from_millis(grace_ms),
            },
            WorkerSettings::new(&capture, dir.to_path_buf(), 0),
            store.clone(),
            factory,
        );
        (sup, store)
    }

    #[test]
    fn test_rotation_restarts_workers_and_keeps_capturing() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let (mut sup, store) = supervisor(
            dir.path(),
            &["a", "b"],
            100,
            2_000,
            Duration::from_millis(5),
            opened.clone(),
        );

        sup.start();
        std::thread::sleep(Duration::from_millis(600));
        sup.stop();

        // 初始2个 + 至少2次轮换
        assert!(opened.load(Ordering::SeqCst) >= 4);
        let frames = store.latest_frame_id().unwrap().unwrap_or(0);
        assert!(frames > 0);
        assert!(dir.path().join("a").exists());
        assert!(dir.path().join("b").exists());
        assert!(!sup.is_running());
    }

    #[test]
    fn test_stopped_camera_is_not_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let (mut sup, _store) = supervisor(
            dir.path(),
            &["solo"],
            50,
            2_000,
            Duration::from_millis(2),
            opened.clone(),
        );

        sup.start();
        std::thread::sleep(Duration::from_millis(30));
        sup.stop_camera("solo");
        std::thread::sleep(Duration::from_millis(300));
        let after_stop = opened.load(Ordering::SeqCst);
        sup.stop();

        assert_eq!(after_stop, 1);
    }

    #[test]
    fn test_rotation_continues_finite_directory() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        std::fs::create_dir_all(&frames).unwrap();
        for i in 0..10 {
            RgbImage::new(4, 4).save(frames.join(format!("{i:02}.png"))).unwrap();
        }

        let store = Arc::new(MemoryStore::new());
        let capture = CaptureConfig {
            target_fps: 20.0,
            datetime_format: "%H-%M-%S-%9f".into(),
            ..CaptureConfig::default()
        };
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let factory: SourceFactory = Arc::new(move |camera: &CameraConfig| {
            counter.fetch_add(1, Ordering::SeqCst);
            open_source(camera)
        });
        let mut sup = CaptureSupervisor::with_factory(
            vec![CameraConfig {
                name: "replay".into(),
                source: frames.display().to_string(),
                source_fps: 20.0,
            }],
            SupervisorSettings {
                rotation_interval: Duration::from_millis(100),
                termination_grace: Duration::from_secs(2),
            },
            WorkerSettings::new(&capture, dir.path().join("images"), 0),
            store.clone(),
            factory,
        );

        // 10 张 @ 20fps ≈ 0.5s, 期间轮换多次
        sup.start();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.latest_frame_id().unwrap() < Some(10) {
            assert!(Instant::now() < deadline, "directory was not replayed");
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(400));
        sup.stop();

        assert!(opened.load(Ordering::SeqCst) >= 2);
        assert_eq!(store.latest_frame_id().unwrap(), Some(10));
    }

    #[test]
    fn test_stuck_worker_is_abandoned_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let (mut sup, _store) = supervisor(
            dir.path(),
            &["slow"],
            60_000,
            50,
            Duration::from_secs(2),
            opened,
        );

        sup.start();
        std::thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        sup.stop();
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }
}
