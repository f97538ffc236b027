//! 端到端流水线测试: 目录帧源 → 采集 → 检测 → 跟踪 → 视频

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use workwatch::capture::{CaptureSupervisor, SupervisorSettings, WorkerSettings};
use workwatch::config::{CameraConfig, CaptureConfig, Config};
use workwatch::detection::{BBox, Detection, ScriptedDetector};
use workwatch::ledger::{MemoryStore, NewFrame, ParamsFile, SqliteStore, Stage, Store};
use workwatch::pipeline::Predictor;

fn config(dir: &Path, idle_frames: usize) -> Config {
    let mut config = Config {
        data_dir: dir.to_path_buf(),
        ..Config::default()
    };
    config.pipeline.poll_interval_ms = 5;
    config.tracking.idle_frames = idle_frames;
    config.tracking.max_timestamp_difference_ms = 1_000;
    config
}

fn person_at(x: f32) -> Vec<Detection> {
    vec![Detection::new(BBox::new(x, 20.0, x + 20.0, 60.0), 0, 0.9)]
}

/// 直接写入帧 (不经过采集)
fn insert_frames(store: &MemoryStore, dir: &Path, count: usize, step_ms: i64) {
    for i in 0..count {
        let image_path = dir.join(format!("{i:03}.png"));
        RgbImage::new(80, 80).save(&image_path).unwrap();
        store
            .create_frame(NewFrame {
                camera: "door".into(),
                timestamp: i as i64 * step_ms,
                timestamp_label: format!("{i:03}"),
                image_path,
            })
            .unwrap();
    }
}

fn drain(predictor: &mut Predictor) -> usize {
    let mut iterations = 0;
    while predictor.run_iteration().unwrap().did_work() {
        iterations += 1;
        assert!(predictor.cursor().action() <= predictor.cursor().person());
        assert!(iterations < 1_000, "pipeline did not settle");
    }
    iterations
}

#[test]
fn idle_person_gets_exactly_one_video() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    insert_frames(&store, dir.path(), 6, 100);

    // 前5帧同一位置, 第6帧无人 → 轨迹结束
    let mut detector = ScriptedDetector::new();
    for i in 0..5 {
        detector = detector.with(format!("{i:03}.png"), person_at(10.0));
    }
    let params = Arc::new(ParamsFile::load(dir.path().join("params.json")));
    let mut predictor = Predictor::new(&config(dir.path(), 3), store.clone(), params, Box::new(detector)).unwrap();

    drain(&mut predictor);

    let person = store.person(1).unwrap().unwrap();
    assert!(person.idle);
    assert!(person.completed);
    let video = person.video_path.expect("video recorded");
    assert!(video.exists());
    assert_eq!(store.objects_for_person(1).unwrap().len(), 5);
    assert!(store.person(2).unwrap().is_none());

    // 再次运行不会生成第二个视频
    drain(&mut predictor);
    let videos = std::fs::read_dir(dir.path().join("videos")).unwrap().count();
    assert_eq!(videos, 1);
}

#[test]
fn moving_person_splits_into_new_track() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    insert_frames(&store, dir.path(), 3, 100);

    let detector = ScriptedDetector::new()
        .with("000.png", person_at(10.0))
        .with("001.png", person_at(11.0))
        .with("002.png", person_at(50.0));
    let params = Arc::new(ParamsFile::load(dir.path().join("params.json")));
    let mut predictor = Predictor::new(&config(dir.path(), 30), store.clone(), params, Box::new(detector)).unwrap();

    drain(&mut predictor);

    assert_eq!(store.objects_for_person(1).unwrap().len(), 2);
    assert!(store.person(1).unwrap().unwrap().completed);
    assert_eq!(store.objects_for_person(2).unwrap().len(), 1);
    assert!(!store.person(2).unwrap().unwrap().completed);
    // 非空闲人员不生成视频
    assert!(store.pending_videos().unwrap().is_empty());
}

#[test]
fn restart_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    insert_frames(&store, dir.path(), 4, 100);
    let params_path = dir.path().join("params.json");

    {
        let params = Arc::new(ParamsFile::load(&params_path));
        let mut predictor =
            Predictor::new(&config(dir.path(), 30), store.clone(), params, Box::new(ScriptedDetector::new())).unwrap();
        predictor.run_iteration().unwrap();
        predictor.run_iteration().unwrap();
    }

    let params = Arc::new(ParamsFile::load(&params_path));
    assert_eq!(params.get().person_cursor, Some(3));
    let mut predictor =
        Predictor::new(&config(dir.path(), 30), store.clone(), params, Box::new(ScriptedDetector::new())).unwrap();
    assert_eq!(predictor.cursor().person(), 3);
    drain(&mut predictor);
    assert!(store.next_unprocessed_frame(Stage::Action).unwrap().is_none());
}

#[test]
fn captured_frames_flow_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    for i in 0..10 {
        RgbImage::new(40, 40).save(source.join(format!("{i:02}.png"))).unwrap();
    }

    let data = dir.path().join("data");
    let cfg = config(&data, 30);
    let paths = cfg.paths();
    paths.create_folders().unwrap();

    let store = Arc::new(MemoryStore::new());
    let capture = CaptureConfig {
        target_fps: 50.0,
        datetime_format: "%H-%M-%S-%9f".into(),
        ..CaptureConfig::default()
    };
    let mut supervisor = CaptureSupervisor::new(
        vec![CameraConfig {
            name: "door".into(),
            source: source.display().to_string(),
            source_fps: 100.0,
        }],
        SupervisorSettings {
            rotation_interval: Duration::from_secs(60),
            termination_grace: Duration::from_secs(2),
        },
        WorkerSettings::new(&capture, paths.images.clone(), 0),
        store.clone(),
    );

    supervisor.start();
    // 100fps → 50fps: 10 帧保留 5 帧
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.latest_frame_id().unwrap() != Some(5) {
        assert!(Instant::now() < deadline, "capture did not finish");
        std::thread::sleep(Duration::from_millis(10));
    }
    supervisor.stop();

    let frame = store.frame(1).unwrap().unwrap();
    assert!(frame.image_path.starts_with(paths.camera_images("door")));

    let params = Arc::new(ParamsFile::load(&paths.params));
    let mut predictor = Predictor::new(&cfg, store.clone(), params, Box::new(ScriptedDetector::new())).unwrap();
    drain(&mut predictor);
    assert!(store.next_unprocessed_frame(Stage::Person).unwrap().is_none());
    assert!(store.next_unprocessed_frame(Stage::Action).unwrap().is_none());
}

#[test]
fn capture_and_predict_processes_share_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    for i in 0..4 {
        RgbImage::new(40, 40).save(source.join(format!("{i:02}.png"))).unwrap();
    }

    let cfg = config(&dir.path().join("data"), 30);
    let paths = cfg.paths();
    paths.create_folders().unwrap();

    // 两个独立连接, 相当于 `workwatch capture` 与 `workwatch predict`
    let capture_store = Arc::new(SqliteStore::open(&paths.ledger).unwrap());
    let predict_store = Arc::new(SqliteStore::open(&paths.ledger).unwrap());

    let params = Arc::new(ParamsFile::load(&paths.params));
    let mut predictor = Predictor::new(&cfg, predict_store.clone(), params, Box::new(ScriptedDetector::new())).unwrap();
    assert!(!predictor.run_iteration().unwrap().did_work());

    let capture = CaptureConfig {
        target_fps: 100.0,
        datetime_format: "%H-%M-%S-%9f".into(),
        ..CaptureConfig::default()
    };
    let mut supervisor = CaptureSupervisor::new(
        vec![CameraConfig {
            name: "door".into(),
            source: source.display().to_string(),
            source_fps: 100.0,
        }],
        SupervisorSettings {
            rotation_interval: Duration::from_secs(60),
            termination_grace: Duration::from_secs(2),
        },
        WorkerSettings::new(&capture, paths.images.clone(), 0),
        capture_store.clone(),
    );
    supervisor.start();
    let deadline = Instant::now() + Duration::from_secs(5);
    while predict_store.latest_frame_id().unwrap() != Some(4) {
        assert!(Instant::now() < deadline, "predictor never saw captured frames");
        std::thread::sleep(Duration::from_millis(10));
    }
    supervisor.stop();

    drain(&mut predictor);
    assert_eq!(predictor.cursor().person(), 5);
    assert!(capture_store.next_unprocessed_frame(Stage::Action).unwrap().is_none());
}
