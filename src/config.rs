//! 系统配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// 摄像头配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// 逻辑名称 (信号表键 "camera:<name>")
    pub name: String,
    /// RTSP地址或图片目录
    pub source: String,
    /// 源帧率
    pub source_fps: f64,
}

/// 采集参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub target_fps: f64,               // 目标采集帧率
    pub rotation_interval_secs: u64,   // 轮换间隔(秒)
    pub datetime_format: String,       // 时间标签格式 (chrono)
    pub image_extension: String,       // 图片扩展名
    pub read_retry_ms: u64,            // 读帧失败后的等待
    pub termination_grace_ms: u64,     // 等待工作线程退出的时间
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 1.0,
            rotation_interval_secs: 300,
            datetime_format: "%Y-%m-%d_%H-%M-%S-%6f".into(),
            image_extension: ".png".into(),
            read_retry_ms: 200,
            termination_grace_ms: 5_000,
        }
    }
}

/// 检测参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,       // ONNX 模型路径
    pub confidence_threshold: f32, // 检测置信度阈值
    pub iou_threshold: f32,        // NMS IOU阈值
    pub person_class_id: u32,      // 人体类别ID (COCO=0)
    pub input_size: u32,           // 推理输入尺寸
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8m.onnx"),
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            person_class_id: crate::detection::types::PERSON_CLASS_ID,
            input_size: crate::detection::types::INF_SIZE,
        }
    }
}

/// 默认标注字体, 缺失时只画框不写字
pub const DEFAULT_FONT_PATH: &str = "assets/font/msyh.ttc";

/// 跟踪参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub box_tolerance_percent: f64,      // 坐标容差(百分比)
    pub idle_frames: usize,              // 空闲判定帧数
    pub max_timestamp_difference_ms: i64, // 轨迹过期时间差
    pub font_path: Option<PathBuf>,      // 标注字体 (可选)
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            box_tolerance_percent: 10.0,
            idle_frames: 30,
            max_timestamp_difference_ms: 5_000,
            font_path: Some(PathBuf::from(DEFAULT_FONT_PATH)),
        }
    }
}

/// 流水线参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub poll_interval_ms: u64, // 账本轮询间隔
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}

/// 视频输出格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Gif,
    Mp4,
}

/// 视频参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub output_fps: u32,
    pub format: VideoFormat,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_fps: 5,
            format: VideoFormat::Gif,
        }
    }
}

/// 系统配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub cameras: Vec<CameraConfig>,
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub pipeline: PipelineConfig,
    pub video: VideoConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("workwatch"))
            .unwrap_or_else(|| PathBuf::from("data"));
        Self {
            data_dir,
            cameras: Vec::new(),
            capture: CaptureConfig::default(),
            detection: DetectionConfig::default(),
            tracking: TrackingConfig::default(),
            pipeline: PipelineConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl Config {
    /// 从JSON文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), cameras = config.cameras.len(), "config loaded");
        Ok(config)
    }

    /// 加载配置, 文件不存在时写入默认配置
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        info!(path = %path.display(), "config missing, writing defaults");
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.capture.target_fps > 0.0) {
            return invalid(format!("capture.target_fps must be > 0, got {}", self.capture.target_fps));
        }
        if self.capture.rotation_interval_secs == 0 {
            return invalid("capture.rotation_interval_secs must be > 0".into());
        }
        if chrono::format::StrftimeItems::new(&self.capture.datetime_format)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            return invalid(format!(
                "capture.datetime_format {:?} is not a valid strftime format",
                self.capture.datetime_format
            ));
        }
        if self.video.output_fps == 0 {
            return invalid("video.output_fps must be > 0".into());
        }
        if self.tracking.box_tolerance_percent < 0.0 {
            return invalid("tracking.box_tolerance_percent must be >= 0".into());
        }
        if self.tracking.max_timestamp_difference_ms < 0 {
            return invalid("tracking.max_timestamp_difference_ms must be >= 0".into());
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return invalid("detection.confidence_threshold must be within [0, 1]".into());
        }

        let mut names = std::collections::HashSet::new();
        for camera in &self.cameras {
            if camera.name.is_empty() || camera.name.contains(':') {
                return invalid(format!("camera name {:?} must be non-empty without ':'", camera.name));
            }
            if !names.insert(camera.name.as_str()) {
                return invalid(format!("duplicate camera name {:?}", camera.name));
            }
            if !(camera.source_fps > 0.0) {
                return invalid(format!("camera {} source_fps must be > 0", camera.name));
            }
        }
        Ok(())
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.data_dir)
    }
}

/// 数据目录布局
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub images: PathBuf,
    pub annotated: PathBuf,
    pub videos: PathBuf,
    pub tmp: PathBuf,
    pub ledger: PathBuf,
    pub params: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            images: root.join("images"),
            annotated: root.join("annotated"),
            videos: root.join("videos"),
            tmp: root.join("tmp"),
            ledger: root.join("ledger.db"),
            params: root.join("params.json"),
            root,
        }
    }

    /// 创建全部数据目录
    pub fn create_folders(&self) -> std::io::Result<()> {
        for dir in [&self.root, &self.images, &self.annotated, &self.videos, &self.tmp] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn camera_images(&self, camera: &str) -> PathBuf {
        self.images.join(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "data_dir": "/tmp/ww",
            "cameras": [{"name": "door", "source": "frames/door", "source_fps": 25.0}],
            "tracking": {"idle_frames": 3}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.tracking.idle_frames, 3);
        assert_eq!(config.tracking.box_tolerance_percent, 10.0);
        assert_eq!(config.video.format, VideoFormat::Gif);
        assert_eq!(config.tracking.font_path, Some(PathBuf::from(DEFAULT_FONT_PATH)));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_duplicate_cameras() {
        let camera = CameraConfig {
            name: "a".into(),
            source: "x".into(),
            source_fps: 10.0,
        };
        let config = Config {
            cameras: vec![camera.clone(), camera],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_or_create_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), created);
    }

    #[test]
    fn test_paths_layout() {
        let paths = Paths::new("/data");
        assert_eq!(paths.ledger, PathBuf::from("/data/ledger.db"));
        assert_eq!(paths.camera_images("door"), PathBuf::from("/data/images/door"));
    }
}
