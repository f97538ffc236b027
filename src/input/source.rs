//! 帧源 (Frame sources)
//!
//! 采集工作线程只依赖 FrameSource 接口:
//! - DirectorySource: 图片目录回放 (按文件名排序, 按源帧率节拍)
//! - FfmpegSource:    RTSP/文件流解码 (ffmpeg 功能)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::info;

use crate::config::CameraConfig;
use crate::error::CaptureError;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// 视频帧源
pub trait FrameSource: Send {
    /// 源帧率
    fn source_fps(&self) -> f64;

    /// 读取下一帧
    ///
    /// - `Ok(Some)`: 新帧
    /// - `Ok(None)`: 流自然结束
    /// - `Err`:      单帧读取失败 (可继续读取)
    fn read(&mut self) -> Result<Option<RgbImage>, CaptureError>;

    /// 已消费的帧数, 只有可定位的有限源返回 Some
    fn position(&self) -> Option<u64> {
        None
    }

    /// 跳过前 position 帧, 不支持定位返回 false
    fn seek(&mut self, position: u64) -> bool {
        let _ = position;
        false
    }
}

/// 根据摄像头配置打开帧源
pub fn open_source(camera: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    if is_stream_url(&camera.source) {
        #[cfg(feature = "ffmpeg")]
        {
            let source = super::decoder::FfmpegSource::open(&camera.source, camera.source_fps)?;
            return Ok(Box::new(source));
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            return Err(CaptureError::Open {
                source_url: camera.source.clone(),
                reason: "stream sources require the `ffmpeg` feature".into(),
            });
        }
    }
    let source = DirectorySource::open(&camera.source, camera.source_fps)?;
    Ok(Box::new(source))
}

/// 是否为需要 FFmpeg 解码的流地址
pub fn is_stream_url(source: &str) -> bool {
    ["rtsp://", "rtsps://", "http://", "https://", "file:"]
        .iter()
        .any(|prefix| source.starts_with(prefix))
}

/// 图片目录回放源
pub struct DirectorySource {
    files: Vec<PathBuf>,
    index: usize,
    fps: f64,
    interval: Duration,
    next_due: Option<Instant>,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>, fps: f64) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| CaptureError::Open {
            source_url: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        info!(dir = %dir.display(), frames = files.len(), fps, "📂 图片目录源已打开");

        Ok(Self {
            files,
            index: 0,
            fps,
            interval: Duration::from_secs_f64(1.0 / fps.max(f64::EPSILON)),
            next_due: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 按源帧率节拍等待
    fn pace(&mut self) {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval);
    }
}

impl FrameSource for DirectorySource {
    fn source_fps(&self) -> f64 {
        self.fps
    }

    fn read(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        let Some(path) = self.files.get(self.index).cloned() else {
            return Ok(None);
        };
        self.pace();
        self.index += 1;

        image::open(&path)
            .map(|img| Some(img.to_rgb8()))
            .map_err(|e| CaptureError::Read(format!("{}: {e}", path.display())))
    }

    fn position(&self) -> Option<u64> {
        Some(self.index as u64)
    }

    fn seek(&mut self, position: u64) -> bool {
        self.index = usize::try_from(position).unwrap_or(usize::MAX).min(self.files.len());
        true
    }
}
