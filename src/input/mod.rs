/// 视频输入系统 (Video Input System)
///
/// 采集工作线程读取帧的来源
/// - FrameSource:     统一帧源接口
/// - DirectorySource: 图片目录回放
/// - FfmpegSource:    RTSP/文件流解码 (ffmpeg 功能)
/// - Decimator:       按目标帧率抽帧
pub mod decimator;
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod source;

pub use decimator::Decimator;
#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegSource;
pub use source::{is_stream_url, open_source, DirectorySource, FrameSource};
