/// 视频系统 (Video System)
///
/// - VideoAssembler: 空闲且已完成的人员 → 标注视频
/// - VideoEncoder:   图像序列编码 (GIF / MP4)
pub mod assembler;
pub mod encoder;

pub use assembler::VideoAssembler;
#[cfg(feature = "ffmpeg")]
pub use encoder::FfmpegVideoEncoder;
pub use encoder::{GifVideoEncoder, VideoEncoder};

use std::path::Path;

use crate::config::VideoFormat;

/// 按配置选择编码器
///
/// 没有 ffmpeg 功能时 MP4 回退为 GIF。
pub fn encoder_for(format: VideoFormat, tmp_dir: &Path) -> Box<dyn VideoEncoder> {
    match format {
        VideoFormat::Gif => Box::new(GifVideoEncoder),
        #[cfg(feature = "ffmpeg")]
        VideoFormat::Mp4 => Box::new(FfmpegVideoEncoder::new(tmp_dir)),
        #[cfg(not(feature = "ffmpeg"))]
        VideoFormat::Mp4 => {
            tracing::warn!(tmp = %tmp_dir.display(), "mp4 output needs the `ffmpeg` feature, writing gif");
            Box::new(GifVideoEncoder)
        }
    }
}
