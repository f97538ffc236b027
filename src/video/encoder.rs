/// 视频编码器 (Video encoders)
///
/// - GifVideoEncoder:    纯 image 实现, 默认
/// - FfmpegVideoEncoder: PNG 序列 → H.264 MP4 (ffmpeg 功能)
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, RgbImage};

use crate::error::VideoError;

/// 有序图像序列 → 视频文件
pub trait VideoEncoder: Send {
    /// 输出文件扩展名 (不含点)
    fn extension(&self) -> &'static str;

    fn encode(&self, frames: &[RgbImage], fps: u32, out: &Path) -> Result<(), VideoError>;
}

/// GIF 编码器 (无限循环)
#[derive(Debug, Default, Clone, Copy)]
pub struct GifVideoEncoder;

impl VideoEncoder for GifVideoEncoder {
    fn extension(&self) -> &'static str {
        "gif"
    }

    fn encode(&self, frames: &[RgbImage], fps: u32, out: &Path) -> Result<(), VideoError> {
        let file = File::create(out).map_err(|source| VideoError::Io {
            path: out.to_path_buf(),
            source,
        })?;
        let mut encoder = GifEncoder::new(BufWriter::new(file));
        encoder.set_repeat(Repeat::Infinite)?;

        let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
        for frame in frames {
            let rgba = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
            encoder.encode_frame(image::Frame::from_parts(rgba, 0, 0, delay))?;
        }
        Ok(())
    }
}

#[cfg(feature = "ffmpeg")]
pub use self::mp4::FfmpegVideoEncoder;

#[cfg(feature = "ffmpeg")]
mod mp4 {
    use std::fs;
    use std::path::{Path, PathBuf};

    use ez_ffmpeg::{FfmpegContext, Input, Output};
    use image::RgbImage;
    use tracing::debug;

    use super::VideoEncoder;
    use crate::error::VideoError;

    /// 先写 PNG 序列到临时目录, 再交给 FFmpeg 编码
    pub struct FfmpegVideoEncoder {
        tmp_dir: PathBuf,
    }

    impl FfmpegVideoEncoder {
        pub fn new(tmp_dir: impl Into<PathBuf>) -> Self {
            Self {
                tmp_dir: tmp_dir.into(),
            }
        }
    }

    impl VideoEncoder for FfmpegVideoEncoder {
        fn extension(&self) -> &'static str {
            "mp4"
        }

        fn encode(&self, frames: &[RgbImage], fps: u32, out: &Path) -> Result<(), VideoError> {
            let stem = out
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "clip".into());
            let seq_dir = self.tmp_dir.join(&stem);
            fs::create_dir_all(&seq_dir).map_err(|source| VideoError::Io {
                path: seq_dir.clone(),
                source,
            })?;

            for (index, frame) in frames.iter().enumerate() {
                frame.save(seq_dir.join(format!("{index:06}.png")))?;
            }

            let pattern = seq_dir.join("%06d.png");
            let input = Input::new(pattern.to_string_lossy().into_owned())
                .set_format("image2")
                .set_input_opts(vec![("framerate", fps.to_string())]);
            let output = Output::from(out.to_string_lossy().into_owned())
                .set_video_codec("libx264");

            let result = FfmpegContext::builder()
                .input(input)
                .filter_desc("format=yuv420p")
                .output(output)
                .build()
                .and_then(|ctx| ctx.start())
                .and_then(|sch| sch.wait())
                .map_err(|e| VideoError::Encode(e.to_string()));

            if let Err(e) = fs::remove_dir_all(&seq_dir) {
                debug!(dir = %seq_dir.display(), error = %e, "tmp sequence not removed");
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gif_contains_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.gif");
        let frames = vec![
            RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 0])),
            RgbImage::from_pixel(8, 8, image::Rgb([0, 255, 0])),
            RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 255])),
        ];
        GifVideoEncoder.encode(&frames, 5, &out).unwrap();

        use image::AnimationDecoder;
        let file = std::io::BufReader::new(File::open(&out).unwrap());
        let decoded = image::codecs::gif::GifDecoder::new(file)
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(decoded.len(), 3);
        let (numer, denom) = decoded[0].delay().numer_denom_ms();
        assert_eq!(numer / denom, 200);
    }
}
