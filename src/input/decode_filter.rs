/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module: RGB24 帧 → RgbImage → 采集线程
use crossbeam_channel::Sender;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{debug, warn};

/// FFmpeg解码过滤器: 流 → RGB帧
pub struct DecodeFilter {
    tx: Sender<RgbImage>,
    pub total_frames: usize,   // 总帧数
    pub dropped_frames: usize, // 丢弃的帧数
}

impl DecodeFilter {
    pub fn new(tx: Sender<RgbImage>) -> Self {
        Self {
            tx,
            total_frames: 0,
            dropped_frames: 0,
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("decode filter started");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        self.total_frames += 1;

        // 基本检查：空帧或损坏帧
        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            self.dropped_frames += 1;
            return Ok(None);
        }

        // SAFETY: 指针已判空, 帧在本次回调内有效; 像素格式由 format=rgb24 保证
        let image = unsafe {
            let raw = &*frame.as_ptr();
            let w = raw.width as u32;
            let h = raw.height as u32;
            let stride = raw.linesize[0] as usize;
            let plane = raw.data[0];

            if w == 0 || h == 0 || plane.is_null() || stride < w as usize * 3 {
                self.dropped_frames += 1;
                warn!(w, h, stride, "dropping malformed frame");
                return Ok(None);
            }

            let row_bytes = w as usize * 3;
            let mut buffer = Vec::with_capacity(row_bytes * h as usize);
            for row in 0..h as usize {
                let src = std::slice::from_raw_parts(plane.add(row * stride), row_bytes);
                buffer.extend_from_slice(src);
            }
            RgbImage::from_raw(w, h, buffer)
        };

        let Some(image) = image else {
            self.dropped_frames += 1;
            return Ok(None);
        };

        // 接收端已关闭: 结束解码
        if self.tx.send(image).is_err() {
            return Err("frame receiver closed".to_string());
        }
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!(
            total = self.total_frames,
            dropped = self.dropped_frames,
            "decode filter finished"
        );
    }
}
