/// RTSP主动拉流解码器
/// Stream decoder: ez-ffmpeg 后台线程解码, 通过有界通道交付RGB帧
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::{info, warn};

use super::decode_filter::DecodeFilter;
use super::source::FrameSource;
use crate::error::CaptureError;

/// 单帧最长等待时间
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// FFmpeg 帧源
pub struct FfmpegSource {
    url: String,
    fps: f64,
    rx: Option<Receiver<RgbImage>>,
    decoder: Option<JoinHandle<()>>,
}

impl FfmpegSource {
    pub fn open(url: &str, fps: f64) -> Result<Self, CaptureError> {
        let (tx, rx) = bounded::<RgbImage>(8);

        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(DecodeFilter::new(tx)));
        let out = create_null_output().add_frame_pipeline(pipe);

        let input = if url.starts_with("rtsp") {
            Input::new(url).set_input_opts(
                [("rtsp_transport", "tcp"), ("rtsp_flags", "prefer_tcp")].into(),
            )
        } else {
            Input::new(url)
        };

        // 构建FFmpeg上下文
        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc("format=rgb24")
            .output(out)
            .build()
            .map_err(|e| CaptureError::Open {
                source_url: url.to_string(),
                reason: format!("构建失败: {e}"),
            })?;

        let sch = ctx.start().map_err(|e| CaptureError::Open {
            source_url: url.to_string(),
            reason: format!("启动失败: {e}"),
        })?;
        info!(url, "✅ 流连接成功,开始解码");

        let decoder_url = url.to_string();
        let decoder = std::thread::spawn(move || {
            if let Err(e) = sch.wait() {
                warn!(url = %decoder_url, error = %e, "decoder exited with error");
            }
        });

        Ok(Self {
            url: url.to_string(),
            fps,
            rx: Some(rx),
            decoder: Some(decoder),
        })
    }
}

impl FrameSource for FfmpegSource {
    fn source_fps(&self) -> f64 {
        self.fps
    }

    fn read(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        let Some(rx) = &self.rx else {
            return Ok(None);
        };
        match rx.recv_timeout(READ_TIMEOUT) {
            Ok(image) => Ok(Some(image)),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Read(format!(
                "{}: no frame within {:?}",
                self.url, READ_TIMEOUT
            ))),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // 先关闭接收端, 解码过滤器下一帧发送失败后退出
        self.rx.take();
        if let Some(handle) = self.decoder.take() {
            if handle.join().is_err() {
                warn!(url = %self.url, "decoder thread panicked");
            }
        }
    }
}
