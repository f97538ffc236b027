//! 预测器 (Predictor)
//!
//! 单线程顺序执行: 人体检测一帧 → 动作检测一帧 → 检查视频合成。
//! 所有失败在本层吸收, 只记录日志。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::detection::{Detector, PersonFilter};
use crate::error::{Error, VideoError};
use crate::ledger::{Frame, FrameId, ParamsFile, PersonId, Stage, Store};
use crate::tracking::{Annotator, DetectionCursor, PersonTracker, TrackerSettings};
use crate::video::{encoder_for, VideoAssembler};

/// 一次迭代完成的工作
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub person_frame: Option<FrameId>,
    pub action_frame: Option<FrameId>,
    pub video: Option<(PersonId, PathBuf)>,
}

impl IterationReport {
    pub fn did_work(&self) -> bool {
        self.person_frame.is_some() || self.action_frame.is_some() || self.video.is_some()
    }
}

/// 检测/跟踪流水线
pub struct Predictor {
    store: Arc<dyn Store>,
    detector: Box<dyn Detector>,
    filter: PersonFilter,
    cursor: DetectionCursor,
    tracker: PersonTracker,
    assembler: VideoAssembler,
    poll_interval: Duration,
}

impl Predictor {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        params: Arc<ParamsFile>,
        detector: Box<dyn Detector>,
    ) -> Result<Self, Error> {
        let paths = config.paths();
        let poll_interval = Duration::from_millis(config.pipeline.poll_interval_ms);
        let font = config.tracking.font_path.as_deref();

        let cursor = DetectionCursor::load(Arc::clone(&store), params, poll_interval)?;
        let tracker = PersonTracker::new(
            Arc::clone(&store),
            TrackerSettings::from(&config.tracking),
            Annotator::new(&paths.annotated, font),
        );
        let assembler = VideoAssembler::new(
            Arc::clone(&store),
            encoder_for(config.video.format, &paths.tmp),
            Annotator::new(&paths.annotated, font),
            &paths.videos,
            config.video.output_fps,
            config.tracking.idle_frames,
        );

        Ok(Self {
            store,
            detector,
            filter: PersonFilter::from(&config.detection),
            cursor,
            tracker,
            assembler,
            poll_interval,
        })
    }

    pub fn cursor(&self) -> &DetectionCursor {
        &self.cursor
    }

    /// 执行一次迭代
    pub fn run_iteration(&mut self) -> Result<IterationReport, Error> {
        let mut report = IterationReport::default();

        // 人体检测
        if let Some(frame) = self.cursor.poll_person_frame()? {
            self.detect_persons(&frame)?;
            self.cursor.advance_person()?;
            report.person_frame = Some(frame.id);
        }

        // 动作检测 (不超过人体游标)
        if let Some(frame) = self.cursor.poll_action_frame()? {
            let outcome = self.tracker.process_frame(&frame)?;
            self.cursor.advance_action()?;
            debug!(frame_id = frame.id, ?outcome, "action step done");
            report.action_frame = Some(frame.id);
        }

        report.video = self.assembler.maybe_build_video()?;
        Ok(report)
    }

    /// 循环执行直到收到停止信号; 空闲时按轮询间隔休眠
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(cursor = ?self.cursor, "▶ 预测器启动");
        while !stop.load(Ordering::SeqCst) {
            match self.run_iteration() {
                Ok(report) if report.did_work() => continue,
                Ok(_) => {}
                Err(e) if is_transient(&e) => warn!(error = %e, "transient store error, backing off"),
                Err(e) => error!(error = %e, "pipeline iteration failed"),
            }
            std::thread::sleep(self.poll_interval);
        }
        info!(cursor = ?self.cursor, "⏹ 预测器停止");
    }

    /// 人体检测阶段: 检测失败时以零目标标记完成
    fn detect_persons(&mut self, frame: &Frame) -> Result<(), Error> {
        let existing = self.store.objects_in_frame(frame.id)?;
        if !existing.is_empty() {
            debug!(frame_id = frame.id, objects = existing.len(), "reusing objects from earlier run");
        } else {
            match self.detector.detect(&frame.image_path) {
                Ok(detections) => {
                    let boxes = self.filter.apply(&detections);
                    for bbox in &boxes {
                        self.store.create_object(frame.id, *bbox)?;
                    }
                    debug!(frame_id = frame.id, detections = detections.len(), persons = boxes.len(), "person step done");
                }
                Err(e) => {
                    error!(frame_id = frame.id, image = %frame.image_path.display(), error = %e, "detection failed, frame skipped");
                }
            }
        }
        self.store.mark_processed(frame.id, Stage::Person)?;
        Ok(())
    }
}

fn is_transient(error: &Error) -> bool {
    match error {
        Error::Store(e) | Error::Video(VideoError::Store(e)) => e.is_transient(),
        _ => false,
    }
}
