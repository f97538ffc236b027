//! 人员跟踪器 (PersonTracker)
//!
//! 对动作游标所指的帧:
//! 1. 无活跃人员: 每个目标创建新人员
//! 2. 无目标: 所有活跃人员结束
//! 3. 两者都有: 超时的人员结束, 其余按贪心最近邻匹配, 未匹配人员结束, 剩余目标创建新人员
//! 4. 绑定目标后累计目标数超过 idle_frames 时锁存空闲
//! 5. 标注帧图像
//! 6. 标记动作检测完成

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::annotate::{Activity, Annotator};
use super::matcher::best_match;
use crate::config::TrackingConfig;
use crate::error::StoreError;
use crate::ledger::{
    Frame, ObjectId, PersonId, PixelBox, Stage, Store, StoreResult, TrackedObject,
};

/// 跟踪参数
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub box_tolerance_percent: f64,
    pub idle_frames: usize,
    pub max_timestamp_difference_ms: i64,
}

impl From<&TrackingConfig> for TrackerSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            box_tolerance_percent: config.box_tolerance_percent,
            idle_frames: config.idle_frames,
            max_timestamp_difference_ms: config.max_timestamp_difference_ms,
        }
    }
}

/// 单帧跟踪结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackOutcome {
    /// 新建的人员
    pub created: Vec<PersonId>,
    /// 与已有人员匹配的 (人员, 目标)
    pub matched: Vec<(PersonId, ObjectId)>,
    /// 本帧结束的人员
    pub completed: Vec<PersonId>,
    /// 本帧锁存为空闲的人员
    pub idled: Vec<PersonId>,
}

/// 活跃人员及其最后一个目标
struct Track {
    person_id: PersonId,
    last: TrackedObject,
}

/// 人员跟踪器
pub struct PersonTracker {
    store: Arc<dyn Store>,
    settings: TrackerSettings,
    annotator: Annotator,
}

impl PersonTracker {
    pub fn new(store: Arc<dyn Store>, settings: TrackerSettings, annotator: Annotator) -> Self {
        Self {
            store,
            settings,
            annotator,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// 处理一帧并标记动作检测完成
    pub fn process_frame(&self, frame: &Frame) -> StoreResult<TrackOutcome> {
        if !frame.person_detected {
            return Err(StoreError::Invariant(format!(
                "frame {} has not finished person detection",
                frame.id
            )));
        }

        let mut outcome = TrackOutcome::default();
        let mut pool: Vec<TrackedObject> = self
            .store
            .objects_in_frame(frame.id)?
            .into_iter()
            .filter(|o| o.person_id.is_none())
            .collect();
        let tracks = self.active_tracks(frame, &mut outcome)?;

        if pool.is_empty() {
            // 无目标: 轨迹结束
            for track in &tracks {
                self.complete(track.person_id, &mut outcome)?;
            }
        } else {
            for track in &tracks {
                let last_ts = self.store.frame_timestamp(track.last.frame_id)?;
                let gap = frame.timestamp - last_ts;
                if gap > self.settings.max_timestamp_difference_ms {
                    debug!(person_id = track.person_id, gap, "stale track");
                    self.complete(track.person_id, &mut outcome)?;
                    continue;
                }

                match best_match(&track.last.bbox, &pool, self.settings.box_tolerance_percent) {
                    Some(index) => {
                        let object = pool.remove(index);
                        self.bind(track.person_id, object.id, &mut outcome)?;
                        outcome.matched.push((track.person_id, object.id));
                    }
                    None => self.complete(track.person_id, &mut outcome)?,
                }
            }
        }

        // 剩余目标各自成为新人员
        for object in pool {
            let person_id = self.store.create_person()?;
            self.bind(person_id, object.id, &mut outcome)?;
            outcome.created.push(person_id);
            info!(person_id, object_id = object.id, frame_id = frame.id, "🆕 新人员");
        }

        self.annotate(frame)?;
        self.store.mark_processed(frame.id, Stage::Action)?;

        if !outcome.completed.is_empty() {
            info!(frame_id = frame.id, completed = ?outcome.completed, "tracks completed");
        }
        Ok(outcome)
    }

    /// 活跃人员及其最后绑定的目标 (按人员ID排序)
    ///
    /// 无目标的人员直接结束; 已在本帧绑定过的人员 (重跑) 跳过。
    fn active_tracks(&self, frame: &Frame, outcome: &mut TrackOutcome) -> StoreResult<Vec<Track>> {
        let mut tracks = Vec::new();
        for person in self.store.active_persons()? {
            let objects = self.store.objects_for_person(person.id)?;
            let Some(last) = objects.into_iter().last() else {
                warn!(person_id = person.id, "person without objects, completing");
                self.complete(person.id, outcome)?;
                continue;
            };
            if last.frame_id >= frame.id {
                continue;
            }
            tracks.push(Track {
                person_id: person.id,
                last,
            });
        }
        Ok(tracks)
    }

    fn complete(&self, person_id: PersonId, outcome: &mut TrackOutcome) -> StoreResult<()> {
        self.store.set_person_completed(person_id)?;
        outcome.completed.push(person_id);
        Ok(())
    }

    /// 绑定目标, 检查空闲锁存
    fn bind(&self, person_id: PersonId, object_id: ObjectId, outcome: &mut TrackOutcome) -> StoreResult<()> {
        self.store.assign_person_to_object(object_id, person_id)?;

        let bound = self.store.objects_for_person(person_id)?.len();
        let person = self
            .store
            .person(person_id)?
            .ok_or_else(|| StoreError::person_not_found(person_id))?;
        if !person.idle && bound > self.settings.idle_frames {
            self.store.set_person_idle(person_id)?;
            outcome.idled.push(person_id);
            info!(person_id, bound, "💤 人员判定为空闲");
        }
        Ok(())
    }

    /// 标注本帧所有目标; 图像读写失败只记录警告
    fn annotate(&self, frame: &Frame) -> StoreResult<()> {
        let mut idle_persons: HashSet<PersonId> = HashSet::new();
        let mut boxes: Vec<(PixelBox, Activity)> = Vec::new();
        for object in self.store.objects_in_frame(frame.id)? {
            let idle = match object.person_id {
                Some(person_id) if idle_persons.contains(&person_id) => true,
                Some(person_id) => {
                    let idle = self.store.person(person_id)?.is_some_and(|p| p.idle);
                    if idle {
                        idle_persons.insert(person_id);
                    }
                    idle
                }
                None => false,
            };
            boxes.push((object.bbox, Activity::from_idle(idle)));
        }
        if boxes.is_empty() {
            return Ok(());
        }

        match self.annotator.annotate_frame(frame.id, &frame.image_path, &boxes) {
            Ok(path) => self.store.set_annotated_image(frame.id, &path),
            Err(e) => {
                warn!(frame_id = frame.id, error = %e, "annotation skipped");
                Ok(())
            }
        }
    }
}
