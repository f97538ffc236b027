//! 检测游标 (Detection cursors)
//!
//! 两个只前进的指针, 分别指向人体检测与动作检测的下一帧。
//! 游标值为"第一个未处理帧ID", 全部处理完时为最新帧ID + 1。
//! 动作游标永远不超过人体游标。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ledger::{Frame, FrameId, ParamsFile, Stage, Store, StoreResult};

/// 双阶段游标
pub struct DetectionCursor {
    store: Arc<dyn Store>,
    params: Arc<ParamsFile>,
    poll_interval: Duration,
    person: FrameId,
    action: FrameId,
}

impl DetectionCursor {
    /// 从检查点恢复, 没有检查点时查询账本
    pub fn load(store: Arc<dyn Store>, params: Arc<ParamsFile>, poll_interval: Duration) -> StoreResult<Self> {
        let saved = params.get();
        let person = match saved.person_cursor {
            Some(cursor) => cursor,
            None => Self::query(store.as_ref(), Stage::Person)?,
        };
        let action = match saved.action_cursor {
            Some(cursor) => cursor,
            None => Self::query(store.as_ref(), Stage::Action)?,
        }
        .min(person);

        info!(person, action, "游标已加载");
        Ok(Self {
            store,
            params,
            poll_interval,
            person,
            action,
        })
    }

    pub fn person(&self) -> FrameId {
        self.person
    }

    pub fn action(&self) -> FrameId {
        self.action
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// 账本中该阶段的第一个未处理帧ID
    fn query(store: &dyn Store, stage: Stage) -> StoreResult<FrameId> {
        if let Some(frame) = store.next_unprocessed_frame(stage)? {
            return Ok(frame.id);
        }
        Ok(store.latest_frame_id()?.map_or(1, |id| id + 1))
    }

    // ========== 取帧 ==========

    /// 非阻塞: 下一个待人体检测的帧
    pub fn poll_person_frame(&self) -> StoreResult<Option<Frame>> {
        self.store.next_unprocessed_frame(Stage::Person)
    }

    /// 非阻塞: 下一个待动作检测的帧; 追上人体游标时返回 None
    pub fn poll_action_frame(&self) -> StoreResult<Option<Frame>> {
        if self.action >= self.person {
            debug!(action = self.action, person = self.person, "action stage caught up, skipping");
            return Ok(None);
        }
        let frame = self.store.next_unprocessed_frame(Stage::Action)?;
        Ok(frame.filter(|f| {
            let ready = f.id < self.person && f.person_detected;
            if !ready {
                debug!(frame_id = f.id, person = self.person, "action frame not ready");
            }
            ready
        }))
    }

    /// 阻塞直到有待人体检测的帧, 收到停止信号返回 None
    pub fn next_person_frame(&self, stop: &AtomicBool) -> Option<Frame> {
        self.wait_for(stop, || self.poll_person_frame())
    }

    /// 阻塞直到有可做动作检测的帧, 收到停止信号返回 None
    pub fn next_action_frame(&self, stop: &AtomicBool) -> Option<Frame> {
        self.wait_for(stop, || self.poll_action_frame())
    }

    fn wait_for(&self, stop: &AtomicBool, mut poll: impl FnMut() -> StoreResult<Option<Frame>>) -> Option<Frame> {
        while !stop.load(Ordering::SeqCst) {
            match poll() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "store query failed, retrying"),
            }
            std::thread::sleep(self.poll_interval);
        }
        None
    }

    // ========== 前进 ==========

    /// 人体检测完成后重新查询并前进
    pub fn advance_person(&mut self) -> StoreResult<FrameId> {
        let next = Self::query(self.store.as_ref(), Stage::Person)?;
        self.person = self.person.max(next);
        self.save()?;
        Ok(self.person)
    }

    /// 动作检测完成后重新查询并前进 (不超过人体游标)
    pub fn advance_action(&mut self) -> StoreResult<FrameId> {
        let next = Self::query(self.store.as_ref(), Stage::Action)?;
        self.action = self.action.max(next.min(self.person));
        self.save()?;
        Ok(self.action)
    }

    fn save(&self) -> StoreResult<()> {
        let (person, action) = (self.person, self.action);
        self.params.update(|p| {
            p.person_cursor = Some(person);
            p.action_cursor = Some(action);
        })
    }
}

impl std::fmt::Debug for DetectionCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionCursor")
            .field("person", &self.person)
            .field("action", &self.action)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryStore, NewFrame};
    use std::path::PathBuf;

    fn add_frames(store: &MemoryStore, n: usize) {
        for i in 0..n {
            store
                .create_frame(NewFrame {
                    camera: "door".into(),
                    timestamp: i as i64,
                    timestamp_label: i.to_string(),
                    image_path: PathBuf::from(format!("{i}.png")),
                })
                .unwrap();
        }
    }

    fn cursor(dir: &std::path::Path, store: Arc<MemoryStore>) -> DetectionCursor {
        let params = Arc::new(ParamsFile::load(dir.join("params.json")));
        DetectionCursor::load(store, params, Duration::from_millis(5)).unwrap()
    }

    #[test]
    fn test_empty_ledger_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let c = cursor(dir.path(), Arc::new(MemoryStore::new()));
        assert_eq!((c.person(), c.action()), (1, 1));
        assert!(c.poll_action_frame().unwrap().is_none());
    }

    #[test]
    fn test_action_never_passes_person() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        add_frames(&store, 3);
        let mut c = cursor(dir.path(), store.clone());

        // 人体游标未前进时动作阶段跳过
        assert!(c.poll_action_frame().unwrap().is_none());

        let frame = c.poll_person_frame().unwrap().unwrap();
        store.mark_processed(frame.id, Stage::Person).unwrap();
        assert_eq!(c.advance_person().unwrap(), 2);

        let action = c.poll_action_frame().unwrap().unwrap();
        assert_eq!(action.id, 1);
        store.mark_processed(action.id, Stage::Action).unwrap();
        assert_eq!(c.advance_action().unwrap(), 2);
        assert!(c.action() <= c.person());

        // 已追上: 跳过
        assert!(c.poll_action_frame().unwrap().is_none());
        assert!(c.action() <= c.person());
    }

    #[test]
    fn test_checkpoint_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        add_frames(&store, 2);
        {
            let mut c = cursor(dir.path(), store.clone());
            store.mark_processed(1, Stage::Person).unwrap();
            c.advance_person().unwrap();
        }
        let c = cursor(dir.path(), store);
        assert_eq!(c.person(), 2);
        assert_eq!(c.action(), 1);
    }

    #[test]
    fn test_all_processed_points_past_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        add_frames(&store, 2);
        let mut c = cursor(dir.path(), store.clone());
        for id in 1..=2 {
            store.mark_processed(id, Stage::Person).unwrap();
        }
        assert_eq!(c.advance_person().unwrap(), 3);
    }

    #[test]
    fn test_next_person_frame_returns_none_when_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let c = cursor(dir.path(), Arc::new(MemoryStore::new()));
        let stop = AtomicBool::new(true);
        assert!(c.next_person_frame(&stop).is_none());
    }

    #[test]
    fn test_next_person_frame_waits_for_insert() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let c = cursor(dir.path(), store.clone());

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                add_frames(&store, 1);
            })
        };
        let stop = AtomicBool::new(false);
        let frame = c.next_person_frame(&stop).unwrap();
        writer.join().unwrap();
        assert_eq!(frame.id, 1);
    }
}
