//! 内存账本 (MemoryStore)
//!
//! 三张表放在一把读写锁后面, 不落盘。每个写操作先校验再修改,
//! 出错时表保持不变。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use super::types::{Frame, FrameId, NewFrame, ObjectId, Person, PersonId, PixelBox, Stage, TrackedObject};
use super::{Store, StoreResult};
use crate::error::StoreError;

/// 账本表
#[derive(Debug, Default)]
struct Tables {
    frames: BTreeMap<FrameId, Frame>,
    objects: BTreeMap<ObjectId, TrackedObject>,
    persons: BTreeMap<PersonId, Person>,
    last_frame_id: FrameId,
    last_object_id: ObjectId,
    last_person_id: PersonId,
}

impl Tables {
    fn frame_mut(&mut self, frame_id: FrameId) -> StoreResult<&mut Frame> {
        self.frames
            .get_mut(&frame_id)
            .ok_or_else(|| StoreError::frame_not_found(frame_id))
    }

    fn person_mut(&mut self, person_id: PersonId) -> StoreResult<&mut Person> {
        self.persons
            .get_mut(&person_id)
            .ok_or_else(|| StoreError::person_not_found(person_id))
    }
}

/// 内存账本实现
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("ledger lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("ledger lock poisoned".into()))
    }

    /// 在写锁内修改表
    fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut tables = self.write()?;
        f(&mut tables)
    }
}

impl Store for MemoryStore {
    fn create_frame(&self, frame: NewFrame) -> StoreResult<FrameId> {
        self.mutate(|t| {
            t.last_frame_id += 1;
            let id = t.last_frame_id;
            t.frames.insert(
                id,
                Frame {
                    id,
                    camera: frame.camera,
                    timestamp: frame.timestamp,
                    timestamp_label: frame.timestamp_label,
                    image_path: frame.image_path,
                    annotated_image_path: None,
                    person_detected: false,
                    action_detected: false,
                },
            );
            Ok(id)
        })
    }

    fn frame(&self, frame_id: FrameId) -> StoreResult<Option<Frame>> {
        Ok(self.read()?.frames.get(&frame_id).cloned())
    }

    fn next_unprocessed_frame(&self, stage: Stage) -> StoreResult<Option<Frame>> {
        Ok(self
            .read()?
            .frames
            .values()
            .find(|f| !f.is_processed(stage))
            .cloned())
    }

    fn latest_frame_id(&self) -> StoreResult<Option<FrameId>> {
        Ok(self.read()?.frames.keys().next_back().copied())
    }

    fn mark_processed(&self, frame_id: FrameId, stage: Stage) -> StoreResult<()> {
        self.mutate(|t| {
            let frame = t.frame_mut(frame_id)?;
            match stage {
                Stage::Person => frame.person_detected = true,
                Stage::Action => {
                    if !frame.person_detected {
                        return Err(StoreError::Invariant(format!(
                            "frame {frame_id} cannot finish action detection before person detection"
                        )));
                    }
                    frame.action_detected = true;
                }
            }
            debug!(frame_id, %stage, "frame marked processed");
            Ok(())
        })
    }

    fn set_annotated_image(&self, frame_id: FrameId, path: &Path) -> StoreResult<()> {
        self.mutate(|t| {
            t.frame_mut(frame_id)?.annotated_image_path = Some(path.to_path_buf());
            Ok(())
        })
    }

    fn frame_timestamp(&self, frame_id: FrameId) -> StoreResult<i64> {
        self.read()?
            .frames
            .get(&frame_id)
            .map(|f| f.timestamp)
            .ok_or_else(|| StoreError::frame_not_found(frame_id))
    }

    fn create_object(&self, frame_id: FrameId, bbox: PixelBox) -> StoreResult<ObjectId> {
        self.mutate(|t| {
            if !t.frames.contains_key(&frame_id) {
                return Err(StoreError::frame_not_found(frame_id));
            }
            t.last_object_id += 1;
            let id = t.last_object_id;
            t.objects.insert(
                id,
                TrackedObject {
                    id,
                    frame_id,
                    bbox,
                    person_id: None,
                },
            );
            Ok(id)
        })
    }

    fn assign_person_to_object(&self, object_id: ObjectId, person_id: PersonId) -> StoreResult<()> {
        self.mutate(|t| {
            if !t.persons.contains_key(&person_id) {
                return Err(StoreError::person_not_found(person_id));
            }
            let object = t
                .objects
                .get_mut(&object_id)
                .ok_or_else(|| StoreError::object_not_found(object_id))?;
            if let Some(owner) = object.person_id {
                return Err(StoreError::Conflict(format!(
                    "object {object_id} already belongs to person {owner}"
                )));
            }
            object.person_id = Some(person_id);
            Ok(())
        })
    }

    fn objects_in_frame(&self, frame_id: FrameId) -> StoreResult<Vec<TrackedObject>> {
        Ok(self
            .read()?
            .objects
            .values()
            .filter(|o| o.frame_id == frame_id)
            .cloned()
            .collect())
    }

    fn objects_for_person(&self, person_id: PersonId) -> StoreResult<Vec<TrackedObject>> {
        Ok(self
            .read()?
            .objects
            .values()
            .filter(|o| o.person_id == Some(person_id))
            .cloned()
            .collect())
    }

    fn create_person(&self) -> StoreResult<PersonId> {
        self.mutate(|t| {
            t.last_person_id += 1;
            let id = t.last_person_id;
            t.persons.insert(
                id,
                Person {
                    id,
                    completed: false,
                    idle: false,
                    video_path: None,
                },
            );
            Ok(id)
        })
    }

    fn person(&self, person_id: PersonId) -> StoreResult<Option<Person>> {
        Ok(self.read()?.persons.get(&person_id).cloned())
    }

    fn active_persons(&self) -> StoreResult<Vec<Person>> {
        Ok(self
            .read()?
            .persons
            .values()
            .filter(|p| !p.completed)
            .cloned()
            .collect())
    }

    fn set_person_completed(&self, person_id: PersonId) -> StoreResult<()> {
        self.mutate(|t| {
            t.person_mut(person_id)?.completed = true;
            Ok(())
        })
    }

    fn set_person_idle(&self, person_id: PersonId) -> StoreResult<()> {
        self.mutate(|t| {
            t.person_mut(person_id)?.idle = true;
            Ok(())
        })
    }

    fn set_person_video_path(&self, person_id: PersonId, path: &Path) -> StoreResult<()> {
        self.mutate(|t| {
            let person = t.person_mut(person_id)?;
            if let Some(existing) = &person.video_path {
                return Err(StoreError::Conflict(format!(
                    "person {person_id} already has video {}",
                    existing.display()
                )));
            }
            person.video_path = Some(path.to_path_buf());
            Ok(())
        })
    }

    fn pending_videos(&self) -> StoreResult<Vec<Person>> {
        Ok(self
            .read()?
            .persons
            .values()
            .filter(|p| p.awaits_video())
            .cloned()
            .collect())
    }

    fn reset(&self) -> StoreResult<()> {
        self.mutate(|t| {
            *t = Tables::default();
            info!("ledger reset");
            Ok(())
        })
    }
}
