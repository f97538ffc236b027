//! 视频合成器 (VideoAssembler)
//!
//! 每次最多处理一个 空闲 && 已完成 && 尚无视频 的人员:
//! 按帧顺序取出其全部目标, 逐帧标注后编码为一个视频, 写回视频路径。

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use tracing::{error, info, warn};

use super::encoder::VideoEncoder;
use crate::error::{StoreError, VideoError};
use crate::ledger::{Person, PersonId, Store};
use crate::tracking::{Activity, Annotator};

/// 视频合成器
pub struct VideoAssembler {
    store: Arc<dyn Store>,
    encoder: Box<dyn VideoEncoder>,
    annotator: Annotator,
    videos_dir: PathBuf,
    fps: u32,
    idle_frames: usize,
    /// 本进程内失败的人员, 重启后重试
    skipped: HashSet<PersonId>,
}

impl VideoAssembler {
    pub fn new(
        store: Arc<dyn Store>,
        encoder: Box<dyn VideoEncoder>,
        annotator: Annotator,
        videos_dir: impl Into<PathBuf>,
        fps: u32,
        idle_frames: usize,
    ) -> Self {
        Self {
            store,
            encoder,
            annotator,
            videos_dir: videos_dir.into(),
            fps,
            idle_frames,
            skipped: HashSet::new(),
        }
    }

    pub fn skipped(&self) -> &HashSet<PersonId> {
        &self.skipped
    }

    /// 为下一个待合成的人员生成视频, 没有待合成人员时返回 None
    pub fn maybe_build_video(&mut self) -> Result<Option<(PersonId, PathBuf)>, VideoError> {
        let Some(person) = self
            .store
            .pending_videos()?
            .into_iter()
            .find(|p| !self.skipped.contains(&p.id))
        else {
            return Ok(None);
        };

        match self.build(&person) {
            Ok(path) => {
                info!(person_id = person.id, video = %path.display(), "🎬 视频已生成");
                Ok(Some((person.id, path)))
            }
            Err(VideoError::Store(e)) if e.is_transient() => Err(VideoError::Store(e)),
            Err(e) => {
                error!(person_id = person.id, error = %e, "video skipped for this run");
                self.skipped.insert(person.id);
                Ok(None)
            }
        }
    }

    fn build(&self, person: &Person) -> Result<PathBuf, VideoError> {
        let objects = self.store.objects_for_person(person.id)?;

        let mut frames: Vec<RgbImage> = Vec::with_capacity(objects.len());
        for (index, object) in objects.iter().enumerate() {
            let Some(frame) = self.store.frame(object.frame_id)? else {
                warn!(person_id = person.id, frame_id = object.frame_id, "frame row missing");
                continue;
            };
            let mut image = match image::open(&frame.image_path) {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    warn!(
                        person_id = person.id,
                        image = %frame.image_path.display(),
                        error = %e,
                        "unreadable frame skipped"
                    );
                    continue;
                }
            };
            // 空闲锁存在第 idle_frames + 1 个目标时触发
            let activity = Activity::from_idle(index >= self.idle_frames);
            self.annotator.draw(&mut image, object.bbox, activity);
            frames.push(image);
        }
        if frames.is_empty() {
            return Err(VideoError::NoFrames(person.id));
        }

        fs::create_dir_all(&self.videos_dir).map_err(|source| VideoError::Io {
            path: self.videos_dir.clone(),
            source,
        })?;
        let path = self
            .videos_dir
            .join(format!("person_{}.{}", person.id, self.encoder.extension()));
        self.encoder.encode(&frames, self.fps, &path)?;

        match self.store.set_person_video_path(person.id, &path) {
            Ok(()) => Ok(path),
            // 已有视频路径: 视为完成
            Err(StoreError::Conflict(reason)) => {
                warn!(person_id = person.id, reason, "video path already recorded");
                Ok(path)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryStore, NewFrame, PixelBox, Stage};
    use crate::video::GifVideoEncoder;

    fn person_with_frames(store: &MemoryStore, dir: &std::path::Path, n: usize, readable: bool) -> PersonId {
        let person = store.create_person().unwrap();
        for i in 0..n {
            let image_path = dir.join(format!("p{person}_{i}.png"));
            if readable {
                RgbImage::new(32, 32).save(&image_path).unwrap();
            }
            let frame = store
                .create_frame(NewFrame {
                    camera: "door".into(),
                    timestamp: i as i64,
                    timestamp_label: i.to_string(),
                    image_path,
                })
                .unwrap();
            store.mark_processed(frame, Stage::Person).unwrap();
            let object = store.create_object(frame, PixelBox::new(4, 4, 20, 20)).unwrap();
            store.assign_person_to_object(object, person).unwrap();
        }
        store.set_person_idle(person).unwrap();
        store.set_person_completed(person).unwrap();
        person
    }

    fn assembler(store: Arc<MemoryStore>, dir: &std::path::Path) -> VideoAssembler {
        VideoAssembler::new(
            store,
            Box::new(GifVideoEncoder),
            Annotator::new(dir.join("annotated"), None),
            dir.join("videos"),
            5,
            2,
        )
    }

    #[test]
    fn test_builds_video_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let person = person_with_frames(&store, dir.path(), 4, true);
        let mut assembler = assembler(store.clone(), dir.path());

        let (built, path) = assembler.maybe_build_video().unwrap().unwrap();
        assert_eq!(built, person);
        assert_eq!(path, dir.path().join("videos").join(format!("person_{person}.gif")));
        assert!(path.exists());
        assert_eq!(store.person(person).unwrap().unwrap().video_path, Some(path));

        // 第二次调用: 无事可做
        assert!(assembler.maybe_build_video().unwrap().is_none());
        assert_eq!(fs::read_dir(dir.path().join("videos")).unwrap().count(), 1);
    }

    #[test]
    fn test_person_without_readable_frames_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let broken = person_with_frames(&store, dir.path(), 2, false);
        let healthy = person_with_frames(&store, dir.path(), 2, true);
        let mut assembler = assembler(store.clone(), dir.path());

        assert!(assembler.maybe_build_video().unwrap().is_none());
        assert!(assembler.skipped().contains(&broken));
        // 失败的人员不阻塞后续人员
        let (built, _) = assembler.maybe_build_video().unwrap().unwrap();
        assert_eq!(built, healthy);
        assert!(store.person(broken).unwrap().unwrap().video_path.is_none());
    }

    #[test]
    fn test_active_person_is_not_assembled() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.create_person().unwrap();
        let mut assembler = assembler(store, dir.path());
        assert!(assembler.maybe_build_video().unwrap().is_none());
    }
}
