/// 账本系统 (Ledger System)
///
/// 帧/目标/人员三张表的唯一数据源:
/// - Store:       存储接口 (行级原子读写)
/// - SqliteStore: SQLite 持久账本 (多进程共享)
/// - MemoryStore: 进程内临时账本
/// - ParamsFile:  参考时间与游标检查点
pub mod memory;
pub mod params;
pub mod sqlite;
pub mod types;

use std::path::Path;

pub use memory::MemoryStore;
pub use params::{Params, ParamsFile};
pub use sqlite::SqliteStore;
pub use types::{Frame, FrameId, NewFrame, ObjectId, Person, PersonId, PixelBox, Stage, TrackedObject};

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// 账本存储接口
///
/// 所有操作在行粒度上原子, 不假设跨步骤的多行事务。
/// 采集线程与流水线线程共享同一个实例。
pub trait Store: Send + Sync {
    // ========== 帧 ==========

    /// 插入新帧, 返回单调递增的帧ID
    fn create_frame(&self, frame: NewFrame) -> StoreResult<FrameId>;

    fn frame(&self, frame_id: FrameId) -> StoreResult<Option<Frame>>;

    /// 指定阶段中第一个未处理的帧 (按帧ID排序)
    fn next_unprocessed_frame(&self, stage: Stage) -> StoreResult<Option<Frame>>;

    /// 最新插入的帧ID
    fn latest_frame_id(&self) -> StoreResult<Option<FrameId>>;

    fn mark_processed(&self, frame_id: FrameId, stage: Stage) -> StoreResult<()>;

    fn set_annotated_image(&self, frame_id: FrameId, path: &Path) -> StoreResult<()>;

    /// 帧时间戳 (相对参考时间的毫秒偏移)
    fn frame_timestamp(&self, frame_id: FrameId) -> StoreResult<i64>;

    // ========== 目标 ==========

    fn create_object(&self, frame_id: FrameId, bbox: PixelBox) -> StoreResult<ObjectId>;

    /// 绑定目标到人员, 已绑定的目标返回 Conflict
    fn assign_person_to_object(&self, object_id: ObjectId, person_id: PersonId) -> StoreResult<()>;

    /// 帧内所有目标 (按目标ID排序)
    fn objects_in_frame(&self, frame_id: FrameId) -> StoreResult<Vec<TrackedObject>>;

    /// 人员绑定的所有目标 (按目标ID排序, 即帧顺序)
    fn objects_for_person(&self, person_id: PersonId) -> StoreResult<Vec<TrackedObject>>;

    // ========== 人员 ==========

    fn create_person(&self) -> StoreResult<PersonId>;

    fn person(&self, person_id: PersonId) -> StoreResult<Option<Person>>;

    /// 所有未完成的人员 (按人员ID排序)
    fn active_persons(&self) -> StoreResult<Vec<Person>>;

    fn set_person_completed(&self, person_id: PersonId) -> StoreResult<()>;

    fn set_person_idle(&self, person_id: PersonId) -> StoreResult<()>;

    /// 只能写一次, 重复写入返回 Conflict
    fn set_person_video_path(&self, person_id: PersonId, path: &Path) -> StoreResult<()>;

    /// 空闲 && 已完成 && 尚无视频 的人员 (按人员ID排序)
    fn pending_videos(&self) -> StoreResult<Vec<Person>>;

    // ========== 维护 ==========

    /// 清空全部数据并重置ID
    fn reset(&self) -> StoreResult<()>;
}
