/// 跟踪系统 (Tracking System)
///
/// - DetectionCursor: 人体/动作两阶段游标
/// - PersonTracker:   贪心最近邻匹配 + 人员生命周期
/// - Annotator:       帧标注
pub mod annotate;
pub mod cursor;
pub mod matcher;
pub mod tracker;

pub use annotate::{Activity, Annotator};
pub use cursor::DetectionCursor;
pub use matcher::{best_match, distance, within_tolerance};
pub use tracker::{PersonTracker, TrackOutcome, TrackerSettings};
