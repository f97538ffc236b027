/// 账本数据结构定义
/// Ledger row types: frames, objects, persons
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type FrameId = u64;
pub type ObjectId = u64;
pub type PersonId = u64;

// ========== 枚举类型 ==========

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// 人体检测
    Person,
    /// 动作(空闲)分类
    Action,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Person => f.write_str("person"),
            Stage::Action => f.write_str("action"),
        }
    }
}

// ========== 数据结构 ==========

/// 像素坐标边界框 (x0, y0) 左上, (x1, y1) 右下
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl PixelBox {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// 坐标向量 [x0, y0, x1, y1]
    pub fn coords(&self) -> [i32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }

    pub fn width(&self) -> u32 {
        (self.x1 - self.x0).unsigned_abs()
    }

    pub fn height(&self) -> u32 {
        (self.y1 - self.y0).unsigned_abs()
    }
}

/// 待写入的新帧 (采集线程 → 账本)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFrame {
    pub camera: String,
    /// 相对参考时间的毫秒偏移
    pub timestamp: i64,
    pub timestamp_label: String,
    pub image_path: PathBuf,
}

/// 帧 (Frame)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    pub camera: String,
    pub timestamp: i64,
    pub timestamp_label: String,
    pub image_path: PathBuf,
    pub annotated_image_path: Option<PathBuf>,
    pub person_detected: bool,
    pub action_detected: bool,
}

impl Frame {
    pub fn is_processed(&self, stage: Stage) -> bool {
        match stage {
            Stage::Person => self.person_detected,
            Stage::Action => self.action_detected,
        }
    }
}

/// 检测目标 (Object): 某帧中的一个边界框
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: ObjectId,
    pub frame_id: FrameId,
    pub bbox: PixelBox,
    /// 所属人员, 只写一次
    pub person_id: Option<PersonId>,
}

/// 人员 (Person): 跨帧串联的身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub completed: bool,
    pub idle: bool,
    pub video_path: Option<PathBuf>,
}

impl Person {
    /// 是否等待合成视频
    pub fn awaits_video(&self) -> bool {
        self.idle && self.completed && self.video_path.is_none()
    }
}
