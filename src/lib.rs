// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod capture; // 摄像头采集与轮换
pub mod config; // 系统配置
pub mod control; // 启停与重置
pub mod detection; // 人体检测
pub mod error; // 错误类型
pub mod input; // 帧源
pub mod ledger; // 帧/目标/人员账本
pub mod pipeline; // 检测流水线
pub mod tracking; // 游标与人员跟踪
pub mod video; // 视频合成

pub use crate::capture::CaptureSupervisor;
pub use crate::config::{Config, Paths};
pub use crate::control::Controller;
pub use crate::detection::{build_detector, Detector, ScriptedDetector};
pub use crate::error::{Error, Result};
pub use crate::ledger::{MemoryStore, ParamsFile, SqliteStore, Store};
pub use crate::pipeline::{Predictor, PredictorHandle};
pub use crate::tracking::PersonTracker;
pub use crate::video::VideoAssembler;
