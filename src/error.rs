//! 错误类型 (Error taxonomy)
//!
//! 每个组件在自己的边界吸收错误, 只有配置/启动阶段的错误会返回给调用者。

use std::path::PathBuf;

use crate::ledger::types::{FrameId, ObjectId, PersonId};

/// 账本存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 连接/查询失败, 休眠后重试
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("ledger io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("params file is malformed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("ledger database error: {0}")]
    Database(#[source] rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    /// 数据库被其他连接锁住视为瞬时错误
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Database(e),
        }
    }
}

impl StoreError {
    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io { .. })
    }

    pub fn frame_not_found(id: FrameId) -> Self {
        StoreError::NotFound { entity: "frame", id }
    }

    pub fn object_not_found(id: ObjectId) -> Self {
        StoreError::NotFound { entity: "object", id }
    }

    pub fn person_not_found(id: PersonId) -> Self {
        StoreError::NotFound { entity: "person", id }
    }
}

/// 检测失败: 图像不可读或推理异常
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("cannot read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("inference failed: {0}")]
    Inference(String),
}

/// 采集错误
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open source {source_url}: {reason}")]
    Open { source_url: String, reason: String },

    #[error("frame not available: {0}")]
    Read(String),

    #[error("cannot encode frame: {0}")]
    Image(#[from] image::ImageError),

    #[error("capture io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 视频合成错误
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("person {0} has no renderable frames")]
    NoFrames(PersonId),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("encoder failed: {0}")]
    Encode(String),

    #[error("video io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 顶层错误
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
