//! 参数检查点 - 通过JSON文件保存参考时间与游标

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::FrameId;
use crate::error::StoreError;

/// 持久化参数
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// 帧时间戳的参考时间 (Unix 毫秒)
    pub timestamp_ref_ms: Option<i64>,
    /// 人体检测游标
    pub person_cursor: Option<FrameId>,
    /// 动作检测游标
    pub action_cursor: Option<FrameId>,
}

/// 参数文件 (进程内共享, 写入即落盘)
pub struct ParamsFile {
    path: PathBuf,
    params: Mutex<Params>,
}

impl ParamsFile {
    /// 从JSON文件加载参数, 文件缺失或损坏时从空参数开始
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let params = read_params(&path).unwrap_or_default();
        Self {
            path,
            params: Mutex::new(params),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前参数快照
    pub fn get(&self) -> Params {
        match self.params.lock() {
            Ok(params) => params.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 修改参数并写回文件
    ///
    /// 采集与预测可能是两个进程, 修改前先读入文件中的最新内容。
    pub fn update<T>(&self, f: impl FnOnce(&mut Params) -> T) -> Result<T, StoreError> {
        let mut params = self
            .params
            .lock()
            .map_err(|_| StoreError::Unavailable("params lock poisoned".into()))?;
        if let Some(on_disk) = read_params(&self.path) {
            *params = on_disk;
        }
        let out = f(&mut params);

        let json = serde_json::to_string_pretty(&*params)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(out)
    }

    /// 参考时间, 首次调用时以当前时间创建
    pub fn timestamp_ref_ms(&self) -> Result<i64, StoreError> {
        self.update(|p| {
            *p.timestamp_ref_ms
                .get_or_insert_with(|| chrono::Utc::now().timestamp_millis())
        })
    }

    /// 清空全部参数 (流水线重置)
    pub fn clear(&self) -> Result<(), StoreError> {
        self.update(|p| *p = Params::default())
    }
}

/// 读取参数文件; 缺失或损坏时返回 None
fn read_params(path: &Path) -> Option<Params> {
    let json = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&json) {
        Ok(params) => {
            debug!(path = %path.display(), "params loaded");
            Some(params)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "params file malformed, ignoring");
            None
        }
    }
}
