//! 采集信号表
//!
//! 进程内共享的键值表, 键为 `camera:<name>` 或全局键, 值为运行/终止。
//! 每个键只有一个写者 (监督线程), 工作线程只读自己的键。

use crossbeam_skiplist::SkipMap;

/// 全局终止键
pub const GLOBAL_KEY: &str = "global";

/// 信号值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraSignal {
    /// 运行中, 附带工作线程代数ID
    Running { generation: u64 },
    Terminate,
}

/// 信号表
#[derive(Default)]
pub struct SignalTable {
    entries: SkipMap<String, CameraSignal>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera_key(camera: &str) -> String {
        format!("camera:{camera}")
    }

    pub fn get(&self, key: &str) -> Option<CameraSignal> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    pub fn set(&self, key: &str, signal: CameraSignal) {
        self.entries.insert(key.to_string(), signal);
    }

    pub fn set_running(&self, camera: &str, generation: u64) {
        self.set(&Self::camera_key(camera), CameraSignal::Running { generation });
    }

    pub fn terminate(&self, camera: &str) {
        self.set(&Self::camera_key(camera), CameraSignal::Terminate);
    }

    /// 工作线程是否仍是该摄像头的当前代
    pub fn is_current(&self, camera: &str, generation: u64) -> bool {
        self.get(&Self::camera_key(camera)) == Some(CameraSignal::Running { generation })
    }

    pub fn start_global(&self) {
        self.set(GLOBAL_KEY, CameraSignal::Running { generation: 0 });
    }

    pub fn terminate_global(&self) {
        self.set(GLOBAL_KEY, CameraSignal::Terminate);
    }

    pub fn global_terminated(&self) -> bool {
        self.get(GLOBAL_KEY) == Some(CameraSignal::Terminate)
    }

    /// 当前所有键值 (调试/巡检)
    pub fn snapshot(&self) -> Vec<(String, CameraSignal)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_generation_is_not_current() {
        let table = SignalTable::new();
        table.set_running("door", 1);
        assert!(table.is_current("door", 1));

        table.set_running("door", 2);
        assert!(!table.is_current("door", 1));
        assert!(table.is_current("door", 2));

        table.terminate("door");
        assert!(!table.is_current("door", 2));
        assert_eq!(table.get("camera:door"), Some(CameraSignal::Terminate));
    }

    #[test]
    fn test_global_key() {
        let table = SignalTable::new();
        assert!(!table.global_terminated());
        table.start_global();
        assert!(!table.global_terminated());
        table.terminate_global();
        assert!(table.global_terminated());
    }

    #[test]
    fn test_unknown_camera_is_not_current() {
        let table = SignalTable::new();
        assert!(!table.is_current("ghost", 0));
        assert!(table.snapshot().is_empty());
    }
}
