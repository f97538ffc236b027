/// 采集系统 (Capture System)
///
/// - SignalTable:       进程内信号表 ("camera:<name>" → 运行/终止)
/// - CaptureWorker:     单摄像头采集循环
/// - CaptureSupervisor: 启动、轮换、停止工作线程
pub mod signal;
pub mod supervisor;
pub mod worker;

pub use signal::{CameraSignal, SignalTable, GLOBAL_KEY};
pub use supervisor::{CaptureSupervisor, SupervisorSettings};
pub use worker::{CaptureWorker, SourceFactory, WorkerExit, WorkerSettings};
