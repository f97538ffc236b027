/// 检测流水线 (Detection Pipeline)
///
/// 单线程顺序执行, 每次迭代:
/// - 人体检测: 取人体游标所指的帧, 检测并写入目标
/// - 动作检测: 取动作游标所指的帧, 匹配人员并更新生命周期
/// - 视频合成: 为一个空闲且已完成的人员生成视频
pub mod handle;
pub mod predictor;

pub use handle::PredictorHandle;
pub use predictor::{IterationReport, Predictor};
