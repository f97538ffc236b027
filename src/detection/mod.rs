/// 检测系统 (Detection System)
///
/// 流水线的人体检测阶段所用的外部能力
/// - Detector:     图片 → (边界框, 类别, 置信度)
/// - PersonFilter: 人体类别 + 置信度阈值过滤
/// - YoloV8Detector: ONNX 推理实现 (onnx 功能)
pub mod detector;
pub mod types;
#[cfg(feature = "onnx")]
pub mod yolov8;

pub use detector::{Detector, PersonFilter, ScriptedDetector};
pub use types::{non_max_suppression, BBox, Detection};
#[cfg(feature = "onnx")]
pub use yolov8::YoloV8Detector;

use crate::config::DetectionConfig;
use crate::error::DetectionError;

/// 按配置加载推理检测器
pub fn build_detector(config: &DetectionConfig) -> Result<Box<dyn Detector>, DetectionError> {
    #[cfg(feature = "onnx")]
    {
        Ok(Box::new(YoloV8Detector::new(config)?))
    }
    #[cfg(not(feature = "onnx"))]
    {
        Err(DetectionError::Inference(format!(
            "cannot load {}: built without the `onnx` feature",
            config.model_path.display()
        )))
    }
}
