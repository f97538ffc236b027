//! 检测器 (Detector)
//! 职责: 图片 → 检测框列表 → 过滤出人体目标

use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::types::{Detection, PERSON_CLASS_ID};
use crate::config::DetectionConfig;
use crate::error::DetectionError;
use crate::ledger::PixelBox;

/// 检测器统一接口
///
/// 输出只取决于输入图片与模型权重。
pub trait Detector: Send {
    fn detect(&mut self, image_path: &Path) -> Result<Vec<Detection>, DetectionError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image_path: &Path) -> Result<Vec<Detection>, DetectionError> {
        (**self).detect(image_path)
    }
}

/// 人体过滤器: 类别 + 置信度阈值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PersonFilter {
    pub class_id: u32,
    pub confidence_threshold: f32,
}

impl Default for PersonFilter {
    fn default() -> Self {
        Self {
            class_id: PERSON_CLASS_ID,
            confidence_threshold: 0.5,
        }
    }
}

impl From<&DetectionConfig> for PersonFilter {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            class_id: config.person_class_id,
            confidence_threshold: config.confidence_threshold,
        }
    }
}

impl PersonFilter {
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.class_id == self.class_id && detection.confidence >= self.confidence_threshold
    }

    /// 保留合格检测, 转为整数像素框
    pub fn apply(&self, detections: &[Detection]) -> Vec<PixelBox> {
        detections
            .iter()
            .filter(|d| self.accepts(d))
            .map(|d| d.bbox.to_pixels())
            .collect()
    }
}

/// 脚本化检测器: 按文件名返回预设结果 (测试/回放)
#[derive(Default, Debug, Clone)]
pub struct ScriptedDetector {
    results: HashMap<String, Vec<Detection>>,
    failures: HashSet<String>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某个文件名设定检测结果
    pub fn with(mut self, file_name: impl Into<String>, detections: Vec<Detection>) -> Self {
        self.results.insert(file_name.into(), detections);
        self
    }

    /// 让某个文件名的检测失败
    pub fn failing(mut self, file_name: impl Into<String>) -> Self {
        self.failures.insert(file_name.into());
        self
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, image_path: &Path) -> Result<Vec<Detection>, DetectionError> {
        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failures.contains(&name) {
            return Err(DetectionError::Inference(format!("scripted failure for {name}")));
        }
        Ok(self.results.get(&name).cloned().unwrap_or_default())
    }
}
