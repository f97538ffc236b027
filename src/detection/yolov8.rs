// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

// YOLOv8 ONNX 检测器
// 包含: 模型加载、预处理、推理、后处理

use std::path::Path;

use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tracing::info;

use super::detector::Detector;
use super::types::{non_max_suppression, BBox, Detection};
use crate::config::DetectionConfig;
use crate::error::DetectionError;

const CXYWH_OFFSET: usize = 4;

fn inference_err(e: impl std::fmt::Display) -> DetectionError {
    DetectionError::Inference(e.to_string())
}

/// YOLOv8 检测模型
pub struct YoloV8Detector {
    session: Session,
    input_name: String,
    output_name: String,
    size: u32,
    conf: f32,
    iou: f32,
}

impl YoloV8Detector {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: &DetectionConfig) -> Result<Self, DetectionError> {
        let session = Session::builder()
            .map_err(inference_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(inference_err)?
            .commit_from_file(&config.model_path)
            .map_err(inference_err)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| DetectionError::Inference("model has no inputs".into()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| DetectionError::Inference("model has no outputs".into()))?;

        info!(
            model = %config.model_path.display(),
            input = %input_name,
            output = %output_name,
            size = config.input_size,
            "✅ 检测模型加载成功"
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            size: config.input_size,
            conf: config.confidence_threshold,
            iou: config.iou_threshold,
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32) -> (f32, f32, f32) {
        let r = (self.size as f32 / w0).min(self.size as f32 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// 等比缩放到左上角, 其余填充灰色
    fn preprocess(&self, x: &DynamicImage) -> Array<f32, IxDyn> {
        let size = self.size as usize;
        let mut ys = Array::ones((1, 3, size, size)).into_dyn();
        ys.fill(144.0 / 255.0);

        let (w0, h0) = x.dimensions();
        let (_, w_new, h_new) = self.scale_wh(w0 as f32, h0 as f32);
        let img = x.resize_exact(
            w_new as u32,
            h_new as u32,
            image::imageops::FilterType::Triangle,
        );

        for (x, y, rgb) in img.pixels() {
            let x = x as usize;
            let y = y as usize;
            let [r, g, b, _] = rgb.0;
            ys[[0, 0, y, x]] = (r as f32) / 255.0;
            ys[[0, 1, y, x]] = (g as f32) / 255.0;
            ys[[0, 2, y, x]] = (b as f32) / 255.0;
        }
        ys
    }

    /// 输出 [1, 4+nc, N] → 原图坐标检测框
    fn postprocess(
        &self,
        preds: ndarray::ArrayViewD<'_, f32>,
        width_original: f32,
        height_original: f32,
    ) -> Vec<Detection> {
        let ratio = (self.size as f32 / width_original).min(self.size as f32 / height_original);
        let mut data = Vec::new();

        for anchor in preds.axis_iter(Axis(0)) {
            for pred in anchor.axis_iter(Axis(1)) {
                let bbox = pred.slice(s![0..CXYWH_OFFSET]);
                let clss = pred.slice(s![CXYWH_OFFSET..]);

                let Some((id, &confidence)) = clss
                    .iter()
                    .enumerate()
                    .reduce(|max, x| if x.1 > max.1 { x } else { max })
                else {
                    continue;
                };

                if confidence < self.conf {
                    continue;
                }

                let cx = bbox[0] / ratio;
                let cy = bbox[1] / ratio;
                let w = bbox[2] / ratio;
                let h = bbox[3] / ratio;
                data.push(Detection::new(
                    BBox::new(
                        (cx - w / 2.).clamp(0.0, width_original),
                        (cy - h / 2.).clamp(0.0, height_original),
                        (cx + w / 2.).clamp(0.0, width_original),
                        (cy + h / 2.).clamp(0.0, height_original),
                    ),
                    id as u32,
                    confidence,
                ));
            }
        }

        non_max_suppression(&mut data, self.iou);
        data
    }
}

impl Detector for YoloV8Detector {
    fn detect(&mut self, image_path: &Path) -> Result<Vec<Detection>, DetectionError> {
        let image = image::open(image_path).map_err(|source| DetectionError::Image {
            path: image_path.to_path_buf(),
            source,
        })?;
        let (w0, h0) = image.dimensions();

        let input = self.preprocess(&image);
        let inputs = ort::inputs![self.input_name.as_str() => input.view()].map_err(inference_err)?;
        let outputs = self.session.run(inputs).map_err(inference_err)?;
        let preds = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(inference_err)?;

        Ok(self.postprocess(preds, w0 as f32, h0 as f32))
    }
}
