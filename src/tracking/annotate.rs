/// 帧标注 (Frame annotation)
/// 在帧图像上绘制人员框与 "working"/"not working" 标签
use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{ImageError, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::ledger::{FrameId, PixelBox};

// ========== 颜色常量 ==========

const WORKING_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const NOT_WORKING_COLOR: Rgb<u8> = Rgb([220, 0, 0]);

/// 框线宽度 (像素)
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 18.0;

/// 标注标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Working,
    NotWorking,
}

impl Activity {
    pub fn from_idle(idle: bool) -> Self {
        if idle {
            Activity::NotWorking
        } else {
            Activity::Working
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Activity::Working => "working",
            Activity::NotWorking => "not working",
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            Activity::Working => WORKING_COLOR,
            Activity::NotWorking => NOT_WORKING_COLOR,
        }
    }
}

/// 标注器
pub struct Annotator {
    out_dir: PathBuf,
    font: Option<FontVec>,
}

impl Annotator {
    /// 字体不可用时只画框
    pub fn new(out_dir: impl Into<PathBuf>, font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| {
            let loaded = fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
            match loaded {
                Ok(font) => {
                    info!(font = %path.display(), "✅ 标注字体加载成功");
                    Some(font)
                }
                Err(e) => {
                    warn!(font = %path.display(), error = %e, "font unavailable, labels disabled");
                    None
                }
            }
        });
        Self {
            out_dir: out_dir.into(),
            font,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 在图像上绘制一个框与标签
    pub fn draw(&self, image: &mut RgbImage, bbox: PixelBox, activity: Activity) {
        let color = activity.color();
        let x = bbox.x0.min(bbox.x1);
        let y = bbox.y0.min(bbox.y1);

        for inset in 0..BOX_THICKNESS {
            let w = bbox.width() as i64 - 2 * inset as i64;
            let h = bbox.height() as i64 - 2 * inset as i64;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x + inset, y + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        if let Some(font) = &self.font {
            let text_y = (y - LABEL_SCALE as i32 - 2).max(0);
            draw_text_mut(image, color, x.max(0), text_y, PxScale::from(LABEL_SCALE), font, activity.label());
        }
    }

    /// 读取帧图像, 绘制全部框, 写入 annotated/<frameId>.png
    pub fn annotate_frame(
        &self,
        frame_id: FrameId,
        image_path: &Path,
        boxes: &[(PixelBox, Activity)],
    ) -> Result<PathBuf, ImageError> {
        let mut image = image::open(image_path)?.to_rgb8();
        for &(bbox, activity) in boxes {
            self.draw(&mut image, bbox, activity);
        }
        fs::create_dir_all(&self.out_dir)?;
        let path = self.out_dir.join(format!("{frame_id}.png"));
        image.save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_color_follows_activity() {
        let annotator = Annotator::new("unused", None);
        let mut image = RgbImage::new(50, 50);
        annotator.draw(&mut image, PixelBox::new(10, 10, 30, 30), Activity::NotWorking);
        annotator.draw(&mut image, PixelBox::new(35, 35, 45, 45), Activity::Working);

        assert_eq!(*image.get_pixel(10, 10), NOT_WORKING_COLOR);
        assert_eq!(*image.get_pixel(35, 35), WORKING_COLOR);
        // 框内部不填充
        assert_eq!(*image.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_degenerate_box_is_ignored() {
        let annotator = Annotator::new("unused", None);
        let mut image = RgbImage::new(10, 10);
        annotator.draw(&mut image, PixelBox::new(5, 5, 5, 9), Activity::Working);
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_annotate_frame_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("frame.png");
        RgbImage::new(40, 40).save(&source).unwrap();

        let annotator = Annotator::new(dir.path().join("annotated"), None);
        let path = annotator
            .annotate_frame(7, &source, &[(PixelBox::new(5, 5, 20, 20), Activity::Working)])
            .unwrap();
        assert_eq!(path, dir.path().join("annotated").join("7.png"));
        assert_eq!(*image::open(&path).unwrap().to_rgb8().get_pixel(5, 5), WORKING_COLOR);
    }

    #[test]
    fn test_missing_font_disables_labels() {
        let annotator = Annotator::new("unused", Some(Path::new("/no/such/font.ttf")));
        assert!(!annotator.has_font());
        assert_eq!(Activity::from_idle(true).label(), "not working");
    }
}
