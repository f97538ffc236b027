//! 贪心最近邻匹配 (Greedy nearest-box matching)
//!
//! 不使用运动模型: 候选框必须落在参考框每个坐标的 ±容差 以内,
//! 再在合格候选中取坐标距离最小者。

use crate::ledger::{PixelBox, TrackedObject};

/// 浮点比较余量
const EPSILON: f64 = 1e-9;

/// 四个坐标均在参考坐标的 ±tolerance_percent% 以内
pub fn within_tolerance(candidate: &PixelBox, reference: &PixelBox, tolerance_percent: f64) -> bool {
    candidate
        .coords()
        .iter()
        .zip(reference.coords().iter())
        .all(|(&c, &r)| {
            let window = f64::from(r).abs() * tolerance_percent / 100.0;
            (f64::from(c) - f64::from(r)).abs() <= window + EPSILON
        })
}

/// 坐标向量的均方根距离
///
/// 直接使用原始像素坐标, 不按框尺寸归一化。
pub fn distance(a: &PixelBox, b: &PixelBox) -> f64 {
    let a = a.coords();
    let b = b.coords();
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum();
    (sum / a.len() as f64).sqrt()
}

/// 在候选池中为参考框选择最佳匹配, 返回池内下标
///
/// 池按目标ID升序排列; 距离相同时保留先出现者, 即ID最小者。
pub fn best_match(reference: &PixelBox, pool: &[TrackedObject], tolerance_percent: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, object) in pool.iter().enumerate() {
        if !within_tolerance(&object.bbox, reference, tolerance_percent) {
            continue;
        }
        let d = distance(&object.bbox, reference);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((index, d)),
        }
    }
    best.map(|(index, _)| index)
}
