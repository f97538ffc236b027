//! 抽帧器: 源帧率 f, 目标帧率 r → 每 floor(f/r) 帧保留 1 帧

/// 时间抽帧器
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decimator {
    step: u64,
    seen: u64,
}

impl Decimator {
    pub fn new(source_fps: f64, target_fps: f64) -> Self {
        let ratio = if target_fps > 0.0 {
            (source_fps / target_fps).floor()
        } else {
            1.0
        };
        // 目标帧率高于源帧率时逐帧保留
        let step = if ratio.is_finite() && ratio >= 1.0 {
            ratio as u64
        } else {
            1
        };
        Self { step, seen: 0 }
    }

    /// 从第 seen 帧继续计数 (源从中途恢复时保持抽帧相位)
    pub fn starting_at(mut self, seen: u64) -> Self {
        self.seen = seen;
        self
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// 记录读到一帧, 返回是否保留
    pub fn accept(&mut self) -> bool {
        let keep = self.seen % self.step == 0;
        self.seen += 1;
        keep
    }
}
