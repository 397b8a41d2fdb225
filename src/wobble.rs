use crate::motion::MotionField;
use crate::stats::RunningStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WobbleParams {
    /// 网格划分 N×N
    pub grid: usize,
    /// 方向方差权重
    pub direction_weight: f64,
    /// 失真分数 = min(100, scale × 平均 wobble)
    pub scale: f64,
    /// 相邻光流差值的标准差超过该值记为抖动帧
    pub frame_threshold: f64,
    pub max_indices: usize,
}

impl Default for WobbleParams {
    fn default() -> Self {
        Self {
            grid: 8,
            direction_weight: 10.0,
            scale: 10.0,
            frame_threshold: 0.02,
            max_indices: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WobbleReport {
    pub pair_count: usize,
    pub mean_wobble_score: f64,
    pub wobble_std: f64,
    pub max_wobble_score: f64,
    /// 0-100，越高失真越严重
    pub wobble_distortion_score: f64,
    pub wobble_frame_count: usize,
    pub wobble_frame_indices: Vec<usize>,
}

/// 第 i 个分块的 [start, end)，最后一块吸收余数
fn block_bounds(len: usize, parts: usize, i: usize) -> (usize, usize) {
    let step = len / parts;
    let start = i * step;
    let end = if i + 1 == parts { len } else { start + step };
    (start, end)
}

/// 单个光流场的网格方差分数：各块 (幅度方差 + w × 方向方差) 的均值
pub fn grid_variance_score(field: &MotionField, grid: usize, direction_weight: f64) -> Option<f64> {
    if field.is_empty() || grid == 0 {
        return None;
    }
    let rows = grid.min(field.height());
    let cols = grid.min(field.width());

    let mut blocks = RunningStats::new();
    for gy in 0..rows {
        let (y0, y1) = block_bounds(field.height(), rows, gy);
        for gx in 0..cols {
            let (x0, x1) = block_bounds(field.width(), cols, gx);

            let mut magnitude = RunningStats::new();
            let mut direction = RunningStats::new();
            for y in y0..y1 {
                for x in x0..x1 {
                    magnitude.push(field.magnitude(x, y));
                    direction.push(field.angle(x, y));
                }
            }
            blocks.push(magnitude.variance() + direction_weight * direction.variance());
        }
    }
    Some(blocks.mean())
}

/// 果冻效应/滚动快门失真分析
pub struct WobbleAnalyzer {
    params: WobbleParams,
    scores: RunningStats,
    prev_field: Option<MotionField>,
    wobble_frames: usize,
    wobble_indices: Vec<usize>,
}

impl WobbleAnalyzer {
    pub fn new(params: WobbleParams) -> Self {
        Self {
            params,
            scores: RunningStats::new(),
            prev_field: None,
            wobble_frames: 0,
            wobble_indices: Vec::new(),
        }
    }

    pub fn push(&mut self, frame_index: usize, field: MotionField) {
        let Some(score) = grid_variance_score(&field, self.params.grid, self.params.direction_weight) else {
            return;
        };
        self.scores.push(score);

        // 只保留上一对的光流场
        if let Some(diffs) = self.prev_field.as_ref().and_then(|prev| field.difference_magnitudes(prev)) {
            let jitter: RunningStats = diffs.into_iter().collect();
            if jitter.std() > self.params.frame_threshold {
                self.wobble_frames += 1;
                if self.wobble_indices.len() < self.params.max_indices {
                    self.wobble_indices.push(frame_index);
                }
            }
        }
        self.prev_field = Some(field);
    }

    pub fn finish(self) -> WobbleReport {
        if self.scores.is_empty() {
            return WobbleReport::default();
        }
        let mean = self.scores.mean();
        WobbleReport {
            pair_count: self.scores.count(),
            mean_wobble_score: mean,
            wobble_std: self.scores.std(),
            max_wobble_score: self.scores.max(),
            wobble_distortion_score: (mean * self.params.scale).min(100.0),
            wobble_frame_count: self.wobble_frames,
            wobble_frame_indices: self.wobble_indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: usize) -> MotionField {
        MotionField::from_fn(size, size, |x, y| if (x + y) % 2 == 0 { (1.0, 0.0) } else { (0.0, 0.0) })
    }

    #[test]
    fn test_block_bounds_absorb_remainder() {
        assert_eq!(block_bounds(10, 8, 0), (0, 1));
        assert_eq!(block_bounds(10, 8, 6), (6, 7));
        assert_eq!(block_bounds(10, 8, 7), (7, 10));
        assert_eq!(block_bounds(16, 8, 7), (14, 16));
    }

    #[test]
    fn test_coherent_motion_has_no_wobble() {
        let field = MotionField::from_fn(16, 16, |_, _| (2.0, 1.0));
        assert_eq!(grid_variance_score(&field, 8, 10.0), Some(0.0));
    }

    #[test]
    fn test_magnitude_variance() {
        // 每个 2x2 块内两个 0 两个 1，幅度方差 0.25，方向全为 0
        let score = grid_variance_score(&checkerboard(16), 8, 10.0).unwrap();
        assert!((score - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_direction_variance_is_weighted() {
        let field = MotionField::from_fn(16, 16, |x, _| if x % 2 == 0 { (1.0, 0.0) } else { (0.0, 1.0) });
        // 方向 0 与 π/2 各半：方差 (π/4)^2
        let expected = 10.0 * (std::f64::consts::FRAC_PI_4).powi(2);
        let score = grid_variance_score(&field, 8, 10.0).unwrap();
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_small_field_uses_fewer_blocks() {
        let field = MotionField::from_fn(3, 2, |_, _| (1.0, 1.0));
        assert_eq!(grid_variance_score(&field, 8, 10.0), Some(0.0));
        assert_eq!(grid_variance_score(&MotionField::zeros(0, 0), 8, 10.0), None);
    }

    #[test]
    fn test_analyzer_scores_and_wobble_frames() {
        let mut analyzer = WobbleAnalyzer::new(WobbleParams::default());
        analyzer.push(1, MotionField::from_fn(16, 16, |_, _| (1.0, 0.0)));
        analyzer.push(2, checkerboard(16));
        analyzer.push(3, checkerboard(16));
        let report = analyzer.finish();

        assert_eq!(report.pair_count, 3);
        let mean = 0.5 / 3.0;
        assert!((report.mean_wobble_score - mean).abs() < 1e-12);
        assert!((report.wobble_distortion_score - mean * 10.0).abs() < 1e-9);
        assert!((report.max_wobble_score - 0.25).abs() < 1e-12);
        assert_eq!(report.wobble_frame_count, 1);
        assert_eq!(report.wobble_frame_indices, vec![2]);
    }

    #[test]
    fn test_distortion_is_capped() {
        let mut analyzer = WobbleAnalyzer::new(WobbleParams::default());
        let field = MotionField::from_fn(16, 16, |x, _| if x % 2 == 0 { (5.0, 0.0) } else { (-5.0, 0.0) });
        analyzer.push(1, field);
        assert_eq!(analyzer.finish().wobble_distortion_score, 100.0);
    }
}
