use crate::motion::{MotionEstimator, MotionField};
use crate::stats::RunningStats;
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// 相邻两帧的度量结果
#[derive(Debug, Clone)]
pub struct PairwiseMetrics {
    /// 归一化互相关，1.0 表示完全相同
    pub similarity: f64,
    /// 逐像素绝对差的均值，范围 [0, 255]
    pub motion_magnitude: f64,
    /// 逐像素绝对差的标准差
    pub motion_intensity: f64,
    pub field: MotionField,
}

impl PairwiseMetrics {
    pub fn compute(prev: &GrayImage, curr: &GrayImage, estimator: &dyn MotionEstimator) -> Self {
        let diff = abs_diff_stats(prev, curr);
        Self {
            similarity: similarity(prev, curr),
            motion_magnitude: diff.mean(),
            motion_intensity: diff.std(),
            field: estimator.estimate(prev, curr),
        }
    }
}

/// 归一化互相关（去均值），范围约 [-1, 1]
///
/// 两帧都没有方差时按像素是否一致返回 1.0 或 0.0。
pub fn similarity(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return 0.0;
    }

    let n = a.as_raw().len() as f64;
    let mean_a = a.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&pa, &pb) in a.as_raw().iter().zip(b.as_raw()) {
        let da = pa as f64 - mean_a;
        let db = pb as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        return if a.as_raw() == b.as_raw() { 1.0 } else { 0.0 };
    }
    (cov / denom).clamp(-1.0, 1.0)
}

/// 逐像素绝对差的均值
pub fn motion_magnitude(a: &GrayImage, b: &GrayImage) -> f64 {
    abs_diff_stats(a, b).mean()
}

/// 逐像素绝对差的统计（均值即帧差，标准差即运动强度）
pub fn abs_diff_stats(a: &GrayImage, b: &GrayImage) -> RunningStats {
    a.as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&pa, &pb)| (pa as i32 - pb as i32).unsigned_abs() as f64)
        .collect()
}

/// 双线性下采样到固定网格
pub fn downsample(gray: &GrayImage, width: u32, height: u32) -> GrayImage {
    if gray.dimensions() == (width, height) {
        return gray.clone();
    }
    imageops::resize(gray, width, height, FilterType::Triangle)
}

/// 全片的相邻帧度量汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PairwiseReport {
    pub pair_count: usize,
    pub mean_similarity: f64,
    pub min_similarity: f64,
    pub mean_motion_magnitude: f64,
    pub max_motion_magnitude: f64,
}

#[derive(Debug, Default)]
pub struct PairwiseSummary {
    similarity: RunningStats,
    magnitude: RunningStats,
}

impl PairwiseSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: &PairwiseMetrics) {
        self.similarity.push(metrics.similarity);
        self.magnitude.push(metrics.motion_magnitude);
    }

    pub fn finish(&self) -> PairwiseReport {
        if self.similarity.is_empty() {
            return PairwiseReport::default();
        }
        PairwiseReport {
            pair_count: self.similarity.count(),
            mean_similarity: self.similarity.mean(),
            min_similarity: self.similarity.min(),
            mean_motion_magnitude: self.magnitude.mean(),
            max_motion_magnitude: self.magnitude.max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::BlockMatchEstimator;
    use image::{ImageBuffer, Luma};

    fn gradient(width: u32, height: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    #[test]
    fn test_identical_buffers() {
        let a = gradient(40, 30);
        assert!(similarity(&a, &a) >= 0.99);
        assert_eq!(motion_magnitude(&a, &a), 0.0);

        let flat: GrayImage = ImageBuffer::from_fn(16, 16, |_, _| Luma([90u8]));
        assert!(similarity(&flat, &flat) >= 0.99);
        assert_eq!(motion_magnitude(&flat, &flat), 0.0);
    }

    #[test]
    fn test_constant_offset_gives_exact_magnitude() {
        for k in [1u8, 17, 128, 255] {
            let zero: GrayImage = ImageBuffer::from_fn(20, 10, |_, _| Luma([0u8]));
            let offset: GrayImage = ImageBuffer::from_fn(20, 10, |_, _| Luma([k]));
            assert_eq!(motion_magnitude(&zero, &offset), k as f64);
        }
    }

    #[test]
    fn test_inverted_image_is_anticorrelated() {
        let a = gradient(32, 32);
        let inverted: GrayImage = ImageBuffer::from_fn(32, 32, |x, y| Luma([255 - a.get_pixel(x, y)[0]]));
        assert!(similarity(&a, &inverted) < -0.99);
    }

    #[test]
    fn test_downsample_to_grid() {
        let a = gradient(320, 240);
        let small = downsample(&a, 160, 120);
        assert_eq!(small.dimensions(), (160, 120));
    }

    #[test]
    fn test_summary() {
        let estimator = BlockMatchEstimator::default();
        let a = gradient(16, 16);
        let b: GrayImage = ImageBuffer::from_fn(16, 16, |x, y| Luma([a.get_pixel(x, y)[0].saturating_add(4)]));

        let mut summary = PairwiseSummary::new();
        summary.push(&PairwiseMetrics::compute(&a, &a, &estimator));
        summary.push(&PairwiseMetrics::compute(&a, &b, &estimator));
        let report = summary.finish();
        assert_eq!(report.pair_count, 2);
        assert_eq!(report.mean_motion_magnitude, 2.0);
        assert_eq!(report.max_motion_magnitude, 4.0);
        assert!(report.min_similarity > 0.9);
    }
}
