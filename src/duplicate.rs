use crate::frame_source::FrameSample;
use crate::pairwise::downsample;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// 重复帧判定阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateThresholds {
    /// 近似重复：差异百分比下限
    pub near_diff: f64,
    /// 近似重复：SSIM 下限
    pub near_ssim: f64,
    pub exact_diff: f64,
    pub exact_ssim: f64,
    pub grid_width: u32,
    pub grid_height: u32,
    /// 最多记录多少个完全重复帧的序号
    pub max_indices: usize,
}

impl Default for DuplicateThresholds {
    fn default() -> Self {
        Self {
            near_diff: 0.98,
            near_ssim: 0.95,
            exact_diff: 0.995,
            exact_ssim: 0.99,
            grid_width: 160,
            grid_height: 120,
            max_indices: 100,
        }
    }
}

impl DuplicateThresholds {
    pub fn classify(&self, diff_pct: f64, ssim: f64) -> FrameKind {
        if diff_pct >= self.exact_diff || ssim >= self.exact_ssim {
            FrameKind::ExactDuplicate
        } else if diff_pct >= self.near_diff || ssim >= self.near_ssim {
            FrameKind::NearDuplicate
        } else {
            FrameKind::Distinct
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Distinct,
    NearDuplicate,
    ExactDuplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameClassification {
    pub index: usize,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub analyzed_frames: usize,
    pub exact_duplicate_count: usize,
    pub near_duplicate_count: usize,
    pub distinct_count: usize,
    pub duplicate_ratio: f64,
    pub near_duplicate_ratio: f64,
    pub total_duplicate_ratio: f64,
    pub distinct_ratio: f64,
    pub exact_duplicate_indices: Vec<usize>,
    pub classifications: Vec<FrameClassification>,
}

/// 简化 SSIM：只用全局均值、方差和协方差
pub fn simple_ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    const C1: f64 = 0.01 * 0.01;
    const C2: f64 = 0.03 * 0.03;

    let n = a.as_raw().len().min(b.as_raw().len());
    if n == 0 {
        return 0.0;
    }
    let pixels = || a.as_raw().iter().zip(b.as_raw()).map(|(&x, &y)| (x as f64, y as f64));

    let (sum1, sum2) = pixels().fold((0.0, 0.0), |(s1, s2), (x, y)| (s1 + x, s2 + y));
    let mu1 = sum1 / n as f64;
    let mu2 = sum2 / n as f64;

    let (mut var1, mut var2, mut cov) = (0.0, 0.0, 0.0);
    for (x, y) in pixels() {
        let d1 = x - mu1;
        let d2 = y - mu2;
        var1 += d1 * d1;
        var2 += d2 * d2;
        cov += d1 * d2;
    }
    let var1 = var1 / n as f64;
    let var2 = var2 / n as f64;
    let cov = cov / n as f64;

    ((2.0 * mu1 * mu2 + C1) * (2.0 * cov + C2)) / ((mu1 * mu1 + mu2 * mu2 + C1) * (var1 + var2 + C2))
}

/// 差异百分比：1 - mean(|A-B|) / 255，1.0 表示完全一致
pub fn diff_percentage(a: &GrayImage, b: &GrayImage) -> f64 {
    let n = a.as_raw().len().min(b.as_raw().len());
    if n == 0 {
        return 0.0;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs() as u64)
        .sum();
    1.0 - total as f64 / n as f64 / 255.0
}

/// 重复帧分类器，只保留上一帧的下采样网格
pub struct DuplicateClassifier {
    thresholds: DuplicateThresholds,
    prev_small: Option<GrayImage>,
    analyzed: usize,
    exact: usize,
    near: usize,
    exact_indices: Vec<usize>,
    classifications: Vec<FrameClassification>,
}

impl DuplicateClassifier {
    pub fn new(thresholds: DuplicateThresholds) -> Self {
        Self {
            thresholds,
            prev_small: None,
            analyzed: 0,
            exact: 0,
            near: 0,
            exact_indices: Vec::new(),
            classifications: Vec::new(),
        }
    }

    /// 送入一帧采样，第一帧之后返回该帧的分类
    pub fn push(&mut self, sample: &FrameSample) -> Option<FrameKind> {
        self.analyzed += 1;
        let small = downsample(&sample.gray, self.thresholds.grid_width, self.thresholds.grid_height);

        let kind = self.prev_small.as_ref().map(|prev| {
            let diff_pct = diff_percentage(&small, prev);
            let ssim = simple_ssim(&small, prev);
            self.thresholds.classify(diff_pct, ssim)
        });

        if let Some(kind) = kind {
            match kind {
                FrameKind::ExactDuplicate => {
                    self.exact += 1;
                    if self.exact_indices.len() < self.thresholds.max_indices {
                        self.exact_indices.push(sample.index);
                    }
                }
                FrameKind::NearDuplicate => self.near += 1,
                FrameKind::Distinct => {}
            }
            self.classifications.push(FrameClassification {
                index: sample.index,
                kind,
            });
        }

        self.prev_small = Some(small);
        kind
    }

    pub fn analyzed(&self) -> usize {
        self.analyzed
    }

    pub fn finish(self) -> DuplicateReport {
        let ratio = |count: usize| {
            if self.analyzed > 0 {
                count as f64 / self.analyzed as f64
            } else {
                0.0
            }
        };
        let distinct = self.classifications.len() - self.exact - self.near;
        DuplicateReport {
            analyzed_frames: self.analyzed,
            exact_duplicate_count: self.exact,
            near_duplicate_count: self.near,
            distinct_count: distinct,
            duplicate_ratio: ratio(self.exact),
            near_duplicate_ratio: ratio(self.near),
            total_duplicate_ratio: ratio(self.exact + self.near),
            distinct_ratio: ratio(distinct),
            exact_duplicate_indices: self.exact_indices,
            classifications: self.classifications,
        }
    }
}
