use crate::pacing::second_of;
use crate::pairwise::PairwiseMetrics;
use crate::stats::{MetricStats, RunningStats};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const COMPLETE_EPSILON: f64 = 1e-6;

/// 单帧的亮度/对比度与帧间变化
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameDynamics {
    pub brightness: f64,
    pub contrast: f64,
    pub frame_diff: f64,
    pub motion_intensity: f64,
}

impl FrameDynamics {
    /// `pair` 为与上一采样帧的度量，首帧为 None
    pub fn measure(gray: &GrayImage, pair: Option<&PairwiseMetrics>) -> Self {
        let (brightness, contrast) = brightness_contrast(gray);
        Self {
            brightness,
            contrast,
            frame_diff: pair.map_or(0.0, |p| p.motion_magnitude),
            motion_intensity: pair.map_or(0.0, |p| p.motion_intensity),
        }
    }
}

/// 灰度均值与标准差
pub fn brightness_contrast(gray: &GrayImage) -> (f64, f64) {
    let raw = gray.as_raw();
    if raw.is_empty() {
        return (0.0, 0.0);
    }
    let (sum, sum_sq) = raw.iter().fold((0u64, 0u64), |(s, sq), &v| {
        let v = v as u64;
        (s + v, sq + v * v)
    });
    let n = raw.len() as f64;
    let mean = sum as f64 / n;
    let variance = (sum_sq as f64 / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicsSummary {
    pub brightness: MetricStats,
    pub contrast: MetricStats,
    pub frame_diff: MetricStats,
    pub motion_intensity: MetricStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicsBucket {
    pub second: u64,
    pub frame_count: usize,
    pub is_complete: bool,
    #[serde(flatten)]
    pub metrics: DynamicsSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicsReport {
    pub analyzed_frames: usize,
    pub per_second: Vec<DynamicsBucket>,
    pub overall: DynamicsSummary,
}

#[derive(Debug, Clone, Copy, Default)]
struct MetricSet {
    brightness: RunningStats,
    contrast: RunningStats,
    frame_diff: RunningStats,
    motion_intensity: RunningStats,
}

impl MetricSet {
    fn push(&mut self, d: &FrameDynamics) {
        self.brightness.push(d.brightness);
        self.contrast.push(d.contrast);
        self.frame_diff.push(d.frame_diff);
        self.motion_intensity.push(d.motion_intensity);
    }

    fn summary(&self) -> DynamicsSummary {
        DynamicsSummary {
            brightness: self.brightness.summary(),
            contrast: self.contrast.summary(),
            frame_diff: self.frame_diff.summary(),
            motion_intensity: self.motion_intensity.summary(),
        }
    }
}

/// 帧动态分析：按秒聚合采样帧的亮度、对比度和帧间变化
#[derive(Debug, Default)]
pub struct DynamicsAnalyzer {
    overall: MetricSet,
    seconds: BTreeMap<u64, MetricSet>,
}

impl DynamicsAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, timestamp: f64, dynamics: FrameDynamics) {
        self.overall.push(&dynamics);
        self.seconds.entry(second_of(timestamp)).or_default().push(&dynamics);
    }

    /// `covered_until` 为视频覆盖到的时间点，用于判断最后一秒是否完整
    pub fn finish(self, covered_until: f64) -> DynamicsReport {
        let last_second = self.seconds.keys().next_back().copied();
        let per_second = self
            .seconds
            .iter()
            .map(|(&second, set)| DynamicsBucket {
                second,
                frame_count: set.brightness.count(),
                is_complete: Some(second) != last_second
                    || covered_until - second as f64 >= 1.0 - COMPLETE_EPSILON,
                metrics: set.summary(),
            })
            .collect();

        DynamicsReport {
            analyzed_frames: self.overall.brightness.count(),
            per_second,
            overall: self.overall.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn test_brightness_contrast() {
        let half: GrayImage = ImageBuffer::from_fn(4, 2, |x, _| Luma([if x < 2 { 0u8 } else { 200 }]));
        let (b, c) = brightness_contrast(&half);
        assert_eq!(b, 100.0);
        assert_eq!(c, 100.0);
        assert_eq!(brightness_contrast(&GrayImage::new(0, 0)), (0.0, 0.0));
    }

    #[test]
    fn test_strided_buckets_sum_to_sampled_frames() {
        // 30 fps、100 帧、步长 3：采样 34 帧
        let fps = 30.0;
        let mut analyzer = DynamicsAnalyzer::new();
        let mut sampled = 0;
        for i in (0..100).step_by(3) {
            analyzer.push(i as f64 / fps, FrameDynamics::default());
            sampled += 1;
        }
        let report = analyzer.finish(100.0 / fps);
        assert_eq!(report.analyzed_frames, sampled);
        assert_eq!(report.per_second.iter().map(|b| b.frame_count).sum::<usize>(), sampled);
        assert_eq!(report.per_second.len(), 4);
        assert!(report.per_second[..3].iter().all(|b| b.is_complete));
        assert!(!report.per_second[3].is_complete);
    }

    #[test]
    fn test_per_second_aggregation() {
        let mut analyzer = DynamicsAnalyzer::new();
        for (ts, brightness) in [(0.0, 10.0), (0.5, 30.0), (1.0, 50.0), (1.5, 70.0)] {
            analyzer.push(
                ts,
                FrameDynamics {
                    brightness,
                    ..FrameDynamics::default()
                },
            );
        }
        let report = analyzer.finish(2.0);
        assert_eq!(report.per_second.len(), 2);
        assert_eq!(report.per_second[0].metrics.brightness.mean, 20.0);
        assert_eq!(report.per_second[1].metrics.brightness.max, 70.0);
        assert!(report.per_second[1].is_complete);
        assert_eq!(report.overall.brightness.mean, 40.0);
        assert_eq!(report.overall.brightness.min, 10.0);
    }
}
