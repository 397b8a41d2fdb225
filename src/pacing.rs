use crate::stats::{coefficient_of_variation, median, percentile, RunningStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 时间戳取整到秒时的容差，避免 29.999999 被算到上一秒
const SECOND_EPSILON: f64 = 1e-9;
/// 最后一秒覆盖时长不足 1 秒（减去容差）时视为不完整
const COMPLETE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingParams {
    /// 帧间隔超过 期望间隔 / 该比值 记为掉帧
    pub fps_drop_threshold: f64,
    pub max_events: usize,
}

impl Default for PacingParams {
    fn default() -> Self {
        Self {
            fps_drop_threshold: 0.8,
            max_events: 100,
        }
    }
}

/// 每秒的帧数统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondBucket {
    pub second: u64,
    pub frame_count: usize,
    pub fps: f64,
    /// 该秒实际覆盖的时长（秒）
    pub duration: f64,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FpsStats {
    pub mean_fps: f64,
    pub median_fps: f64,
    pub std_fps: f64,
    pub min_fps: f64,
    pub max_fps: f64,
    /// 变异系数（百分比），均值为 0 时记为 100
    pub cv: f64,
    pub stability_score: f64,
    pub deviation_from_declared: f64,
    pub complete_seconds_count: usize,
    pub total_seconds_count: usize,
    pub last_second_fps: Option<f64>,
    pub last_second_excluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierRule {
    /// 四分位距规则
    Iqr,
    /// 均值 ± 2σ
    Sigma,
    /// 数据没有离散度，不判定异常
    #[default]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    pub rule: OutlierRule,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub seconds: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FpsDrop {
    pub frame: usize,
    pub expected_interval: f64,
    pub actual_interval: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacingReport {
    pub frame_count: usize,
    pub declared_fps: f64,
    pub effective_fps: f64,
    pub expected_delta: f64,
    pub mean_delta: f64,
    pub jitter_std: f64,
    pub jitter_max: f64,
    pub jitter_percentage: f64,
    /// 覆盖时长（最后一帧时间戳 + 一个帧间隔）
    pub duration: f64,
    pub per_second: Vec<SecondBucket>,
    pub stats: FpsStats,
    pub outliers: OutlierReport,
    pub fps_drop_count: usize,
    pub fps_drops: Vec<FpsDrop>,
}

/// 按秒分桶，floor(时间戳)
pub fn second_of(timestamp: f64) -> u64 {
    (timestamp + SECOND_EPSILON).floor().max(0.0) as u64
}

/// 根据每秒帧率序列判定异常秒
///
/// 四分位距非零时用 IQR 规则，否则退回均值 ± 2σ。
pub fn detect_outliers(series: &[(u64, f64)]) -> OutlierReport {
    if series.is_empty() {
        return OutlierReport::default();
    }
    let mut sorted: Vec<f64> = series.iter().map(|&(_, v)| v).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let iqr = q3 - q1;

    let (rule, lower, upper) = if iqr > 0.0 {
        (OutlierRule::Iqr, q1 - 1.5 * iqr, q3 + 1.5 * iqr)
    } else {
        let stats: RunningStats = sorted.iter().copied().collect();
        let std = stats.std();
        if std > 0.0 {
            (OutlierRule::Sigma, stats.mean() - 2.0 * std, stats.mean() + 2.0 * std)
        } else {
            (OutlierRule::None, stats.mean(), stats.mean())
        }
    };

    let seconds = if rule == OutlierRule::None {
        Vec::new()
    } else {
        series
            .iter()
            .filter(|&&(_, v)| v < lower || v > upper)
            .map(|&(s, _)| s)
            .collect()
    };

    OutlierReport {
        rule,
        lower_bound: lower,
        upper_bound: upper,
        seconds,
    }
}

/// 帧率与时间戳抖动分析，只需要时间戳
pub struct PacingAnalyzer {
    params: PacingParams,
    declared_fps: f64,
    frames: usize,
    last_ts: Option<f64>,
    deltas: RunningStats,
    max_deviation: f64,
    buckets: BTreeMap<u64, usize>,
    drop_count: usize,
    drops: Vec<FpsDrop>,
}

impl PacingAnalyzer {
    pub fn new(declared_fps: f64, params: PacingParams) -> Self {
        Self {
            params,
            declared_fps,
            frames: 0,
            last_ts: None,
            deltas: RunningStats::new(),
            max_deviation: 0.0,
            buckets: BTreeMap::new(),
            drop_count: 0,
            drops: Vec::new(),
        }
    }

    fn expected_delta(&self) -> f64 {
        if self.declared_fps > 0.0 {
            1.0 / self.declared_fps
        } else {
            0.0
        }
    }

    pub fn push(&mut self, timestamp: f64) {
        let expected = self.expected_delta();
        if let Some(prev) = self.last_ts {
            let delta = timestamp - prev;
            self.deltas.push(delta);
            self.max_deviation = self.max_deviation.max((delta - expected).abs());

            if expected > 0.0 && self.params.fps_drop_threshold > 0.0 && delta > expected / self.params.fps_drop_threshold {
                self.drop_count += 1;
                if self.drops.len() < self.params.max_events {
                    self.drops.push(FpsDrop {
                        frame: self.frames,
                        expected_interval: expected,
                        actual_interval: delta,
                    });
                }
            }
        }

        *self.buckets.entry(second_of(timestamp)).or_insert(0) += 1;
        self.last_ts = Some(timestamp);
        self.frames += 1;
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// 最后一帧覆盖到的时间点
    pub fn covered_until(&self) -> f64 {
        let interval = if self.declared_fps > 0.0 {
            self.expected_delta()
        } else {
            self.deltas.mean().max(0.0)
        };
        self.last_ts.map(|ts| ts + interval).unwrap_or(0.0)
    }

    pub fn finish(self) -> PacingReport {
        let expected = self.expected_delta();
        let duration = self.covered_until();

        let mean_delta = self.deltas.mean();
        let effective_fps = if self.deltas.is_empty() {
            self.declared_fps
        } else if mean_delta > 0.0 {
            1.0 / mean_delta
        } else {
            0.0
        };
        let jitter_std = self.deltas.std();
        let jitter_percentage = if expected > 0.0 { jitter_std / expected * 100.0 } else { 0.0 };

        let last_second = self.buckets.keys().next_back().copied();
        let per_second: Vec<SecondBucket> = self
            .buckets
            .iter()
            .map(|(&second, &frame_count)| {
                if Some(second) != last_second {
                    return SecondBucket {
                        second,
                        frame_count,
                        fps: frame_count as f64,
                        duration: 1.0,
                        is_complete: true,
                    };
                }
                let covered = duration - second as f64;
                let is_complete = covered >= 1.0 - COMPLETE_EPSILON;
                let fps = if is_complete || covered <= 0.0 {
                    frame_count as f64
                } else {
                    frame_count as f64 / covered
                };
                SecondBucket {
                    second,
                    frame_count,
                    fps,
                    duration: covered.clamp(0.0, 1.0),
                    is_complete,
                }
            })
            .collect();

        let complete: Vec<(u64, f64)> = per_second
            .iter()
            .filter(|b| b.is_complete)
            .map(|b| (b.second, b.fps))
            .collect();
        let stable = if complete.is_empty() {
            per_second.iter().map(|b| (b.second, b.fps)).collect()
        } else {
            complete.clone()
        };

        let stats = self.fps_stats(&per_second, &stable, complete.len());
        let outliers = detect_outliers(&stable);

        PacingReport {
            frame_count: self.frames,
            declared_fps: self.declared_fps,
            effective_fps,
            expected_delta: expected,
            mean_delta,
            jitter_std,
            jitter_max: self.max_deviation,
            jitter_percentage,
            duration,
            per_second,
            stats,
            outliers,
            fps_drop_count: self.drop_count,
            fps_drops: self.drops,
        }
    }

    fn fps_stats(&self, per_second: &[SecondBucket], stable: &[(u64, f64)], complete_count: usize) -> FpsStats {
        let last = per_second.last();
        let mut stats = FpsStats {
            complete_seconds_count: complete_count,
            total_seconds_count: per_second.len(),
            last_second_fps: last.map(|b| b.fps),
            last_second_excluded: complete_count > 0 && last.map_or(false, |b| !b.is_complete),
            cv: 100.0,
            ..FpsStats::default()
        };
        if stable.is_empty() {
            return stats;
        }

        let mut sorted: Vec<f64> = stable.iter().map(|&(_, v)| v).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let summary: RunningStats = sorted.iter().copied().collect();

        stats.mean_fps = summary.mean();
        stats.median_fps = median(&sorted);
        stats.std_fps = summary.std();
        stats.min_fps = summary.min();
        stats.max_fps = summary.max();
        stats.cv = coefficient_of_variation(stats.mean_fps, stats.std_fps);
        stats.stability_score = (100.0 - 10.0 * stats.cv).clamp(0.0, 100.0);
        stats.deviation_from_declared = stats.mean_fps - self.declared_fps;
        stats
    }
}
