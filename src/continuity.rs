use crate::stats::RunningStats;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 计算 jerk 所需的历史长度
const HISTORY_LEN: usize = 3;

/// 尖峰统计保留的 jerk 样本上限（约 8 MB）
pub const MAX_JERK_HISTORY: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuityParams {
    /// 尖峰阈值 = 均值 + sigma × 标准差
    pub spike_sigma: f64,
    pub spike_weight: f64,
    pub mean_weight: f64,
    /// 相邻帧差幅度比值偏离 1 超过该值视为运动突变
    pub discontinuity_ratio: f64,
    /// 帧差低于该值时忽略突变
    pub min_motion: f64,
    pub max_indices: usize,
    /// 保留的 jerk 样本上限，超出后均匀抽稀
    pub max_jerk_history: usize,
}

impl Default for ContinuityParams {
    fn default() -> Self {
        Self {
            spike_sigma: 2.0,
            spike_weight: 50.0,
            mean_weight: 50.0,
            discontinuity_ratio: 0.3,
            min_motion: 5.0,
            max_indices: 100,
            max_jerk_history: MAX_JERK_HISTORY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityReport {
    pub pair_count: usize,
    pub mean_motion_magnitude: f64,
    pub motion_std: f64,
    pub jerk_count: usize,
    pub mean_jerk: f64,
    pub jerk_std: f64,
    pub spike_threshold: f64,
    pub jerk_peak_ratio: f64,
    /// 0-100，越高越不连续
    pub jerkiness_score: f64,
    /// 100 - jerkiness_score
    pub continuity_score: f64,
    pub discontinuity_count: usize,
    pub discontinuity_indices: Vec<usize>,
}

/// 运动连续性分析：基于光流平均幅度的二阶差分（jerk）
pub struct MotionContinuityAnalyzer {
    params: ContinuityParams,
    history: VecDeque<f64>,
    motion: RunningStats,
    jerk_stats: RunningStats,
    /// 尖峰计数需要第二遍扫描，只保留每 `jerk_keep_every` 个样本中的一个
    jerks: Vec<f64>,
    jerk_keep_every: usize,
    prev_diff: Option<f64>,
    discontinuity_count: usize,
    discontinuity_indices: Vec<usize>,
}

impl MotionContinuityAnalyzer {
    pub fn new(params: ContinuityParams) -> Self {
        Self {
            params,
            history: VecDeque::with_capacity(HISTORY_LEN),
            motion: RunningStats::new(),
            jerk_stats: RunningStats::new(),
            jerks: Vec::new(),
            jerk_keep_every: 1,
            prev_diff: None,
            discontinuity_count: 0,
            discontinuity_indices: Vec::new(),
        }
    }

    /// 送入一对相邻帧的度量
    ///
    /// `flow_magnitude` 是光流平均幅度，`diff_magnitude` 是逐像素帧差均值。
    pub fn push(&mut self, frame_index: usize, flow_magnitude: f64, diff_magnitude: f64) {
        self.motion.push(flow_magnitude);

        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(flow_magnitude);
        if self.history.len() == HISTORY_LEN {
            let jerk = (self.history[2] - 2.0 * self.history[1] + self.history[0]).abs();
            self.retain_jerk(jerk);
        }

        if let Some(prev) = self.prev_diff {
            if prev > 0.0 && diff_magnitude > self.params.min_motion {
                let ratio = diff_magnitude / prev;
                let tolerance = self.params.discontinuity_ratio;
                if ratio > 1.0 + tolerance || ratio < 1.0 - tolerance {
                    self.discontinuity_count += 1;
                    if self.discontinuity_indices.len() < self.params.max_indices {
                        self.discontinuity_indices.push(frame_index);
                    }
                }
            }
        }
        self.prev_diff = Some(diff_magnitude);
    }

    fn retain_jerk(&mut self, jerk: f64) {
        let seen = self.jerk_stats.count();
        self.jerk_stats.push(jerk);
        if seen % self.jerk_keep_every != 0 {
            return;
        }
        if self.jerks.len() >= self.params.max_jerk_history.max(1) {
            // 已满：隔一个丢一个，步长翻倍
            let mut i = 0;
            self.jerks.retain(|_| {
                i += 1;
                i % 2 == 1
            });
            self.jerk_keep_every *= 2;
            if seen % self.jerk_keep_every != 0 {
                return;
            }
        }
        self.jerks.push(jerk);
    }

    pub fn pair_count(&self) -> usize {
        self.motion.count()
    }

    pub fn finish(self) -> ContinuityReport {
        let mean_motion = self.motion.mean();
        let mut report = ContinuityReport {
            pair_count: self.motion.count(),
            mean_motion_magnitude: mean_motion,
            motion_std: self.motion.std(),
            jerk_count: self.jerk_stats.count(),
            continuity_score: 100.0,
            discontinuity_count: self.discontinuity_count,
            discontinuity_indices: self.discontinuity_indices,
            ..ContinuityReport::default()
        };

        if self.jerks.is_empty() {
            return report;
        }

        let mean_jerk = self.jerk_stats.mean();
        let jerk_std = self.jerk_stats.std();
        let threshold = mean_jerk + self.params.spike_sigma * jerk_std;
        let peaks = self.jerks.iter().filter(|&&j| j > threshold).count();
        let peak_ratio = peaks as f64 / self.jerks.len() as f64;

        let relative = if mean_motion > 0.0 {
            self.params.mean_weight * mean_jerk / mean_motion
        } else {
            0.0
        };
        let jerkiness = (self.params.spike_weight * peak_ratio + relative).min(100.0);

        report.mean_jerk = mean_jerk;
        report.jerk_std = jerk_std;
        report.spike_threshold = threshold;
        report.jerk_peak_ratio = peak_ratio;
        report.jerkiness_score = jerkiness;
        report.continuity_score = 100.0 - jerkiness;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(flows: &[f64]) -> ContinuityReport {
        let mut analyzer = MotionContinuityAnalyzer::new(ContinuityParams::default());
        for (i, &m) in flows.iter().enumerate() {
            analyzer.push(i + 1, m, 0.0);
        }
        analyzer.finish()
    }

    #[test]
    fn test_constant_and_linear_motion_are_smooth() {
        let constant = run(&[2.0; 12]);
        assert_eq!(constant.jerk_count, 10);
        assert_eq!(constant.jerkiness_score, 0.0);
        assert_eq!(constant.continuity_score, 100.0);

        let ramp = run(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(ramp.mean_jerk.abs() < 1e-12);
        assert!(ramp.continuity_score > 99.999);
    }

    #[test]
    fn test_relative_jerk_term() {
        let report = run(&[2.0, 2.0, 2.0, 6.0, 2.0, 2.0, 2.0]);
        // jerk = [0, 4, 8, 4, 0]，没有超过均值 + 2σ 的尖峰
        assert_eq!(report.jerk_count, 5);
        assert!((report.mean_jerk - 3.2).abs() < 1e-12);
        assert_eq!(report.jerk_peak_ratio, 0.0);
        let expected = 50.0 * 3.2 / (18.0 / 7.0);
        assert!((report.jerkiness_score - expected).abs() < 1e-9);
        assert!((report.continuity_score - (100.0 - expected)).abs() < 1e-9);
    }

    #[test]
    fn test_single_spike() {
        let mut flows = vec![1.0; 20];
        flows[10] = 3.0;
        let report = run(&flows);
        assert_eq!(report.jerk_count, 18);
        assert!((report.jerk_peak_ratio - 1.0 / 18.0).abs() < 1e-12);
        let expected = 50.0 / 18.0 + 50.0 * (8.0 / 18.0) / 1.1;
        assert!((report.jerkiness_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_jerkiness_is_capped() {
        let report = run(&[0.0, 10.0, 0.0, 10.0, 0.0, 10.0]);
        assert_eq!(report.jerkiness_score, 100.0);
        assert_eq!(report.continuity_score, 0.0);
    }

    #[test]
    fn test_too_few_pairs_is_neutral() {
        let report = run(&[3.0, 5.0]);
        assert_eq!(report.pair_count, 2);
        assert_eq!(report.jerk_count, 0);
        assert_eq!(report.continuity_score, 100.0);

        let empty = run(&[]);
        assert_eq!(empty.pair_count, 0);
        assert_eq!(empty.mean_motion_magnitude, 0.0);
    }

    #[test]
    fn test_zero_motion_has_no_relative_term() {
        let report = run(&[0.0; 6]);
        assert_eq!(report.jerkiness_score, 0.0);
    }

    #[test]
    fn test_discontinuities() {
        let mut analyzer = MotionContinuityAnalyzer::new(ContinuityParams::default());
        for (i, &diff) in [10.0, 10.0, 20.0, 20.0, 2.0, 2.0].iter().enumerate() {
            analyzer.push(i + 1, 1.0, diff);
        }
        let report = analyzer.finish();
        assert_eq!(report.discontinuity_count, 1);
        assert_eq!(report.discontinuity_indices, vec![3]);
    }

    #[test]
    fn test_jerk_history_is_capped() {
        let params = ContinuityParams {
            max_jerk_history: 8,
            ..ContinuityParams::default()
        };
        let mut analyzer = MotionContinuityAnalyzer::new(params);
        // 每 10 个 jerk 中有一个尖峰
        for i in 0..102 {
            let flow = if i % 10 == 5 { 20.0 } else { 1.0 };
            analyzer.push(i + 1, flow, 0.0);
            assert!(analyzer.jerks.len() <= 8);
        }
        let retained = analyzer.jerks.len();
        let report = analyzer.finish();
        assert_eq!(report.jerk_count, 100);
        assert!(retained >= 4);
        assert!(report.jerk_peak_ratio <= 1.0);
        assert!(report.spike_threshold > 0.0);
    }

    #[test]
    fn test_uncapped_history_keeps_every_jerk() {
        let mut analyzer = MotionContinuityAnalyzer::new(ContinuityParams::default());
        for i in 0..50 {
            analyzer.push(i + 1, (i % 3) as f64, 0.0);
        }
        assert_eq!(analyzer.jerks.len(), 48);
        assert_eq!(analyzer.finish().jerk_count, 48);
    }
}
