use crate::continuity::{ContinuityParams, MotionContinuityAnalyzer};
use crate::duplicate::{DuplicateClassifier, DuplicateThresholds};
use crate::dynamics::{DynamicsAnalyzer, FrameDynamics};
use crate::error::Result;
use crate::frame_source::{FrameSample, FrameSource};
use crate::motion::{BlockMatchEstimator, MotionEstimator};
use crate::pacing::{PacingAnalyzer, PacingParams};
use crate::pairwise::{PairwiseMetrics, PairwiseSummary};
use crate::report::{AnalysisNote, AnalysisResult, VideoInfo};
use crate::score::{self, ScoreInputs};
use crate::video_decoder::FfmpegSource;
use crate::wobble::{WobbleAnalyzer, WobbleParams};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 视频质量分析配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// 近似重复帧的差异百分比阈值
    pub duplicate_threshold: f64,
    /// 近似重复帧的 SSIM 阈值
    pub ssim_threshold: f64,
    pub exact_duplicate_threshold: f64,
    pub exact_ssim_threshold: f64,
    pub duplicate_grid_width: u32,
    pub duplicate_grid_height: u32,
    /// 运动突变的相对比值阈值
    pub motion_threshold: f64,
    pub min_discontinuity_motion: f64,
    pub jerk_spike_sigma: f64,
    pub jerk_spike_weight: f64,
    pub jerk_mean_weight: f64,
    /// 抖动帧阈值（光流差值标准差）
    pub wobble_threshold: f64,
    pub wobble_grid: usize,
    pub wobble_direction_weight: f64,
    pub wobble_scale: f64,
    /// 掉帧阈值（期望间隔的比值）
    pub fps_drop_threshold: f64,
    /// 帧采样步长，1 表示每帧都分析
    pub sample_rate: usize,
    /// 批量分析的最大并发数
    pub max_workers: usize,
    pub block_size: u32,
    pub search_radius: u32,
    /// 各类序号/事件列表的最大长度
    pub max_reported_indices: usize,
    /// 是否输出每秒的帧动态统计
    pub frame_dynamics: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.98,
            ssim_threshold: 0.95,
            exact_duplicate_threshold: 0.995,
            exact_ssim_threshold: 0.99,
            duplicate_grid_width: 160,
            duplicate_grid_height: 120,
            motion_threshold: 0.3,
            min_discontinuity_motion: 5.0,
            jerk_spike_sigma: 2.0,
            jerk_spike_weight: 50.0,
            jerk_mean_weight: 50.0,
            wobble_threshold: 0.02,
            wobble_grid: 8,
            wobble_direction_weight: 10.0,
            wobble_scale: 10.0,
            fps_drop_threshold: 0.8,
            sample_rate: 1,
            max_workers: 4,
            block_size: 8,
            search_radius: 4,
            max_reported_indices: 100,
            frame_dynamics: true,
        }
    }
}

impl AnalysisConfig {
    pub fn stride(&self) -> usize {
        self.sample_rate.max(1)
    }

    pub fn duplicate_thresholds(&self) -> DuplicateThresholds {
        DuplicateThresholds {
            near_diff: self.duplicate_threshold,
            near_ssim: self.ssim_threshold,
            exact_diff: self.exact_duplicate_threshold,
            exact_ssim: self.exact_ssim_threshold,
            grid_width: self.duplicate_grid_width.max(1),
            grid_height: self.duplicate_grid_height.max(1),
            max_indices: self.max_reported_indices,
        }
    }

    pub fn continuity_params(&self) -> ContinuityParams {
        ContinuityParams {
            spike_sigma: self.jerk_spike_sigma,
            spike_weight: self.jerk_spike_weight,
            mean_weight: self.jerk_mean_weight,
            discontinuity_ratio: self.motion_threshold,
            min_motion: self.min_discontinuity_motion,
            max_indices: self.max_reported_indices,
            ..ContinuityParams::default()
        }
    }

    pub fn wobble_params(&self) -> WobbleParams {
        WobbleParams {
            grid: self.wobble_grid,
            direction_weight: self.wobble_direction_weight,
            scale: self.wobble_scale,
            frame_threshold: self.wobble_threshold,
            max_indices: self.max_reported_indices,
        }
    }

    pub fn pacing_params(&self) -> PacingParams {
        PacingParams {
            fps_drop_threshold: self.fps_drop_threshold,
            max_events: self.max_reported_indices,
        }
    }
}

/// 单视频分析器
///
/// 只持有配置和无状态的运动估计器，各分析器的滚动状态在每次分析时新建，
/// 因此同一个实例可以被多个任务同时使用。
pub struct VideoAnalyzer {
    config: AnalysisConfig,
    estimator: Box<dyn MotionEstimator>,
}

impl VideoAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        let estimator = BlockMatchEstimator::new(config.block_size, config.search_radius);
        Self::with_estimator(config, Box::new(estimator))
    }

    pub fn with_estimator(config: AnalysisConfig, estimator: Box<dyn MotionEstimator>) -> Self {
        Self { config, estimator }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// 用 FFmpeg 打开并分析视频文件
    pub fn analyze_path(&self, path: &Path) -> Result<AnalysisResult> {
        let open_start = Instant::now();
        let mut source = FfmpegSource::open(path).map_err(|e| {
            error!("❌ [质量分析] 打开视频失败: {}", e);
            e
        })?;
        debug!("✅ [质量分析] 打开视频完成，耗时: {:.2}秒", open_start.elapsed().as_secs_f64());
        self.analyze_source(path, &mut source)
    }

    /// 对任意帧源做一次顺序遍历，所有分析器在同一遍中完成
    pub fn analyze_source(&self, path: &Path, source: &mut dyn FrameSource) -> Result<AnalysisResult> {
        let total_start = Instant::now();
        let info = source.info();
        let stride = self.config.stride();

        info!("🎬 [质量分析] 开始分析视频: {}", path.display());
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("  • 分辨率: {}x{}", info.width, info.height);
        info!("  • 声明帧率: {:.2} fps", info.declared_fps);
        info!("  • 声明帧数: {} 帧", info.declared_frame_count);
        info!("  • 采样步长: {}", stride);

        let mut pacing = PacingAnalyzer::new(info.declared_fps, self.config.pacing_params());
        let mut duplicates = DuplicateClassifier::new(self.config.duplicate_thresholds());
        let mut continuity = MotionContinuityAnalyzer::new(self.config.continuity_params());
        let mut wobble = WobbleAnalyzer::new(self.config.wobble_params());
        let mut pairwise = PairwiseSummary::new();
        let mut dynamics = self.config.frame_dynamics.then(DynamicsAnalyzer::new);

        let decode_start = Instant::now();
        info!("⏳ [质量分析] 正在逐帧分析...");
        let mut prev: Option<FrameSample> = None;
        let mut position = 0usize;
        loop {
            if position % stride == 0 {
                let Some(sample) = source.next_frame()? else {
                    break;
                };
                pacing.push(sample.timestamp);
                duplicates.push(&sample);

                let metrics = prev
                    .as_ref()
                    .map(|p| PairwiseMetrics::compute(&p.gray, &sample.gray, self.estimator.as_ref()));
                if let Some(m) = &metrics {
                    pairwise.push(m);
                    continuity.push(sample.index, m.field.mean_magnitude(), m.motion_magnitude);
                }
                if let Some(d) = dynamics.as_mut() {
                    d.push(sample.timestamp, FrameDynamics::measure(&sample.gray, metrics.as_ref()));
                }
                if let Some(m) = metrics {
                    wobble.push(sample.index, m.field);
                }
                prev = Some(sample);
            } else {
                let Some(timestamp) = source.skip_frame()? else {
                    break;
                };
                pacing.push(timestamp);
            }
            position += 1;
        }
        let decode_duration = decode_start.elapsed();
        let sampled = duplicates.analyzed();
        let avg_frame_time = if sampled > 0 {
            decode_duration.as_millis() as f64 / sampled as f64
        } else {
            0.0
        };
        info!("✅ [质量分析] 逐帧分析完成，耗时: {:.2}秒", decode_duration.as_secs_f64());
        info!("  • 总帧数: {} 帧，采样帧数: {} 帧", pacing.frame_count(), sampled);
        info!("  • 平均每帧耗时: {:.2}ms", avg_frame_time);

        let mut notes = Vec::new();
        if sampled < 2 {
            warn!("⚠️  [质量分析] 采样帧不足 2 帧，帧间指标取默认值");
            notes.push(AnalysisNote::insufficient("pairwise", sampled, 2));
        }
        if continuity.pair_count() < 3 {
            warn!("⚠️  [质量分析] 帧对不足 3 个，无法计算 jerk，运动连续性取满分");
            notes.push(AnalysisNote::insufficient("continuity", continuity.pair_count(), 3));
        }
        if info.declared_fps <= 0.0 {
            warn!("⚠️  [质量分析] 视频未声明帧率，抖动百分比按 0 处理");
            notes.push(AnalysisNote::degenerate("pacing", "declared_fps = 0"));
        }

        let covered_until = pacing.covered_until();
        let video = VideoInfo {
            declared_fps: info.declared_fps,
            declared_frame_count: info.declared_frame_count,
            width: info.width,
            height: info.height,
            duration: covered_until,
            total_frames: pacing.frame_count(),
            sampled_frames: sampled,
            stride,
        };

        let pacing = pacing.finish();
        if pacing.stats.mean_fps <= 0.0 {
            notes.push(AnalysisNote::degenerate("fps_stability", "mean_fps = 0, CV 按 100% 处理"));
        }
        let continuity = continuity.finish();
        if continuity.jerk_count > 0 && continuity.mean_motion_magnitude <= 0.0 {
            notes.push(AnalysisNote::degenerate("continuity", "mean_motion = 0, 相对 jerk 项按 0 处理"));
        }
        let duplicates = duplicates.finish();
        let wobble = wobble.finish();

        info!("📊 [质量分析] 帧率: 平均 {:.2} fps，标准差 {:.2}", pacing.stats.mean_fps, pacing.stats.std_fps);
        info!("📊 [质量分析] 时间戳抖动: {:.2}%，掉帧 {} 次", pacing.jitter_percentage, pacing.fps_drop_count);
        info!(
            "📊 [质量分析] 重复帧: 完全重复 {}，近似重复 {}，总重复率 {:.2}%",
            duplicates.exact_duplicate_count,
            duplicates.near_duplicate_count,
            duplicates.total_duplicate_ratio * 100.0
        );
        info!(
            "📊 [质量分析] 运动连续性: {:.2}，运动突变 {} 次",
            continuity.continuity_score, continuity.discontinuity_count
        );
        info!(
            "📊 [质量分析] 果冻效应失真: {:.2}，抖动帧 {} 个",
            wobble.wobble_distortion_score, wobble.wobble_frame_count
        );

        let score = score::score(&ScoreInputs {
            mean_fps: pacing.stats.mean_fps,
            std_fps: pacing.stats.std_fps,
            jitter_percentage: pacing.jitter_percentage,
            total_duplicate_ratio: duplicates.total_duplicate_ratio,
            continuity_score: continuity.continuity_score,
            wobble_distortion_score: wobble.wobble_distortion_score,
            width: info.width,
            height: info.height,
        });

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("🎉 [质量分析] 分析完成！总耗时: {:.2}秒", total_start.elapsed().as_secs_f64());
        info!("  • 总分: {:.2}（{}）", score.total, score.grade);

        Ok(AnalysisResult {
            path: path.to_path_buf(),
            video,
            pacing,
            duplicates,
            continuity,
            wobble,
            pairwise: pairwise.finish(),
            dynamics: dynamics.map(|d| d.finish(covered_until)),
            score,
            notes,
        })
    }
}
