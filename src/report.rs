use crate::batch::BatchOutcome;
use crate::continuity::ContinuityReport;
use crate::duplicate::DuplicateReport;
use crate::dynamics::DynamicsReport;
use crate::pacing::PacingReport;
use crate::pairwise::PairwiseReport;
use crate::score::{Grade, QualityScore};
use crate::stats::round2;
use crate::wobble::WobbleReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 视频基础信息
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub declared_fps: f64,
    pub declared_frame_count: usize,
    pub width: u32,
    pub height: u32,
    /// 实际覆盖时长（秒）
    pub duration: f64,
    /// 读取到的总帧数（含跳过的帧）
    pub total_frames: usize,
    /// 生成像素数据的采样帧数
    pub sampled_frames: usize,
    pub stride: usize,
}

/// 非致命的分析提示：对应分项取中性值，不影响出分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisNote {
    /// 帧数不足以完成某项分析
    InsufficientFrames {
        component: String,
        available: usize,
        required: usize,
    },
    /// 比值的分母为 0，已用安全默认值替代
    DegenerateStatistics { component: String, detail: String },
}

impl AnalysisNote {
    pub(crate) fn insufficient(component: &str, available: usize, required: usize) -> Self {
        AnalysisNote::InsufficientFrames {
            component: component.to_string(),
            available,
            required,
        }
    }

    pub(crate) fn degenerate(component: &str, detail: impl Into<String>) -> Self {
        AnalysisNote::DegenerateStatistics {
            component: component.to_string(),
            detail: detail.into(),
        }
    }
}

/// 单个视频的完整分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub path: PathBuf,
    pub video: VideoInfo,
    pub pacing: PacingReport,
    pub duplicates: DuplicateReport,
    pub continuity: ContinuityReport,
    pub wobble: WobbleReport,
    pub pairwise: PairwiseReport,
    /// 关闭帧动态分析时为 None
    pub dynamics: Option<DynamicsReport>,
    pub score: QualityScore,
    pub notes: Vec<AnalysisNote>,
}

/// 批量报告中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    Success {
        path: PathBuf,
        total_score: f64,
        grade: Grade,
        result: Box<AnalysisResult>,
    },
    Error {
        path: PathBuf,
        kind: String,
        message: String,
    },
}

impl BatchEntry {
    pub fn path(&self) -> &Path {
        match self {
            BatchEntry::Success { path, .. } | BatchEntry::Error { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// RFC 3339
    pub generated_at: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 成功视频的平均总分
    pub mean_score: Option<f64>,
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<BatchOutcome>) -> Self {
        let total = outcomes.len();
        let entries: Vec<BatchEntry> = outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(result) => BatchEntry::Success {
                    path: outcome.path,
                    total_score: result.score.total,
                    grade: result.score.grade,
                    result: Box::new(result),
                },
                Err(e) => BatchEntry::Error {
                    path: outcome.path,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                },
            })
            .collect();

        let scores: Vec<f64> = entries
            .iter()
            .filter_map(|e| match e {
                BatchEntry::Success { total_score, .. } => Some(*total_score),
                BatchEntry::Error { .. } => None,
            })
            .collect();
        let mean_score = if scores.is_empty() {
            None
        } else {
            Some(round2(scores.iter().sum::<f64>() / scores.len() as f64))
        };

        BatchReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            total,
            succeeded: scores.len(),
            failed: total - scores.len(),
            mean_score,
            entries,
        }
    }
}
