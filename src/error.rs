use std::path::{Path, PathBuf};
use thiserror::Error;

/// 单个视频分析过程中的致命错误，每个变体都携带来源文件路径
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("文件不存在: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("无法读取视频: {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("解码失败: {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("分析任务异常终止: {}: {reason}", path.display())]
    Worker { path: PathBuf, reason: String },
}

impl AnalysisError {
    pub fn path(&self) -> &Path {
        match self {
            AnalysisError::NotFound { path }
            | AnalysisError::Unreadable { path, .. }
            | AnalysisError::Decode { path, .. }
            | AnalysisError::Worker { path, .. } => path,
        }
    }

    /// 错误类别，用于报告输出
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::NotFound { .. } => "not_found",
            AnalysisError::Unreadable { .. } => "unreadable",
            AnalysisError::Decode { .. } => "decode_failure",
            AnalysisError::Worker { .. } => "worker",
        }
    }

    pub(crate) fn unreadable(path: &Path, reason: impl ToString) -> Self {
        AnalysisError::Unreadable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(path: &Path, reason: impl ToString) -> Self {
        AnalysisError::Decode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
