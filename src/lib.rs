pub mod analyzer;
pub mod batch;
pub mod config;
pub mod continuity;
pub mod duplicate;
pub mod dynamics;
pub mod error;
pub mod frame_source;
pub mod motion;
pub mod pacing;
pub mod pairwise;
pub mod report;
pub mod score;
pub mod stats;
pub mod video_decoder;
pub mod wobble;

pub use analyzer::{AnalysisConfig, VideoAnalyzer};
pub use batch::{find_videos, BatchOutcome, BatchRunner, FfmpegOpener, SourceOpener};
pub use config::{AppConfig, ConfigLoader, PartialConfig};
pub use error::{AnalysisError, Result};
pub use frame_source::{FrameSample, FrameSource, MemorySource, StreamInfo};
pub use motion::{BlockMatchEstimator, MotionEstimator, MotionField};
pub use report::{AnalysisNote, AnalysisResult, BatchEntry, BatchReport, VideoInfo};
pub use score::{Grade, QualityScore};
pub use video_decoder::FfmpegSource;
