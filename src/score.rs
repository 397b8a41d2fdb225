use crate::stats::{coefficient_of_variation, round2};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const FPS_STABILITY_CAP: f64 = 25.0;
pub const JITTER_CAP: f64 = 15.0;
pub const DUPLICATE_CAP: f64 = 15.0;
pub const CONTINUITY_CAP: f64 = 25.0;
pub const WOBBLE_CAP: f64 = 10.0;
pub const RESOLUTION_CAP: f64 = 10.0;

/// 评级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

impl Grade {
    pub fn from_score(total: f64) -> Self {
        if total >= 90.0 {
            Grade::Excellent
        } else if total >= 80.0 {
            Grade::Good
        } else if total >= 70.0 {
            Grade::Fair
        } else if total >= 60.0 {
            Grade::Poor
        } else {
            Grade::VeryPoor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::Excellent => "优秀",
            Grade::Good => "良好",
            Grade::Fair => "一般",
            Grade::Poor => "较差",
            Grade::VeryPoor => "很差",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 评分所需的各项输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub mean_fps: f64,
    pub std_fps: f64,
    pub jitter_percentage: f64,
    /// 0-1
    pub total_duplicate_ratio: f64,
    /// 0-100
    pub continuity_score: f64,
    /// 0-100
    pub wobble_distortion_score: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub fps_stability: f64,
    pub jitter: f64,
    pub duplicate_frames: f64,
    pub motion_continuity: f64,
    pub wobble: f64,
    pub resolution: f64,
    pub total: f64,
    pub grade: Grade,
}

/// 截断到 [0, cap]，非有限值记 0 分
fn capped(value: f64, cap: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        round2(value.clamp(0.0, cap))
    }
}

/// 分辨率分档：4K=10, 1080p=8, 720p=5, 其余 3
pub fn resolution_score(width: u32, height: u32) -> f64 {
    if width >= 3840 || height >= 2160 {
        10.0
    } else if width >= 1920 || height >= 1080 {
        8.0
    } else if width >= 1280 || height >= 720 {
        5.0
    } else {
        3.0
    }
}

pub fn score(inputs: &ScoreInputs) -> QualityScore {
    let cv = coefficient_of_variation(inputs.mean_fps, inputs.std_fps);

    let fps_stability = capped(FPS_STABILITY_CAP - 0.5 * cv, FPS_STABILITY_CAP);
    let jitter = capped(JITTER_CAP - 0.3 * inputs.jitter_percentage, JITTER_CAP);
    let duplicate_frames = capped(DUPLICATE_CAP - 3.0 * (inputs.total_duplicate_ratio * 100.0), DUPLICATE_CAP);
    let motion_continuity = capped(0.25 * inputs.continuity_score, CONTINUITY_CAP);
    let wobble = capped(WOBBLE_CAP - 0.1 * inputs.wobble_distortion_score, WOBBLE_CAP);
    let resolution = resolution_score(inputs.width, inputs.height);

    let total = round2(fps_stability + jitter + duplicate_frames + motion_continuity + wobble + resolution);

    QualityScore {
        fps_stability,
        jitter,
        duplicate_frames,
        motion_continuity,
        wobble,
        resolution,
        total,
        grade: Grade::from_score(total),
    }
}
