use crate::error::Result;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 一帧采样：帧序号、时间戳（秒）与灰度像素
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub index: usize,
    pub timestamp: f64,
    pub gray: GrayImage,
}

/// 视频流的声明信息
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub declared_fps: f64,
    pub declared_frame_count: usize,
    pub width: u32,
    pub height: u32,
}

/// 解码后端：按顺序产出帧
///
/// `skip_frame` 只前进一帧并返回时间戳，不生成像素数据，
/// 抖动分析依赖它拿到每一帧的真实时间。
pub trait FrameSource {
    fn info(&self) -> StreamInfo;

    /// 解码下一帧，流结束时返回 `None`
    fn next_frame(&mut self) -> Result<Option<FrameSample>>;

    /// 跳过下一帧，仅返回其时间戳
    fn skip_frame(&mut self) -> Result<Option<f64>>;
}

/// 内存中的帧序列，用于合成视频或已经解码好的帧
pub struct MemorySource {
    info: StreamInfo,
    frames: VecDeque<(f64, GrayImage)>,
    next_index: usize,
}

impl MemorySource {
    pub fn new(info: StreamInfo, frames: Vec<(f64, GrayImage)>) -> Self {
        Self {
            info,
            frames: frames.into(),
            next_index: 0,
        }
    }

    /// 按恒定帧率生成时间戳（第 i 帧 = i / fps）
    pub fn constant_rate(fps: f64, frames: Vec<GrayImage>) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        let info = StreamInfo {
            declared_fps: fps,
            declared_frame_count: frames.len(),
            width,
            height,
        };
        let timed = frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let ts = if fps > 0.0 { i as f64 / fps } else { 0.0 };
                (ts, frame)
            })
            .collect();
        Self::new(info, timed)
    }

    /// 覆盖声明分辨率（像素缓冲区保持不变）
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.info.width = width;
        self.info.height = height;
        self
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<FrameSample>> {
        Ok(self.frames.pop_front().map(|(timestamp, gray)| {
            let index = self.next_index;
            self.next_index += 1;
            FrameSample {
                index,
                timestamp,
                gray,
            }
        }))
    }

    fn skip_frame(&mut self) -> Result<Option<f64>> {
        Ok(self.frames.pop_front().map(|(timestamp, _)| {
            self.next_index += 1;
            timestamp
        }))
    }
}
