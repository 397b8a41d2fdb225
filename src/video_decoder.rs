use crate::error::{AnalysisError, Result};
use crate::frame_source::{FrameSample, FrameSource, StreamInfo};
use ffmpeg_next as ffmpeg;
use image::GrayImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 基于 FFmpeg 的解码后端，输出灰度帧
pub struct FfmpegSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::codec::decoder::Video,
    stream_index: usize,
    time_base: f64,
    start_pts: i64,
    info: StreamInfo,
    /// 首帧到来时才知道源像素格式，延迟创建
    scaler: Option<GrayScaler>,
    packet: ffmpeg::codec::packet::Packet,
    frame: ffmpeg::util::frame::Video,
    eof_sent: bool,
    frames_read: usize,
}

struct GrayScaler {
    format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
    context: ffmpeg::software::scaling::Context,
}

fn init_ffmpeg(path: &Path) -> Result<()> {
    ffmpeg::init().map_err(|e| AnalysisError::unreadable(path, format!("初始化 FFmpeg 失败: {}", e)))?;

    // 只保留 FFmpeg 的错误日志
    unsafe {
        ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
    }
    Ok(())
}

fn rational_to_f64(rational: ffmpeg::Rational) -> Option<f64> {
    if rational.denominator() > 0 && rational.numerator() > 0 {
        Some(rational.numerator() as f64 / rational.denominator() as f64)
    } else {
        None
    }
}

impl FfmpegSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AnalysisError::NotFound {
                path: path.to_path_buf(),
            });
        }
        init_ffmpeg(path)?;

        let input = ffmpeg::format::input(&path)
            .map_err(|e| AnalysisError::unreadable(path, format!("无法打开视频文件: {}", e)))?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| AnalysisError::unreadable(path, "未找到视频流"))?;

        let stream_index = stream.index();
        let time_base = rational_to_f64(stream.time_base()).unwrap_or(0.0);
        let declared_fps = rational_to_f64(stream.avg_frame_rate())
            .or_else(|| rational_to_f64(stream.rate()))
            .unwrap_or(0.0);
        let start_pts = match stream.start_time() {
            ts if ts == ffmpeg::ffi::AV_NOPTS_VALUE => 0,
            ts => ts,
        };

        let duration = input.duration().max(0) as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
        let declared_frame_count = match stream.frames() {
            n if n > 0 => n as usize,
            _ => (duration * declared_fps).round() as usize,
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| AnalysisError::unreadable(path, format!("无法创建解码器上下文: {}", e)))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| AnalysisError::unreadable(path, format!("无法创建视频解码器: {}", e)))?;

        let info = StreamInfo {
            declared_fps,
            declared_frame_count,
            width: decoder.width(),
            height: decoder.height(),
        };

        info!(
            "🎞️  [解码] 打开 {}: {}x{}, 声明帧率 {:.3} fps, 约 {} 帧, 时长 {:.2}秒",
            path.display(),
            info.width,
            info.height,
            info.declared_fps,
            info.declared_frame_count,
            duration
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            decoder,
            stream_index,
            time_base,
            start_pts,
            info,
            scaler: None,
            packet: ffmpeg::codec::packet::Packet::empty(),
            frame: ffmpeg::util::frame::Video::empty(),
            eof_sent: false,
            frames_read: 0,
        })
    }

    /// 解码下一帧到 `self.frame`，流结束返回 false
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            match self.decoder.receive_frame(&mut self.frame) {
                Ok(()) => return Ok(true),
                Err(ffmpeg::Error::Other {
                    errno: ffmpeg::ffi::EAGAIN,
                }) => {}
                Err(ffmpeg::Error::Eof) => return Ok(false),
                Err(e) => return Err(AnalysisError::decode(&self.path, e)),
            }

            if self.eof_sent {
                return Ok(false);
            }

            let mut fed = false;
            loop {
                match self.packet.read(&mut self.input) {
                    Ok(()) => {
                        if self.packet.stream() != self.stream_index {
                            continue;
                        }
                        match self.decoder.send_packet(&self.packet) {
                            Ok(()) => {
                                fed = true;
                                break;
                            }
                            // 损坏的数据包直接跳过
                            Err(e) => debug!("⚠️  [解码] 跳过无法解码的数据包: {}: {}", self.path.display(), e),
                        }
                    }
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => return Err(AnalysisError::decode(&self.path, e)),
                }
            }

            if !fed {
                self.decoder
                    .send_eof()
                    .map_err(|e| AnalysisError::decode(&self.path, e))?;
                self.eof_sent = true;
            }
        }
    }

    fn current_timestamp(&self) -> f64 {
        match self.frame.timestamp() {
            Some(pts) if self.time_base > 0.0 => (pts - self.start_pts) as f64 * self.time_base,
            _ if self.info.declared_fps > 0.0 => self.frames_read as f64 / self.info.declared_fps,
            _ => 0.0,
        }
    }

    fn current_gray(&mut self) -> Result<GrayImage> {
        let format = self.frame.format();
        let width = self.frame.width();
        let height = self.frame.height();

        let reusable = matches!(
            &self.scaler,
            Some(s) if s.format == format && s.width == width && s.height == height
        );
        if !reusable {
            let context = ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::GRAY8,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| AnalysisError::decode(&self.path, format!("无法创建缩放器: {}", e)))?;
            self.scaler = Some(GrayScaler {
                format,
                width,
                height,
                context,
            });
        }

        let path = &self.path;
        let mut gray = ffmpeg::util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .context
                .run(&self.frame, &mut gray)
                .map_err(|e| AnalysisError::decode(path, e))?;
        }

        let w = gray.width() as usize;
        let h = gray.height() as usize;
        let stride = gray.stride(0);
        let data = gray.data(0);
        let mut buf = Vec::with_capacity(w * h);
        for y in 0..h {
            let row = y * stride;
            buf.extend_from_slice(&data[row..row + w]);
        }

        GrayImage::from_raw(w as u32, h as u32, buf)
            .ok_or_else(|| AnalysisError::decode(path, "灰度帧尺寸不匹配"))
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<FrameSample>> {
        if !self.decode_next()? {
            return Ok(None);
        }
        let timestamp = self.current_timestamp();
        let gray = self.current_gray()?;
        let index = self.frames_read;
        self.frames_read += 1;
        Ok(Some(FrameSample {
            index,
            timestamp,
            gray,
        }))
    }

    fn skip_frame(&mut self) -> Result<Option<f64>> {
        // 参考帧仍需解码，这里只省掉像素转换和拷贝
        if !self.decode_next()? {
            return Ok(None);
        }
        let timestamp = self.current_timestamp();
        self.frames_read += 1;
        Ok(Some(timestamp))
    }
}
