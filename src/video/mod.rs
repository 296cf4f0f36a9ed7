/// 视频输入输出 (Video I/O)
///
/// - Reader: 基于 ez-ffmpeg 的拉取式解码器,逐帧输出 RGB24
/// - Writer: 基于 ez-ffmpeg 的编码器,按序追加标注帧
/// - MediaBackend: 读写器工厂,流水线通过它打开媒体 (测试中替换为内存实现)
pub mod reader;
pub mod writer;

pub use reader::FfmpegReader;
pub use writer::FfmpegWriter;

use std::path::Path;

use crate::error::{PipelineError, Result};

/// 读取器的通道数 (RGB24)
pub const RGB_CHANNELS: u8 = 3;

/// 容器未报告帧率时的回退值
pub const DEFAULT_FPS: f64 = 30.0;

/// 视频帧 (单次循环内流转,不跨迭代保留)
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// 流内序号 (从0开始,单调递增)
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// 紧凑排列的像素数据 (width * height * channels)
    pub data: Vec<u8>,
}

impl Frame {
    /// 创建 RGB24 帧
    pub fn rgb(index: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            index,
            width,
            height,
            channels: RGB_CHANNELS,
            data,
        }
    }

    /// 纯色 RGB24 帧
    pub fn filled(index: u64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height) as usize * 3)
            .collect();
        Self::rgb(index, width, height, data)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 缓冲区长度是否与声明的形状一致
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * self.channels as usize
    }
}

/// 视频流元数据
#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// 总帧数,部分容器无法给出 (None)
    pub frame_count: Option<u64>,
    pub codec: String,
}

impl VideoMetadata {
    /// 规范化帧率: 非法值回退到 30fps
    pub fn normalize_fps(fps: f64) -> f64 {
        if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            DEFAULT_FPS
        }
    }

    /// 规范化总帧数: 0或负数视为未知
    pub fn normalize_frame_count(nb_frames: i64) -> Option<u64> {
        if nb_frames > 0 {
            Some(nb_frames as u64)
        } else {
            None
        }
    }
}

/// 拉取式帧源 (前向、不可重启)
pub trait FrameSource {
    fn metadata(&self) -> &VideoMetadata;

    /// 下一帧; `Ok(None)` 表示流结束
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// 释放解码资源
    fn close(self: Box<Self>) -> Result<()>;
}

/// 帧输出端
pub trait FrameSink {
    /// 追加一帧 (取得所有权),尺寸必须与打开时一致
    fn write(&mut self, frame: Frame) -> Result<()>;

    /// 完成封装,返回写入帧数
    fn close(self: Box<Self>) -> Result<u64>;
}

/// 媒体后端: 按路径打开读写器
pub trait MediaBackend {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn open_writer(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameSink>>;
}

/// FFmpeg 后端 (生产实现)
#[derive(Clone, Debug)]
pub struct FfmpegBackend {
    video_codec: String,
}

impl FfmpegBackend {
    pub fn new(video_codec: impl Into<String>) -> Self {
        Self {
            video_codec: video_codec.into(),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new(writer::DEFAULT_VIDEO_CODEC)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegReader::open(path)?))
    }

    fn open_writer(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegWriter::open(
            path,
            width,
            height,
            fps,
            &self.video_codec,
        )?))
    }
}

/// 校验帧形状 (写入端使用)
pub(crate) fn check_frame_shape(frame: &Frame, width: u32, height: u32) -> Result<()> {
    if frame.dimensions() != (width, height) || frame.channels != RGB_CHANNELS || !frame.is_well_formed()
    {
        return Err(PipelineError::DimensionMismatch {
            expected: (width, height),
            actual: frame.dimensions(),
        });
    }
    Ok(())
}
