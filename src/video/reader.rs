/// 视频读取器 (Video Stream Reader)
///
/// 解码线程: FFmpeg 解码 → format=rgb24 滤镜 → RgbCaptureFilter → 有界通道
/// 调用方线程: next_frame() 从通道逐帧拉取
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame as AvFrame, Input};
use tracing::{debug, info, warn};

use super::{Frame, FrameSource, VideoMetadata};
use crate::error::{PipelineError, Result};

/// 解码队列深度 (解码线程最多领先读取方的帧数)
const FRAME_QUEUE_DEPTH: usize = 8;

/// 解码线程 → 读取方
enum DecodeEvent {
    Frame(Frame),
    End,
    Failed(String),
}

/// FFmpeg 帧过滤器: 拷贝 RGB24 平面并送入通道
#[derive(Clone)]
struct RgbCaptureFilter {
    tx: Sender<DecodeEvent>,
    decoded: u64,
}

impl RgbCaptureFilter {
    fn new(tx: Sender<DecodeEvent>) -> Self {
        Self { tx, decoded: 0 }
    }
}

impl FrameFilter for RgbCaptureFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        let (width, height, data) = match unsafe { copy_rgb24(&frame) } {
            Some(plane) => plane,
            None => {
                let reason = format!("第{}帧无法转换为RGB24", self.decoded);
                let _ = self.tx.send(DecodeEvent::Failed(reason.clone()));
                return Err(reason);
            }
        };

        // 序号由读取方按拉取顺序分配
        let decoded = Frame::rgb(self.decoded, width, height, data);
        self.decoded += 1;

        self.tx
            .send(DecodeEvent::Frame(decoded))
            .map_err(|_| "读取器已关闭".to_string())?;

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!("✅ 解码线程退出 (共{}帧)", self.decoded);
    }
}

/// 拷贝 RGB24 打包平面 (去除行填充)
///
/// # Safety
/// `frame` 必须是已解码且像素格式为 rgb24 的视频帧
unsafe fn copy_rgb24(frame: &AvFrame) -> Option<(u32, u32, Vec<u8>)> {
    if frame.as_ptr().is_null() || frame.is_empty() {
        return None;
    }

    let raw = &*frame.as_ptr();
    let width = raw.width as usize;
    let height = raw.height as usize;
    let plane = raw.data[0];
    let stride = raw.linesize[0];

    if width == 0 || height == 0 || plane.is_null() || stride <= 0 {
        return None;
    }

    let stride = stride as usize;
    let row_bytes = width * 3;
    if stride < row_bytes {
        return None;
    }

    let mut data = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
        let row = std::slice::from_raw_parts(plane.add(y * stride), row_bytes);
        data.extend_from_slice(row);
    }

    Some((width as u32, height as u32, data))
}

/// 解码线程主体
fn run_decoder(url: String, tx: Sender<DecodeEvent>) {
    let filter = RgbCaptureFilter::new(tx.clone());

    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("rgb-capture", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let result = FfmpegContext::builder()
        .input(Input::new(url.as_str()))
        .filter_descs(["format=rgb24"].into())
        .output(out)
        .build()
        .map_err(|e| format!("构建失败: {}", e))
        .and_then(|ctx| ctx.start().map_err(|e| format!("启动失败: {}", e)))
        .and_then(|sch| sch.wait().map_err(|e| format!("解码失败: {}", e)));

    let event = match result {
        Ok(()) => DecodeEvent::End,
        Err(reason) => DecodeEvent::Failed(reason),
    };

    // 读取方提前关闭时发送失败,忽略即可
    let _ = tx.send(event);
}

/// FFmpeg 视频读取器
pub struct FfmpegReader {
    metadata: VideoMetadata,
    rx: Option<Receiver<DecodeEvent>>,
    worker: Option<JoinHandle<()>>,
    frames_read: u64,
    finished: bool,
}

impl FfmpegReader {
    /// 打开视频文件并启动解码线程
    pub fn open(path: &Path) -> Result<Self> {
        let url = path.to_string_lossy().to_string();

        let info = find_video_stream_info(url.clone())
            .map_err(|e| PipelineError::UnreadableMedia(format!("{}: {}", path.display(), e)))?
            .ok_or_else(|| {
                PipelineError::UnreadableMedia(format!("{}: 没有视频流", path.display()))
            })?;

        let metadata = match info {
            StreamInfo::Video {
                width,
                height,
                fps,
                nb_frames,
                codec_name,
                ..
            } => {
                if width <= 0 || height <= 0 {
                    return Err(PipelineError::UnreadableMedia(format!(
                        "{}: 非法分辨率 {}x{}",
                        path.display(),
                        width,
                        height
                    )));
                }
                VideoMetadata {
                    width: width as u32,
                    height: height as u32,
                    fps: VideoMetadata::normalize_fps(fps),
                    frame_count: VideoMetadata::normalize_frame_count(nb_frames),
                    codec: codec_name,
                }
            }
            _ => {
                return Err(PipelineError::UnreadableMedia(format!(
                    "{}: 不是视频流",
                    path.display()
                )))
            }
        };

        info!(
            "🎬 打开视频: {} | {}x{} @ {:.2}fps | {} | 总帧数 {}",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.codec,
            metadata
                .frame_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "未知".to_string())
        );

        let (tx, rx) = bounded::<DecodeEvent>(FRAME_QUEUE_DEPTH);
        let worker = std::thread::Builder::new()
            .name("vc-decode".to_string())
            .spawn(move || run_decoder(url, tx))
            .map_err(|e| PipelineError::UnreadableMedia(format!("解码线程启动失败: {}", e)))?;

        Ok(Self {
            metadata,
            rx: Some(rx),
            worker: Some(worker),
            frames_read: 0,
            finished: false,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn shutdown(&mut self) {
        // 先断开通道,阻塞在发送上的解码线程随即退出
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("⚠️ 解码线程异常退出");
            }
        }
    }
}

impl FrameSource for FfmpegReader {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };

        match rx.recv() {
            Ok(DecodeEvent::Frame(mut frame)) => {
                frame.index = self.frames_read;
                self.frames_read += 1;
                Ok(Some(frame))
            }
            Ok(DecodeEvent::End) => {
                self.finished = true;
                Ok(None)
            }
            Ok(DecodeEvent::Failed(reason)) => {
                self.finished = true;
                Err(PipelineError::UnreadableMedia(reason))
            }
            Err(_) => {
                self.finished = true;
                Err(PipelineError::UnreadableMedia(
                    "解码线程未正常结束".to_string(),
                ))
            }
        }
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.shutdown();
        debug!("📕 读取器关闭 (读取{}帧)", self.frames_read);
        Ok(())
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
