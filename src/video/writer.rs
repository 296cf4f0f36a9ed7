/// 视频写出器 (Video Stream Writer)
///
/// 调用方线程: write() 把 RGB24 帧送入有界通道
/// 编码线程: rawvideo 读回调 → format=yuv420p → 编码器 → 输出容器
///
/// open() 时就启动编码线程并等待就绪,编码器/容器不可用立即报错;
/// 零帧关闭同样写出容器头和尾。容器格式由输出路径后缀推断。
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::codec::get_encoders;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input, Output};
use tracing::{debug, info, warn};

use super::{check_frame_shape, Frame, FrameSink};
use crate::error::{PipelineError, Result};

/// 默认视频编码器
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";

/// 编码队列深度
const FRAME_QUEUE_DEPTH: usize = 8;

/// AVERROR_EOF (FFERRTAG('E','O','F',' ') 取负)
const AVERROR_EOF: i32 = -0x2046_4F45;

/// 编码线程 → open(): 就绪或构建失败 (只取第一条)
type ReadySignal = std::result::Result<(), String>;

/// 读回调: 把通道里的整帧字节按 FFmpeg 请求的块大小吐出
struct RawFrameFeeder {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
    /// FFmpeg 第一次要数据时说明输入已就绪
    ready: Option<Sender<ReadySignal>>,
}

impl RawFrameFeeder {
    fn new(rx: Receiver<Vec<u8>>, ready: Option<Sender<ReadySignal>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
            ready,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> i32 {
        if let Some(ready) = self.ready.take() {
            let _ = ready.try_send(Ok(()));
        }
        if buf.is_empty() {
            return 0;
        }

        if self.offset >= self.pending.len() {
            match self.rx.recv() {
                Ok(bytes) => {
                    self.pending = bytes;
                    self.offset = 0;
                }
                // 发送端关闭 = 流结束
                Err(_) => return AVERROR_EOF,
            }
        }

        let remaining = &self.pending[self.offset..];
        let n = remaining.len().min(buf.len()).min(i32::MAX as usize);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        n as i32
    }
}

/// 编码参数 (编码线程持有)
#[derive(Clone, Debug)]
struct EncodeSettings {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    codec: String,
}

/// 编码器名是否为本机 FFmpeg 可用的视频编码器
fn ensure_video_encoder(codec: &str) -> Result<()> {
    let available = get_encoders()
        .iter()
        .any(|c| c.codec_name == codec && c.media_type == AVMediaType::AVMEDIA_TYPE_VIDEO);
    if !available {
        return Err(PipelineError::UnwritableMedia(format!(
            "FFmpeg 没有可用的视频编码器: {}",
            codec
        )));
    }
    Ok(())
}

/// 编码线程主体
fn run_encoder(
    settings: EncodeSettings,
    rx: Receiver<Vec<u8>>,
    ready: Sender<ReadySignal>,
) -> std::result::Result<(), String> {
    let mut feeder = RawFrameFeeder::new(rx, Some(ready.clone()));

    let video_size = format!("{}x{}", settings.width, settings.height);
    let framerate = format!("{}", settings.fps);

    let input = Input::new_by_read_callback(move |buf: &mut [u8]| feeder.read(buf))
        .set_format("rawvideo")
        .set_input_opts(
            [
                ("video_size", video_size.as_str()),
                ("pixel_format", "rgb24"),
                ("framerate", framerate.as_str()),
            ]
            .into(),
        );

    let output = Output::from(settings.path.to_string_lossy().to_string())
        .set_video_codec(settings.codec.as_str());

    let started = FfmpegContext::builder()
        .input(input)
        .filter_descs(["format=yuv420p"].into())
        .output(output)
        .build()
        .map_err(|e| format!("构建失败: {}", e))
        .and_then(|ctx| ctx.start().map_err(|e| format!("启动失败: {}", e)));

    let sch = match started {
        Ok(sch) => {
            let _ = ready.try_send(Ok(()));
            sch
        }
        Err(reason) => {
            let _ = ready.try_send(Err(reason.clone()));
            return Err(reason);
        }
    };
    drop(ready);

    sch.wait().map_err(|e| format!("编码失败: {}", e))
}

/// FFmpeg 视频写出器
pub struct FfmpegWriter {
    settings: EncodeSettings,
    tx: Option<Sender<Vec<u8>>>,
    worker: Option<JoinHandle<std::result::Result<(), String>>>,
    frames_written: u64,
}

impl FfmpegWriter {
    /// 打开输出并启动编码线程
    ///
    /// 路径不可写、编码器不存在、容器/编码器组合被 FFmpeg 拒绝时返回 `UnwritableMedia`。
    pub fn open(path: &Path, width: u32, height: u32, fps: f64, codec: &str) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::UnwritableMedia(format!(
                "非法输出分辨率 {}x{}",
                width, height
            )));
        }

        File::create(path).map_err(|e| {
            PipelineError::UnwritableMedia(format!("{}: {}", path.display(), e))
        })?;
        ensure_video_encoder(codec)?;

        let fps = super::VideoMetadata::normalize_fps(fps);
        let settings = EncodeSettings {
            path: path.to_path_buf(),
            width,
            height,
            fps,
            codec: codec.to_string(),
        };

        let (tx, rx) = bounded::<Vec<u8>>(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = bounded::<ReadySignal>(1);
        let worker_settings = settings.clone();
        let worker = std::thread::Builder::new()
            .name("vc-encode".to_string())
            .spawn(move || run_encoder(worker_settings, rx, ready_tx))
            .map_err(|e| PipelineError::UnwritableMedia(format!("编码线程启动失败: {}", e)))?;

        let mut writer = Self {
            settings,
            tx: Some(tx),
            worker: Some(worker),
            frames_written: 0,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                // 线程已退出,回收即可
                let _ = writer.join_encoder();
                return Err(PipelineError::UnwritableMedia(format!(
                    "{}: {}",
                    path.display(),
                    reason
                )));
            }
            Err(_) => {
                return Err(writer.join_encoder().err().unwrap_or_else(|| {
                    PipelineError::UnwritableMedia("编码线程未就绪即退出".to_string())
                }));
            }
        }

        debug!("✅ 编码线程就绪");
        info!(
            "💾 打开输出: {} | {}x{} @ {:.2}fps | {}",
            path.display(),
            width,
            height,
            fps,
            codec
        );
        Ok(writer)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// 断开通道并等待编码线程结束,返回编码线程的结果
    fn join_encoder(&mut self) -> Result<()> {
        self.tx.take();
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        match worker.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(PipelineError::UnwritableMedia(reason)),
            Err(_) => Err(PipelineError::UnwritableMedia(
                "编码线程异常退出".to_string(),
            )),
        }
    }
}

impl FrameSink for FfmpegWriter {
    fn write(&mut self, frame: Frame) -> Result<()> {
        check_frame_shape(&frame, self.settings.width, self.settings.height)?;

        let Some(tx) = self.tx.as_ref() else {
            return Err(PipelineError::UnwritableMedia("写出器已关闭".to_string()));
        };

        if tx.send(frame.data).is_err() {
            // 编码线程已退出,取回它的错误
            self.join_encoder()?;
            return Err(PipelineError::UnwritableMedia(
                "编码线程提前结束".to_string(),
            ));
        }

        self.frames_written += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<u64> {
        self.join_encoder()?;

        // 零帧也必须有容器头/尾
        let size = fs::metadata(&self.settings.path)
            .map(|m| m.len())
            .map_err(|e| {
                PipelineError::UnwritableMedia(format!("{}: {}", self.settings.path.display(), e))
            })?;
        if size == 0 {
            return Err(PipelineError::UnwritableMedia(format!(
                "{}: 编码器未产生任何数据 (可能不支持该编码器)",
                self.settings.path.display()
            )));
        }

        info!(
            "💾 输出完成: {} ({}帧)",
            self.settings.path.display(),
            self.frames_written
        );
        Ok(self.frames_written)
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Err(e) = self.join_encoder() {
            warn!("⚠️ {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FfmpegReader, FrameSource};

    #[test]
    fn test_feeder_chunks_frames() {
        let (tx, rx) = bounded::<Vec<u8>>(4);
        let (ready_tx, ready_rx) = bounded::<ReadySignal>(1);
        let mut feeder = RawFrameFeeder::new(rx, Some(ready_tx));

        tx.send(vec![1, 2, 3, 4, 5]).unwrap();
        tx.send(vec![6, 7]).unwrap();
        drop(tx);

        let mut buf = [0u8; 3];
        assert_eq!(feeder.read(&mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        // 第一次读即发出就绪
        assert_eq!(ready_rx.try_recv(), Ok(Ok(())));
        assert_eq!(feeder.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(feeder.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[6, 7]);
        assert_eq!(feeder.read(&mut buf), AVERROR_EOF);
        assert!(ready_rx.try_recv().is_err());
    }

    #[test]
    fn test_open_rejects_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.mp4");
        let result = FfmpegWriter::open(&path, 64, 64, 25.0, DEFAULT_VIDEO_CODEC);
        assert!(matches!(result, Err(PipelineError::UnwritableMedia(_))));
    }

    #[test]
    fn test_open_rejects_unknown_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let result = FfmpegWriter::open(&path, 64, 48, 25.0, "no-such-codec");
        assert!(matches!(result, Err(PipelineError::UnwritableMedia(_))));

        let result = FfmpegWriter::open(&path, 0, 48, 25.0, DEFAULT_VIDEO_CODEC);
        assert!(matches!(result, Err(PipelineError::UnwritableMedia(_))));
    }

    #[test]
    #[ignore = "需要本地 FFmpeg 编解码器 (libx264)"]
    fn test_write_rejects_wrong_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut writer = FfmpegWriter::open(&path, 64, 48, 25.0, DEFAULT_VIDEO_CODEC).unwrap();

        let err = writer.write(Frame::filled(0, 32, 48, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert_eq!(writer.frames_written(), 0);
    }

    /// 零帧关闭: 文件非空且可以重新打开
    #[test]
    #[ignore = "需要本地 FFmpeg 编解码器 (libx264)"]
    fn test_zero_frame_output_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        let writer = FfmpegWriter::open(&path, 64, 48, 25.0, DEFAULT_VIDEO_CODEC).unwrap();
        assert_eq!(Box::new(writer).close().unwrap(), 0);
        assert!(fs::metadata(&path).unwrap().len() > 0);

        let reader = FfmpegReader::open(&path).unwrap();
        assert_eq!(
            (reader.metadata().width, reader.metadata().height),
            (64, 48)
        );
        Box::new(reader).close().unwrap();
    }
}
