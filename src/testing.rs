//! 测试替身: 内存媒体后端和桩模型

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::counting::{ClassCountTable, ClassCounts, CrossingRegion};
use crate::error::{PipelineError, Result};
use crate::models::{CountConvention, CountingModel, ModelOutput, SharedModel};
use crate::video::{check_frame_shape, Frame, FrameSink, FrameSource, MediaBackend, VideoMetadata};

/// 合成视频文件必须以此开头,否则视为无法读取
pub const SYNTH_MAGIC: &[u8] = b"SYNTH";

pub fn shared(model: impl CountingModel + Send + 'static) -> SharedModel {
    Arc::new(Mutex::new(Box::new(model)))
}

/// 合成媒体后端: 读取端生成纯色帧,写入端先写 SYNTH_MAGIC 头再追加原始字节
#[derive(Clone)]
pub struct SyntheticBackend {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// 是否在元数据中报告总帧数
    pub report_total: bool,
    /// 打开写入端时报错
    pub fail_open_writer: bool,
    /// 关闭写入端时报错
    pub fail_close: bool,
    /// 关闭时少报一帧
    pub drop_frame_on_close: bool,
    opened: Arc<Mutex<Vec<PathBuf>>>,
}

impl SyntheticBackend {
    pub fn new(frames: u64, width: u32, height: u32) -> Self {
        Self {
            frames,
            width,
            height,
            fps: 30.0,
            report_total: true,
            fail_open_writer: false,
            fail_close: false,
            drop_frame_on_close: false,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    pub fn failing_writer_open(mut self) -> Self {
        self.fail_open_writer = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn dropping_frame_on_close(mut self) -> Self {
        self.drop_frame_on_close = true;
        self
    }

    /// 所有打开过的读写路径
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        let bytes = fs::read(path)
            .map_err(|e| PipelineError::UnreadableMedia(format!("{}: {}", path.display(), e)))?;
        if !bytes.starts_with(SYNTH_MAGIC) {
            return Err(PipelineError::UnreadableMedia(format!(
                "{}: 不是合成视频",
                path.display()
            )));
        }

        Ok(Box::new(SyntheticSource {
            metadata: VideoMetadata {
                width: self.width,
                height: self.height,
                fps: self.fps,
                frame_count: self.report_total.then_some(self.frames),
                codec: "synthetic".to_string(),
            },
            remaining: self.frames,
            next_index: 0,
        }))
    }

    fn open_writer(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        _fps: f64,
    ) -> Result<Box<dyn FrameSink>> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        if self.fail_open_writer {
            return Err(PipelineError::UnwritableMedia(format!(
                "{}: 不支持的编码器",
                path.display()
            )));
        }

        let mut file = File::create(path)
            .and_then(|mut f| f.write_all(SYNTH_MAGIC).map(|_| f))
            .map_err(|e| PipelineError::UnwritableMedia(format!("{}: {}", path.display(), e)))?;
        file.flush()
            .map_err(|e| PipelineError::UnwritableMedia(e.to_string()))?;
        Ok(Box::new(SyntheticSink {
            file,
            width,
            height,
            written: 0,
            fail_close: self.fail_close,
            drop_frame_on_close: self.drop_frame_on_close,
        }))
    }
}

struct SyntheticSource {
    metadata: VideoMetadata,
    remaining: u64,
    next_index: u64,
}

impl FrameSource for SyntheticSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let index = self.next_index;
        self.next_index += 1;
        let shade = (index * 10 % 256) as u8;
        Ok(Some(Frame::filled(
            index,
            self.metadata.width,
            self.metadata.height,
            [shade, shade, shade],
        )))
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct SyntheticSink {
    file: File,
    width: u32,
    height: u32,
    written: u64,
    fail_close: bool,
    drop_frame_on_close: bool,
}

impl FrameSink for SyntheticSink {
    fn write(&mut self, frame: Frame) -> Result<()> {
        check_frame_shape(&frame, self.width, self.height)?;
        self.file
            .write_all(&frame.data)
            .map_err(|e| PipelineError::UnwritableMedia(e.to_string()))?;
        self.written += 1;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<u64> {
        if self.fail_close {
            return Err(PipelineError::UnwritableMedia(
                "封装尾部写入失败".to_string(),
            ));
        }
        if self.drop_frame_on_close {
            return Ok(self.written.saturating_sub(1));
        }
        Ok(self.written)
    }
}

fn car_table(entered: u64) -> ClassCountTable {
    [("car", ClassCounts::new(entered, 0))].into_iter().collect()
}

/// 每第 n 帧 (从1计) 记一辆车进入,原样返回帧
pub struct EveryNthCarModel {
    n: u64,
    convention: CountConvention,
    seen: u64,
    total: u64,
}

impl EveryNthCarModel {
    /// 只报告本帧增量
    pub fn new(n: u64) -> Self {
        Self {
            n,
            convention: CountConvention::Delta,
            seen: 0,
            total: 0,
        }
    }

    /// 报告内部累计值
    pub fn cumulative(n: u64) -> Self {
        Self {
            convention: CountConvention::Cumulative,
            ..Self::new(n)
        }
    }
}

impl CountingModel for EveryNthCarModel {
    fn name(&self) -> &str {
        "every-nth-car"
    }

    fn convention(&self) -> CountConvention {
        self.convention
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.total = 0;
    }

    fn infer(&mut self, frame: &Frame, _region: &CrossingRegion) -> anyhow::Result<ModelOutput> {
        self.seen += 1;
        let hit = u64::from(self.seen % self.n == 0);
        self.total += hit;

        let counts = match self.convention {
            CountConvention::Delta => car_table(hit),
            CountConvention::Cumulative => car_table(self.total),
        };
        Ok(ModelOutput {
            annotated: frame.clone(),
            counts,
        })
    }
}

/// 按脚本逐帧报告累计值 (可以故意回退)
pub struct CumulativeModel {
    script: Vec<u64>,
    pos: usize,
}

impl CumulativeModel {
    pub fn new(script: Vec<u64>) -> Self {
        Self { script, pos: 0 }
    }
}

impl CountingModel for CumulativeModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn convention(&self) -> CountConvention {
        CountConvention::Cumulative
    }

    fn reset(&mut self) {
        self.pos = 0;
    }

    fn infer(&mut self, frame: &Frame, _region: &CrossingRegion) -> anyhow::Result<ModelOutput> {
        let value = self.script.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        Ok(ModelOutput {
            annotated: frame.clone(),
            counts: car_table(value),
        })
    }
}

/// 在第 `fail_at` 帧 (从1计) 报错
pub struct FailingModel {
    fail_at: u64,
    seen: u64,
}

impl FailingModel {
    pub fn new(fail_at: u64) -> Self {
        Self { fail_at, seen: 0 }
    }
}

impl CountingModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    fn convention(&self) -> CountConvention {
        CountConvention::Delta
    }

    fn reset(&mut self) {
        self.seen = 0;
    }

    fn infer(&mut self, frame: &Frame, _region: &CrossingRegion) -> anyhow::Result<ModelOutput> {
        self.seen += 1;
        if self.seen == self.fail_at {
            anyhow::bail!("推理后端崩溃");
        }
        Ok(ModelOutput {
            annotated: frame.clone(),
            counts: ClassCountTable::new(),
        })
    }
}

/// 返回缩小一半的标注帧
pub struct ResizingModel;

impl CountingModel for ResizingModel {
    fn name(&self) -> &str {
        "resizing"
    }

    fn convention(&self) -> CountConvention {
        CountConvention::Delta
    }

    fn reset(&mut self) {}

    fn infer(&mut self, frame: &Frame, _region: &CrossingRegion) -> anyhow::Result<ModelOutput> {
        Ok(ModelOutput {
            annotated: Frame::filled(frame.index, frame.width / 2, frame.height / 2, [0, 0, 0]),
            counts: ClassCountTable::new(),
        })
    }
}
