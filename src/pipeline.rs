//! 流水线编排 (Pipeline Orchestrator)
//!
//! 状态机: Idle → Opened → Running → Finalizing → Done
//!                  └──────────┴──────────┴──→ Failed
//!
//! 单次运行: 落盘上传 → 打开读写 → 逐帧 (读 → 检测 → 写 → 进度) → 收尾 → 摘要

use std::fs::File;
use std::io::{self, Read};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::adapter::DetectorAdapter;
use crate::counting::{ClassCountTable, CrossingRegion};
use crate::error::{PipelineError, Result};
use crate::models::SharedModel;
use crate::storage::{TempHandle, TempStorage};
use crate::summary::RunSummary;
use crate::video::MediaBackend;

/// 进度日志间隔 (帧)
const LOG_EVERY: u64 = 30;

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Opened,
    Running,
    Finalizing,
    Done,
    Failed,
}

/// 进度比例
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressRatio {
    /// 0.0 ..= 1.0
    Fraction(f64),
    /// 总帧数未知
    Indeterminate,
}

/// 每帧处理后的进度通知
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// 已处理帧数
    pub done: u64,
    pub total: Option<u64>,
    /// 当前累计计数
    pub counts: &'a ClassCountTable,
}

impl Progress<'_> {
    pub fn ratio(&self) -> ProgressRatio {
        progress_ratio(self.done, self.total)
    }
}

/// 已处理/总数, 超过1时截断; 总数未知或为0时不做除法
pub fn progress_ratio(done: u64, total: Option<u64>) -> ProgressRatio {
    match total {
        Some(total) if total > 0 => ProgressRatio::Fraction((done as f64 / total as f64).min(1.0)),
        _ => ProgressRatio::Indeterminate,
    }
}

/// 规范化上传文件扩展名: "mp4" / ".MP4" → ".mp4"
fn normalize_extension(extension: &str) -> String {
    let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        String::new()
    } else {
        format!(".{}", ext)
    }
}

/// 流水线编排器
pub struct Orchestrator<B: MediaBackend> {
    backend: B,
    storage: TempStorage,
    adapter: DetectorAdapter,
    region: Option<CrossingRegion>,
    state: RunState,
}

impl<B: MediaBackend> Orchestrator<B> {
    pub fn new(backend: B, storage: TempStorage, model: SharedModel) -> Self {
        Self {
            backend,
            storage,
            adapter: DetectorAdapter::new(model),
            region: None,
            state: RunState::Idle,
        }
    }

    /// 固定计数区域; 未设置时使用画面中线
    pub fn with_region(mut self, region: Option<CrossingRegion>) -> Self {
        self.region = region;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn set_state(&mut self, next: RunState) {
        if self.state != next {
            debug!("🔀 {:?} → {:?}", self.state, next);
        }
        self.state = next;
    }

    /// 执行一次完整运行
    ///
    /// `upload` 为上传的视频字节, `extension` 为原文件扩展名 (决定容器格式)。
    /// 失败时两个临时文件都会在返回错误之前删除。
    pub fn run<R, F>(&mut self, upload: R, extension: &str, mut observer: F) -> Result<RunSummary>
    where
        R: Read,
        F: FnMut(Progress<'_>),
    {
        self.set_state(RunState::Idle);

        let mut input: Option<TempHandle> = None;
        let mut output: Option<TempHandle> = None;
        let started = Instant::now();

        match self.execute(upload, extension, &mut input, &mut output, &mut observer) {
            Ok(summary) => {
                info!(
                    "🏁 运行完成: {} 帧 | 进 {} 出 {} | 耗时 {:.1?}",
                    summary.frames_written,
                    summary.total_in(),
                    summary.total_out(),
                    started.elapsed()
                );
                Ok(summary)
            }
            Err(e) => {
                self.set_state(RunState::Failed);
                for handle in [input.as_mut(), output.as_mut()].into_iter().flatten() {
                    if let Err(release_err) = handle.release() {
                        warn!("⚠️ {}", release_err);
                    }
                }
                error!("❌ 运行失败 [{}]: {}", e.kind(), e);
                Err(e)
            }
        }
    }

    fn execute<R, F>(
        &mut self,
        mut upload: R,
        extension: &str,
        input: &mut Option<TempHandle>,
        output: &mut Option<TempHandle>,
        observer: &mut F,
    ) -> Result<RunSummary>
    where
        R: Read,
        F: FnMut(Progress<'_>),
    {
        // ===== Idle → Opened =====
        let suffix = normalize_extension(extension);

        let input_path = input.insert(self.storage.acquire(&suffix)?).path().to_path_buf();
        let mut file = File::create(&input_path).map_err(|e| {
            PipelineError::Storage(format!("写入上传文件失败 {}: {}", input_path.display(), e))
        })?;
        let bytes = io::copy(&mut upload, &mut file)
            .map_err(|e| PipelineError::Storage(format!("写入上传文件失败: {}", e)))?;
        drop(file);
        debug!("📥 上传已落盘: {} ({} 字节)", input_path.display(), bytes);

        let output_path = output.insert(self.storage.acquire(&suffix)?).path().to_path_buf();

        let mut reader = self.backend.open_reader(&input_path)?;
        let meta = reader.metadata().clone();
        let mut writer = self
            .backend
            .open_writer(&output_path, meta.width, meta.height, meta.fps)?;

        let region = self
            .region
            .clone()
            .unwrap_or_else(|| CrossingRegion::default_for(meta.width, meta.height));
        self.adapter.begin_run(meta.width, meta.height)?;
        let model_name = self.adapter.model_name()?;
        self.set_state(RunState::Opened);

        info!(
            "📐 {}x{} @ {:.2}fps | 计数区域 {} | 模型 {}",
            meta.width,
            meta.height,
            meta.fps,
            region,
            model_name
        );

        // ===== Opened → Running =====
        self.set_state(RunState::Running);
        let mut counts = ClassCountTable::new();
        let mut frames_read = 0u64;
        let mut frames_written = 0u64;

        while let Some(frame) = reader.next_frame()? {
            frames_read += 1;

            let (annotated, next) = self.adapter.process(&frame, &region, &counts)?;
            writer.write(annotated)?;
            frames_written += 1;
            counts = next;

            let progress = Progress {
                done: frames_read,
                total: meta.frame_count,
                counts: &counts,
            };
            if frames_read % LOG_EVERY == 0 {
                match progress.ratio() {
                    ProgressRatio::Fraction(r) => {
                        info!("⏳ 处理中 {:.0}% ({} 帧)", r * 100.0, frames_read)
                    }
                    ProgressRatio::Indeterminate => info!("⏳ 处理中 {} 帧", frames_read),
                }
            }
            observer(progress);
        }

        // ===== Running → Finalizing =====
        self.set_state(RunState::Finalizing);
        reader.close()?;
        let encoded = writer.close()?;
        if encoded != frames_read || frames_written != frames_read {
            return Err(PipelineError::FrameCountMismatch {
                read: frames_read,
                written: encoded.min(frames_written),
            });
        }

        // ===== Finalizing → Done =====
        if let Some(mut handle) = input.take() {
            handle.release()?;
        }
        let output = output
            .take()
            .ok_or_else(|| PipelineError::Storage("输出临时文件丢失".to_string()))?;
        self.set_state(RunState::Done);

        Ok(RunSummary::new(
            counts,
            frames_read,
            frames_written,
            model_name,
            suffix,
            output,
        ))
    }
}
