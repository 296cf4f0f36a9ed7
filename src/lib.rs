// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod adapter; // 检测适配器
pub mod annotate; // 帧标注
pub mod config; // 命令行参数与计数配置
pub mod counting; // 区域穿越计数
pub mod detection; // 检测与跟踪
pub mod error; // 流水线错误类型
pub mod models; // 计数模型接口与实现
pub mod pipeline; // 流水线编排
pub mod storage; // 临时文件管理
pub mod summary; // 运行摘要
pub mod video; // 视频读写

#[cfg(test)]
pub(crate) mod testing;

pub use crate::adapter::DetectorAdapter;
pub use crate::config::{Args, CounterConfig, Settings};
pub use crate::counting::{ClassCountTable, ClassCounts, CrossingRegion};
pub use crate::error::{PipelineError, Result};
pub use crate::models::{
    ComputeDevice, CountConvention, CountingModel, DevicePreference, ModelOutput, ModelSlot,
    ObjectCounter, ObjectCounterConfig, SharedModel,
};
pub use crate::pipeline::{Orchestrator, Progress, ProgressRatio, RunState};
pub use crate::storage::{TempHandle, TempStorage};
pub use crate::summary::{RunSummary, SummaryReport};
pub use crate::video::{FfmpegBackend, Frame, MediaBackend, VideoMetadata};
