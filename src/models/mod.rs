// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 计数模型接口与实现
///
/// # 架构说明
///
/// ## Model Boundary
/// 流水线只通过 [`CountingModel`] 访问模型:
/// `reset → infer(frame, region) → {annotated, counts}`
///
/// ## 模型实现
/// - **ObjectCounter**: YOLO 检测 + ByteTrack 跟踪 + 区域计数 + 标注
///   - 文件: `counter.rs`
///
/// ## 模型单例
/// - **ModelSlot**: 进程级惰性单例,首次访问时构造一次,之后所有运行共享
/// - **ComputeDevice**: 启动时解析一次,传入模型构造函数
pub mod counter;
pub mod weights;

pub use counter::{ObjectCounter, ObjectCounterConfig};

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use once_cell::sync::OnceCell;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::counting::{ClassCountTable, CrossingRegion};
use crate::video::Frame;

/// 计数语义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountConvention {
    /// 每帧返回截至当前的累计值
    Cumulative,
    /// 每帧只返回本帧新增
    Delta,
}

/// 单帧推理结果
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// 标注后的帧 (尺寸必须与输入一致)
    pub annotated: Frame,
    pub counts: ClassCountTable,
}

/// 检测+计数模型统一接口
pub trait CountingModel {
    /// 模型名称 (日志用)
    fn name(&self) -> &str;

    /// 计数语义
    fn convention(&self) -> CountConvention;

    /// 清除单次运行的状态 (轨迹、已计数ID、计数)
    fn reset(&mut self);

    /// 处理一帧
    fn infer(&mut self, frame: &Frame, region: &CrossingRegion) -> Result<ModelOutput>;
}

/// 进程内共享的模型
pub type SharedModel = Arc<Mutex<Box<dyn CountingModel + Send>>>;

/// 模型单例槽: 首次访问时构造, 并发首次访问也只构造一次
#[derive(Default)]
pub struct ModelSlot {
    cell: OnceCell<SharedModel>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得模型,未构造时调用 `init` 构造
    ///
    /// 构造失败不会占用槽位,下次访问会重新尝试。
    pub fn get_or_try_init<F>(&self, init: F) -> Result<SharedModel>
    where
        F: FnOnce() -> Result<Box<dyn CountingModel + Send>>,
    {
        self.cell
            .get_or_try_init(|| {
                let model = init()?;
                info!("✅ 模型就绪: {}", model.name());
                Ok(Arc::new(Mutex::new(model)))
            })
            .map(Arc::clone)
    }

    pub fn get(&self) -> Option<SharedModel> {
        self.cell.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// 设备偏好 (CLI)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA 可用时用 CUDA
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// 实际使用的计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    /// GPU (CUDA)
    Accelerated,
    /// CPU
    General,
}

impl ComputeDevice {
    /// 解析设备 (启动时调用一次)
    pub fn resolve(preference: DevicePreference) -> Self {
        Self::resolve_with(preference, cuda_available)
    }

    fn resolve_with(preference: DevicePreference, probe: impl FnOnce() -> bool) -> Self {
        match preference {
            DevicePreference::Cpu => ComputeDevice::General,
            DevicePreference::Auto => {
                if probe() {
                    ComputeDevice::Accelerated
                } else {
                    ComputeDevice::General
                }
            }
            DevicePreference::Cuda => {
                if probe() {
                    ComputeDevice::Accelerated
                } else {
                    warn!("⚠️ CUDA 不可用, 回退到 CPU");
                    ComputeDevice::General
                }
            }
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Accelerated => write!(f, "cuda"),
            ComputeDevice::General => write!(f, "cpu"),
        }
    }
}

fn cuda_available() -> bool {
    CUDAExecutionProvider::default()
        .is_available()
        .unwrap_or(false)
}
