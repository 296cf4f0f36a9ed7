//! 流水线错误类型
//! Error kinds surfaced by a single run

use thiserror::Error;

/// 单次运行的致命错误
///
/// 所有错误对当前运行都是致命的,不做自动重试:
/// 逐帧的跟踪状态无法在流中途安全恢复。
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 输入容器/编码无法解析或解码
    #[error("无法读取视频: {0}")]
    UnreadableMedia(String),

    /// 宿主机无法按所选格式编码输出
    #[error("无法写出视频: {0}")]
    UnwritableMedia(String),

    /// 模型处理某一帧失败
    #[error("检测失败 (第{frame}帧): {reason}")]
    Detection { frame: u64, reason: String },

    /// 写入帧的尺寸与输出流不一致
    #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// 临时文件创建/删除/交付失败
    #[error("存储错误: {0}")]
    Storage(String),

    /// 读写帧数不一致
    #[error("帧数不一致: 读取{read}帧, 写入{written}帧")]
    FrameCountMismatch { read: u64, written: u64 },
}

impl PipelineError {
    pub fn detection(frame: u64, reason: impl Into<String>) -> Self {
        PipelineError::Detection {
            frame,
            reason: reason.into(),
        }
    }

    /// 错误类别 (用于日志和摘要)
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UnreadableMedia(_) => "UnreadableMedia",
            PipelineError::UnwritableMedia(_) => "UnwritableMedia",
            PipelineError::Detection { .. } => "Detection",
            PipelineError::DimensionMismatch { .. } => "DimensionMismatch",
            PipelineError::Storage(_) => "Storage",
            PipelineError::FrameCountMismatch { .. } => "FrameCountMismatch",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
