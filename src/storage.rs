//! 临时存储管理 (Temporary Storage Manager)
//!
//! 每次运行为上传视频和输出视频各分配一个唯一命名的临时文件,
//! 句柄离开作用域时自动删除,失败路径同样清理。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

const TEMP_PREFIX: &str = "vc-";

/// 临时文件分配器
#[derive(Debug, Clone, Default)]
pub struct TempStorage {
    dir: Option<PathBuf>,
}

impl TempStorage {
    /// 使用系统临时目录
    pub fn new() -> Self {
        Self { dir: None }
    }

    /// 使用指定目录 (不存在时自动创建)
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// 创建唯一命名的文件并返回句柄
    ///
    /// `suffix` 一般为扩展名 (如 `.mp4`),保证容器格式可由后缀推断。
    pub fn acquire(&self, suffix: &str) -> Result<TempHandle> {
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Storage(format!("创建临时目录失败 {}: {}", dir.display(), e))
        })?;

        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(suffix)
            .tempfile_in(&dir)
            .map_err(|e| PipelineError::Storage(format!("创建临时文件失败: {}", e)))?;

        // 交给句柄管理生命周期,tempfile 自身不再删除
        let (_file, path) = file
            .keep()
            .map_err(|e| PipelineError::Storage(format!("保留临时文件失败: {}", e)))?;

        debug!("📁 分配临时文件: {}", path.display());
        Ok(TempHandle {
            path,
            released: false,
        })
    }
}

/// 临时文件句柄
///
/// `release` 幂等: 文件已不存在不报错;句柄释放后不会再触碰该路径,
/// 即使之后有无关文件占用了同一路径。
#[derive(Debug)]
pub struct TempHandle {
    path: PathBuf,
    released: bool,
}

impl TempHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// 删除文件 (可重复调用)
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("🗑️ 已删除临时文件: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Storage(format!(
                "删除临时文件失败 {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for TempHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("⚠️ {}", e);
        }
    }
}
