//! 运行摘要 (Run Summary)
//!
//! 最终计数表、帧统计、完成时间, 以及输出视频的临时文件句柄。
//! `deliver` 把输出视频复制到目标目录后释放临时文件。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::counting::ClassCountTable;
use crate::error::{PipelineError, Result};
use crate::storage::TempHandle;

/// 单次运行的结果 (只读)
#[derive(Debug)]
pub struct RunSummary {
    pub counts: ClassCountTable,
    pub frames_read: u64,
    pub frames_written: u64,
    pub finished_at: DateTime<Local>,
    pub model: String,
    /// 输出容器扩展名 (含点, 可能为空)
    extension: String,
    output: TempHandle,
}

/// JSON 摘要
#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub source: String,
    pub output: String,
    pub model: String,
    pub finished_at: String,
    pub frames: u64,
    pub total: u64,
    pub total_in: u64,
    pub total_out: u64,
    pub classes: ClassCountTable,
}

impl RunSummary {
    pub(crate) fn new(
        counts: ClassCountTable,
        frames_read: u64,
        frames_written: u64,
        model: String,
        extension: String,
        output: TempHandle,
    ) -> Self {
        Self {
            counts,
            frames_read,
            frames_written,
            finished_at: Local::now(),
            model,
            extension,
            output,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.total()
    }

    pub fn total_in(&self) -> u64 {
        self.counts.total_in()
    }

    pub fn total_out(&self) -> u64 {
        self.counts.total_out()
    }

    /// 临时输出文件路径 (交付后失效)
    pub fn output_path(&self) -> &Path {
        self.output.path()
    }

    /// 交付文件名: `<base>_output<ext>`
    pub fn output_file_name(&self, base_name: &str) -> String {
        format!("{}_output{}", base_name, self.extension)
    }

    /// 复制输出视频到 `dest_dir` 并释放临时文件
    pub fn deliver(&mut self, dest_dir: &Path, base_name: &str) -> Result<PathBuf> {
        if self.output.is_released() {
            return Err(PipelineError::Storage("输出视频已交付或已释放".to_string()));
        }

        fs::create_dir_all(dest_dir).map_err(|e| {
            PipelineError::Storage(format!("创建输出目录失败 {}: {}", dest_dir.display(), e))
        })?;

        let dest = dest_dir.join(self.output_file_name(base_name));
        fs::copy(self.output.path(), &dest).map_err(|e| {
            PipelineError::Storage(format!("交付输出视频失败 {}: {}", dest.display(), e))
        })?;
        self.output.release()?;

        info!("📦 输出视频: {}", dest.display());
        Ok(dest)
    }

    /// 纯文本摘要
    ///
    /// ```text
    /// Total Vehicles: 5 (IN: 3, OUT: 2)
    ///
    /// - Car: 4 (IN: 3, OUT: 1)
    /// - Truck: 1 (IN: 0, OUT: 1)
    /// ```
    pub fn render_text(&self) -> String {
        render_counts(&self.counts)
    }

    pub fn report(&self, source: &str, output: &Path) -> SummaryReport {
        SummaryReport {
            source: source.to_string(),
            output: output.display().to_string(),
            model: self.model.clone(),
            finished_at: self.finished_at.to_rfc3339(),
            frames: self.frames_written,
            total: self.total(),
            total_in: self.total_in(),
            total_out: self.total_out(),
            classes: self.counts.clone(),
        }
    }
}

/// 计数表的文本形式
pub fn render_counts(counts: &ClassCountTable) -> String {
    let mut text = format!(
        "Total Vehicles: {} (IN: {}, OUT: {})\n\n",
        counts.total(),
        counts.total_in(),
        counts.total_out()
    );
    for (label, c) in counts.iter() {
        text.push_str(&format!(
            "- {}: {} (IN: {}, OUT: {})\n",
            capitalize(label),
            c.total(),
            c.entered,
            c.exited
        ));
    }
    text
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::ClassCounts;
    use crate::storage::TempStorage;

    fn sample_counts() -> ClassCountTable {
        [
            ("truck", ClassCounts::new(0, 1)),
            ("car", ClassCounts::new(3, 1)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_render_text() {
        assert_eq!(
            render_counts(&sample_counts()),
            "Total Vehicles: 5 (IN: 3, OUT: 2)\n\n- Car: 4 (IN: 3, OUT: 1)\n- Truck: 1 (IN: 0, OUT: 1)\n"
        );
        assert_eq!(
            render_counts(&ClassCountTable::new()),
            "Total Vehicles: 0 (IN: 0, OUT: 0)\n\n"
        );
    }

    #[test]
    fn test_deliver_copies_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TempStorage::in_dir(dir.path().join("tmp"));
        let handle = storage.acquire(".mp4").unwrap();
        fs::write(handle.path(), b"video").unwrap();
        let temp_path = handle.path().to_path_buf();

        let mut summary = RunSummary::new(
            sample_counts(),
            7,
            7,
            "stub".to_string(),
            ".mp4".to_string(),
            handle,
        );

        let out_dir = dir.path().join("output");
        let delivered = summary.deliver(&out_dir, "traffic").unwrap();

        assert_eq!(delivered, out_dir.join("traffic_output.mp4"));
        assert_eq!(fs::read(&delivered).unwrap(), b"video");
        assert!(!temp_path.exists());
        assert!(summary.deliver(&out_dir, "traffic").is_err());

        let report = summary.report("traffic.mp4", &delivered);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["total"], 5);
        assert_eq!(json["frames"], 7);
        assert_eq!(json["classes"]["car"]["IN"], 3);
    }
}
