//! 模型权重定位与下载
//!
//! `--model` 可以是路径,也可以是文件名。文件名先在缓存目录
//! `<cache>/vehicle-counter/models` 查找,找不到时下载一次。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

/// 默认模型
pub const DEFAULT_MODEL: &str = "yolov8n.onnx";

/// 已知模型的下载地址
const KNOWN_WEIGHTS: &[(&str, &str)] = &[(
    "yolov8n.onnx",
    "https://github.com/ultralytics/assets/releases/download/v8.2.0/yolov8n.onnx",
)];

/// 小于该字节数的下载视为损坏
const MIN_WEIGHTS_SIZE: u64 = 1024;

/// 权重缓存目录
pub fn cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join("vehicle-counter").join("models"))
        .context("无法确定缓存目录")
}

pub fn known_url(name: &str) -> Option<&'static str> {
    KNOWN_WEIGHTS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, url)| *url)
}

/// 定位权重文件,必要时下载
pub fn resolve(model: &str, url: Option<&str>) -> Result<PathBuf> {
    resolve_in(&cache_dir()?, model, url, download)
}

fn resolve_in<F>(cache: &Path, model: &str, url: Option<&str>, fetch: F) -> Result<PathBuf>
where
    F: FnOnce(&str, &Path) -> Result<()>,
{
    let path = Path::new(model);

    // 显式路径: 必须存在
    if path.components().count() > 1 || path.exists() {
        if !path.is_file() {
            bail!("模型文件不存在: {}", path.display());
        }
        return Ok(path.to_path_buf());
    }

    let target = cache.join(model);
    if target.is_file() {
        info!("📦 使用缓存模型: {}", target.display());
        return Ok(target);
    }

    let url = url
        .or_else(|| known_url(model))
        .with_context(|| format!("未知模型 {}, 请用 --weights-url 指定下载地址", model))?;
    if !url.starts_with("https://") {
        bail!("只允许 HTTPS 下载地址: {}", url);
    }

    fs::create_dir_all(cache)
        .with_context(|| format!("创建缓存目录失败: {}", cache.display()))?;

    info!("⬇️ 下载模型 {} ← {}", model, url);
    let partial = cache.join(format!("{}.part", model));
    if let Err(e) = fetch(url, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    let size = fs::metadata(&partial).map(|m| m.len()).unwrap_or(0);
    if size < MIN_WEIGHTS_SIZE {
        let _ = fs::remove_file(&partial);
        bail!("下载的模型过小 ({} 字节), 可能已损坏", size);
    }

    fs::rename(&partial, &target).with_context(|| {
        let _ = fs::remove_file(&partial);
        format!("保存模型失败: {}", target.display())
    })?;

    info!("✅ 模型已保存: {} ({} 字节)", target.display(), size);
    Ok(target)
}

/// HTTP 下载到文件
fn download(url: &str, dest: &Path) -> Result<()> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("请求失败: {}", url))?;

    let mut reader = response.into_reader();
    let mut file =
        File::create(dest).with_context(|| format!("创建文件失败: {}", dest.display()))?;
    io::copy(&mut reader, &mut file).with_context(|| format!("下载中断: {}", url))?;
    Ok(())
}
