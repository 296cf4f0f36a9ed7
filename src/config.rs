//! 命令行参数与计数配置
//!
//! 优先级: 命令行 > JSON 配置文件 > 默认值

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::counting::CrossingRegion;
use crate::detection::{class_id, DetectorSettings, TrackerSettings, COCO_CLASSES, VEHICLE_CLASSES};
use crate::models::{weights, DevicePreference};
use crate::video::writer::DEFAULT_VIDEO_CODEC;

/// 车辆计数参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "车辆计数 - 检测、跟踪并统计穿越计数线的车辆", long_about = None)]
pub struct Args {
    /// 输入视频 (mp4/avi/mov), 按顺序依次处理
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// 输出目录
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// ONNX 模型路径或缓存中的文件名
    #[arg(short, long, default_value = weights::DEFAULT_MODEL)]
    pub model: String,

    /// 模型下载地址 (缓存中没有时使用)
    #[arg(long)]
    pub weights_url: Option<String>,

    /// 计算设备
    #[arg(long, value_enum, default_value_t = DevicePreference::Auto)]
    pub device: DevicePreference,

    /// 置信度阈值
    #[arg(long, default_value_t = 0.25)]
    pub conf: f32,

    /// NMS IoU 阈值
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// 模型输入边长
    #[arg(long, default_value_t = 640)]
    pub input_size: u32,

    /// 计数类别, 逗号分隔 (名称或 COCO ID)
    #[arg(long, value_delimiter = ',')]
    pub classes: Vec<String>,

    /// 计数区域 "x,y;x,y[;...]", 默认为画面中间的竖线
    #[arg(long)]
    pub region: Option<CrossingRegion>,

    /// JSON 计数配置文件
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 标注字体 (TTF/OTF), 默认使用内置 DejaVu Sans
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 输出视频编码器
    #[arg(long, default_value = DEFAULT_VIDEO_CODEC)]
    pub codec: String,

    /// 临时文件目录
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// 额外写出 `<名称>_summary.json`
    #[arg(long)]
    pub json: bool,
}

/// JSON 计数配置 (所有字段可省略)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub classes: Option<Vec<String>>,
    pub region: Option<CrossingRegion>,
    pub tracker: TrackerSettings,
}

impl CounterConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("配置文件解析失败: {}", path.display()))?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }
}

/// 合并后的运行配置
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    pub region: Option<CrossingRegion>,
}

impl Settings {
    pub fn resolve(args: &Args, file: Option<CounterConfig>) -> Result<Self> {
        let file = file.unwrap_or_default();

        let classes = if !args.classes.is_empty() {
            parse_classes(&args.classes)?
        } else if let Some(labels) = &file.classes {
            parse_classes(labels)?
        } else {
            VEHICLE_CLASSES.to_vec()
        };

        if !(0.0..=1.0).contains(&args.conf) || !(0.0..=1.0).contains(&args.iou) {
            bail!("阈值必须在 0~1 之间: conf={} iou={}", args.conf, args.iou);
        }
        if args.input_size == 0 || args.input_size % 32 != 0 {
            bail!("模型输入边长必须是32的倍数: {}", args.input_size);
        }

        Ok(Self {
            detector: DetectorSettings {
                conf_threshold: args.conf,
                iou_threshold: args.iou,
                input_size: args.input_size,
                classes,
            },
            tracker: file.tracker,
            region: args.region.clone().or(file.region),
        })
    }
}

/// 类别名或数字ID → COCO ID
pub fn parse_classes(labels: &[String]) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let id = match label.parse::<u32>() {
            Ok(id) if (id as usize) < COCO_CLASSES.len() => id,
            Ok(id) => bail!("类别ID超出范围: {}", id),
            Err(_) => class_id(label).with_context(|| format!("未知类别: {}", label))?,
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        bail!("至少需要一个计数类别");
    }
    Ok(ids)
}
