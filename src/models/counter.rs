// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ObjectCounter 完整模型实现
// 包含: 检测 (YOLO)、跟踪 (ByteTrack)、区域计数、标注

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::{ComputeDevice, CountConvention, CountingModel, ModelOutput};
use crate::annotate::Annotator;
use crate::counting::{CrossingRegion, RegionCounter};
use crate::detection::{
    class_name, ByteTracker, DetectorSettings, TrackerSettings, YoloDetector,
};
use crate::video::Frame;

/// ObjectCounter 构造参数
#[derive(Clone, Debug)]
pub struct ObjectCounterConfig {
    /// ONNX 权重路径
    pub model_path: PathBuf,
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    /// 标注字体 (可选)
    pub font: Option<PathBuf>,
}

/// 车辆计数模型: 检测 → 跟踪 → 穿越计数 → 标注
///
/// 计数为累计值 (`CountConvention::Cumulative`), `reset` 之后从零开始。
pub struct ObjectCounter {
    name: String,
    detector: YoloDetector,
    tracker: ByteTracker,
    counter: RegionCounter,
    annotator: Annotator,
    frames: u64,
}

impl ObjectCounter {
    pub fn load(config: ObjectCounterConfig, device: ComputeDevice) -> Result<Self> {
        let name = config
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "yolo".to_string());

        let classes: Vec<String> = config
            .detector
            .classes
            .iter()
            .map(|&id| class_name(id))
            .collect();
        info!(
            "🚀 加载计数模型 {} | 设备 {} | 类别 {:?} | conf {} | iou {}",
            name,
            device,
            classes,
            config.detector.conf_threshold,
            config.detector.iou_threshold
        );

        let detector = YoloDetector::load(&config.model_path, device, config.detector)
            .context("检测器初始化失败")?;
        let annotator = Annotator::new(config.font.as_deref())?;

        Ok(Self {
            name,
            detector,
            tracker: ByteTracker::new(config.tracker),
            counter: RegionCounter::new(),
            annotator,
            frames: 0,
        })
    }
}

impl CountingModel for ObjectCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn convention(&self) -> CountConvention {
        CountConvention::Cumulative
    }

    fn reset(&mut self) {
        self.tracker.reset();
        self.counter.reset();
        self.frames = 0;
        debug!("🔄 {} 状态已重置", self.name);
    }

    fn infer(&mut self, frame: &Frame, region: &CrossingRegion) -> Result<ModelOutput> {
        let boxes = self.detector.detect(frame)?;
        let tracks = self.tracker.update(&boxes);
        self.counter.update(tracks, region);

        let annotated = self
            .annotator
            .draw(frame, region, tracks, self.counter.counts())?;

        self.frames += 1;
        if self.frames % 30 == 0 {
            debug!("📊 {} | 已计数 {} 辆", self.tracker.stats(), self.counter.counted_ids());
        }

        Ok(ModelOutput {
            annotated,
            counts: self.counter.counts().clone(),
        })
    }
}
