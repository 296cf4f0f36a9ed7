//! 检测适配器 (Detector Adapter)
//!
//! 流水线与共享模型之间的薄封装:
//! - 每次运行开始时重置模型状态 (`begin_run`)
//! - 校验输入帧和标注帧的形状
//! - 把 Delta/Cumulative 两种计数语义统一成累计快照,且不低于上一帧

use std::sync::MutexGuard;

use tracing::warn;

use crate::counting::{ClassCountTable, CrossingRegion};
use crate::error::{PipelineError, Result};
use crate::models::{CountConvention, CountingModel, SharedModel};
use crate::video::{Frame, RGB_CHANNELS};

pub struct DetectorAdapter {
    model: SharedModel,
    resolution: Option<(u32, u32)>,
}

impl DetectorAdapter {
    /// 包装已构造的共享模型
    pub fn new(model: SharedModel) -> Self {
        Self {
            model,
            resolution: None,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn CountingModel + Send>>> {
        self.model
            .lock()
            .map_err(|_| PipelineError::detection(0, "模型锁已中毒"))
    }

    /// 新一次运行: 固定分辨率并清空模型的单次运行状态
    pub fn begin_run(&mut self, width: u32, height: u32) -> Result<()> {
        self.lock()?.reset();
        self.resolution = Some((width, height));
        Ok(())
    }

    pub fn model_name(&self) -> Result<String> {
        Ok(self.lock()?.name().to_string())
    }

    /// 处理一帧,返回 (标注帧, 新的累计计数)
    pub fn process(
        &mut self,
        frame: &Frame,
        region: &CrossingRegion,
        running: &ClassCountTable,
    ) -> Result<(Frame, ClassCountTable)> {
        let expected = self
            .resolution
            .ok_or_else(|| PipelineError::detection(frame.index, "未调用 begin_run"))?;

        if frame.dimensions() != expected {
            return Err(PipelineError::detection(
                frame.index,
                format!("分辨率 {:?} 与运行分辨率 {:?} 不一致", frame.dimensions(), expected),
            ));
        }
        if frame.channels != RGB_CHANNELS || !frame.is_well_formed() {
            return Err(PipelineError::detection(
                frame.index,
                format!("不支持的帧格式: {} 通道, {} 字节", frame.channels, frame.data.len()),
            ));
        }

        let (output, convention) = {
            let mut model = self.lock()?;
            let convention = model.convention();
            let output = model
                .infer(frame, region)
                .map_err(|e| PipelineError::detection(frame.index, format!("{:#}", e)))?;
            (output, convention)
        };

        if output.annotated.dimensions() != expected {
            return Err(PipelineError::detection(
                frame.index,
                format!(
                    "标注帧尺寸 {:?} 与输入 {:?} 不一致",
                    output.annotated.dimensions(),
                    expected
                ),
            ));
        }

        let counts = match convention {
            CountConvention::Delta => running.add(&output.counts),
            CountConvention::Cumulative => {
                let (counts, raised) = output.counts.max_with(running);
                if raised {
                    warn!("⚠️ 第{}帧模型计数回退, 已保持为上一帧的值", frame.index);
                }
                counts
            }
        };

        Ok((output.annotated, counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::ClassCounts;
    use crate::testing::{shared, CumulativeModel, EveryNthCarModel, ResizingModel};

    fn region() -> CrossingRegion {
        CrossingRegion::default_for(64, 48)
    }

    #[test]
    fn test_delta_counts_accumulate() {
        let mut adapter = DetectorAdapter::new(shared(EveryNthCarModel::new(3)));
        adapter.begin_run(64, 48).unwrap();

        let mut counts = ClassCountTable::new();
        for i in 0..6 {
            let (annotated, next) = adapter
                .process(&Frame::filled(i, 64, 48, [0, 0, 0]), &region(), &counts)
                .unwrap();
            assert_eq!(annotated.dimensions(), (64, 48));
            assert!(next.dominates(&counts));
            counts = next;
        }
        assert_eq!(counts.get("car"), Some(ClassCounts::new(2, 0)));
    }

    #[test]
    fn test_cumulative_regression_is_clamped() {
        // 模型第3帧起把计数报回0
        let mut adapter = DetectorAdapter::new(shared(CumulativeModel::new(vec![1, 2, 0, 3])));
        adapter.begin_run(64, 48).unwrap();

        let mut counts = ClassCountTable::new();
        let mut seen = Vec::new();
        for i in 0..4 {
            let (_, next) = adapter
                .process(&Frame::filled(i, 64, 48, [0, 0, 0]), &region(), &counts)
                .unwrap();
            counts = next;
            seen.push(counts.get("car").unwrap().entered);
        }
        assert_eq!(seen, vec![1, 2, 2, 3]);
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let mut adapter = DetectorAdapter::new(shared(EveryNthCarModel::new(3)));
        let frame = Frame::filled(0, 64, 48, [0, 0, 0]);
        assert!(adapter
            .process(&frame, &region(), &ClassCountTable::new())
            .is_err());

        adapter.begin_run(64, 48).unwrap();
        let wrong = Frame::filled(1, 32, 48, [0, 0, 0]);
        assert!(matches!(
            adapter.process(&wrong, &region(), &ClassCountTable::new()),
            Err(PipelineError::Detection { frame: 1, .. })
        ));

        let mut gray = Frame::filled(2, 64, 48, [0, 0, 0]);
        gray.channels = 1;
        gray.data.truncate(64 * 48);
        assert!(matches!(
            adapter.process(&gray, &region(), &ClassCountTable::new()),
            Err(PipelineError::Detection { frame: 2, .. })
        ));
    }

    #[test]
    fn test_rejects_resized_annotation() {
        let mut adapter = DetectorAdapter::new(shared(ResizingModel));
        adapter.begin_run(64, 48).unwrap();
        let err = adapter
            .process(&Frame::filled(0, 64, 48, [0, 0, 0]), &region(), &ClassCountTable::new())
            .unwrap_err();
        assert_eq!(err.kind(), "Detection");
    }

    #[test]
    fn test_begin_run_resets_model() {
        // 累计型模型内部保存计数,不重置的话第二次运行会从1开始累加
        let model = shared(EveryNthCarModel::cumulative(1));
        let mut adapter = DetectorAdapter::new(model.clone());

        adapter.begin_run(64, 48).unwrap();
        adapter
            .process(&Frame::filled(0, 64, 48, [0, 0, 0]), &region(), &ClassCountTable::new())
            .unwrap();

        adapter.begin_run(64, 48).unwrap();
        let (_, counts) = adapter
            .process(&Frame::filled(0, 64, 48, [0, 0, 0]), &region(), &ClassCountTable::new())
            .unwrap();
        assert_eq!(counts.get("car"), Some(ClassCounts::new(1, 0)));
        assert_eq!(adapter.model_name().unwrap(), "every-nth-car");
    }

    #[test]
    fn test_poisoned_model_is_detection_error() {
        let model = shared(EveryNthCarModel::new(3));
        let mut adapter = DetectorAdapter::new(model.clone());
        adapter.begin_run(64, 48).unwrap();

        // 持锁线程崩溃后锁中毒
        let poisoner = model.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("模型线程崩溃");
        })
        .join();
        assert!(model.is_poisoned());

        assert_eq!(adapter.model_name().unwrap_err().kind(), "Detection");
        let err = adapter
            .process(&Frame::filled(0, 64, 48, [0, 0, 0]), &region(), &ClassCountTable::new())
            .unwrap_err();
        assert_eq!(err.kind(), "Detection");
        assert_eq!(adapter.begin_run(64, 48).unwrap_err().kind(), "Detection");
    }
}
