// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLO ONNX 检测器
// 包含: 模型加载、预处理 (letterbox)、推理、后处理 (解码 + NMS)

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tracker::compute_iou;
use super::types::{BBox, INF_SIZE, VEHICLE_CLASSES};
use crate::models::ComputeDevice;
use crate::video::{Frame, RGB_CHANNELS};

/// letterbox 填充灰度 (144/255)
const PAD_VALUE: f32 = 144.0 / 255.0;

/// 检测参数
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// 置信度阈值
    pub conf_threshold: f32,
    /// NMS IoU 阈值
    pub iou_threshold: f32,
    /// 模型输入边长
    pub input_size: u32,
    /// 保留的类别ID (空 = 全部)
    pub classes: Vec<u32>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: INF_SIZE,
            classes: VEHICLE_CLASSES.to_vec(),
        }
    }
}

/// YOLOv8/v11 检测头 (输出 [1, 4+nc, N])
pub struct YoloDetector {
    session: Session,
    input_name: String,
    settings: DetectorSettings,
    frames: u64,
}

impl YoloDetector {
    /// 加载 ONNX 模型
    pub fn load(model_path: &Path, device: ComputeDevice, settings: DetectorSettings) -> Result<Self> {
        let t = Instant::now();

        let builder = Session::builder().context("创建 ORT SessionBuilder 失败")?;
        let builder = match device {
            ComputeDevice::Accelerated => builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .context("注册 CUDA 执行器失败")?,
            ComputeDevice::General => builder
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .context("注册 CPU 执行器失败")?,
        };
        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("加载模型失败: {}", model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("模型没有输入")?;

        info!(
            "✅ 模型加载完成: {} | 设备 {:?} | 输入 {}x{} | 耗时 {:?}",
            model_path.display(),
            device,
            settings.input_size,
            settings.input_size,
            t.elapsed()
        );

        Ok(Self {
            session,
            input_name,
            settings,
            frames: 0,
        })
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// 检测一帧 (返回帧坐标下、NMS 之后的框)
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BBox>> {
        let t_pre = Instant::now();
        let (input, ratio) = letterbox(frame, self.settings.input_size)?;
        let tensor = Tensor::from_array(input).context("创建输入张量失败")?;
        let pre = t_pre.elapsed();

        let t_run = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("YOLO 推理失败")?;
        let run = t_run.elapsed();

        let t_post = Instant::now();
        let (_, output) = outputs.iter().next().context("模型没有输出")?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .context("提取输出张量失败")?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let boxes = decode_predictions(data, &dims, ratio, frame.width, frame.height, &self.settings)?;

        self.frames += 1;
        if self.frames % 30 == 0 {
            debug!(
                "⏱️ 预处理 {:?} | 推理 {:?} | 后处理 {:?} | 检测 {} 个",
                pre,
                run,
                t_post.elapsed(),
                boxes.len()
            );
        }

        Ok(boxes)
    }
}

/// 等比缩放到左上角,其余区域填灰,输出 NCHW [0,1]
///
/// 返回 (输入张量, 缩放比例)
pub fn letterbox(frame: &Frame, size: u32) -> Result<(Array4<f32>, f32)> {
    if frame.channels != RGB_CHANNELS || !frame.is_well_formed() {
        bail!(
            "帧格式不支持: {}x{}x{} ({} 字节)",
            frame.width,
            frame.height,
            frame.channels,
            frame.data.len()
        );
    }

    let ratio = (size as f32 / frame.width as f32).min(size as f32 / frame.height as f32);
    let new_w = ((frame.width as f32 * ratio).round() as u32).clamp(1, size);
    let new_h = ((frame.height as f32 * ratio).round() as u32).clamp(1, size);

    let src = fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
        .context("创建缩放源图失败")?;
    let mut dst = fr::images::Image::new(new_w, new_h, fr::PixelType::U8x3);
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("缩放失败")?;

    let size = size as usize;
    let mut input = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);
    let raw = dst.buffer();
    for (i, rgb) in raw.chunks_exact(3).enumerate() {
        let y = i / new_w as usize;
        let x = i % new_w as usize;
        input[[0, 0, y, x]] = rgb[0] as f32 / 255.0;
        input[[0, 1, y, x]] = rgb[1] as f32 / 255.0;
        input[[0, 2, y, x]] = rgb[2] as f32 / 255.0;
    }

    Ok((input, ratio))
}

/// 解码检测头输出
///
/// 支持 [1, 4+nc, N] 和转置后的 [1, N, 4+nc]; 框格式 cx, cy, w, h (输入坐标系)
pub fn decode_predictions(
    data: &[f32],
    dims: &[usize],
    ratio: f32,
    frame_width: u32,
    frame_height: u32,
    settings: &DetectorSettings,
) -> Result<Vec<BBox>> {
    if dims.len() != 3 || dims[0] != 1 {
        bail!("不支持的输出形状: {:?}", dims);
    }

    let (rows, cols) = (dims[1], dims[2]);
    let transposed = rows > cols;
    let (features, anchors) = if transposed { (cols, rows) } else { (rows, cols) };
    if features <= 4 {
        bail!("输出缺少类别分数: {:?}", dims);
    }
    if data.len() < features * anchors {
        bail!("输出长度 {} 与形状 {:?} 不符", data.len(), dims);
    }

    let at = |f: usize, i: usize| {
        if transposed {
            data[i * features + f]
        } else {
            data[f * anchors + i]
        }
    };

    let mut boxes = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (4..features)
            .map(|f| ((f - 4) as u32, at(f, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < settings.conf_threshold {
            continue;
        }
        if !settings.classes.is_empty() && !settings.classes.contains(&class_id) {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let mut bbox = BBox::new(
            (cx - w / 2.0) / ratio,
            (cy - h / 2.0) / ratio,
            (cx + w / 2.0) / ratio,
            (cy + h / 2.0) / ratio,
            confidence,
            class_id,
        );
        bbox.clamp_to(frame_width, frame_height);
        if bbox.area() <= 0.0 {
            continue;
        }
        boxes.push(bbox);
    }

    Ok(non_max_suppression(boxes, settings.iou_threshold))
}

/// 按类别的贪心 NMS
pub fn non_max_suppression(mut boxes: Vec<BBox>, iou_threshold: f32) -> Vec<BBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && compute_iou(k, &candidate) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
