/// 检测系统 (Detection System)
///
/// - Yolo:      ONNX 目标检测 (letterbox → 推理 → 解码 → NMS)
/// - ByteTrack: 多目标跟踪,为每辆车分配稳定ID
pub mod bytetrack;
pub mod tracker;
pub mod types;
pub mod yolo;

pub use bytetrack::{ByteTracker, TrackerSettings, VehicleTrack};
pub use types::{class_id, class_name, BBox, COCO_CLASSES, VEHICLE_CLASSES};
pub use yolo::{DetectorSettings, YoloDetector};
