/// 检测数据结构定义
/// Data structures shared by detector, tracker and counter

/// YOLO 推理输入尺寸 (默认)
pub const INF_SIZE: u32 = 640;

/// COCO 80 类名称 (ultralytics 导出模型的类别顺序)
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// 默认计数类别: car, motorcycle, bus, truck
pub const VEHICLE_CLASSES: [u32; 4] = [2, 3, 5, 7];

/// 类别ID → 名称 (越界时返回 `class_{id}`)
pub fn class_name(class_id: u32) -> String {
    COCO_CLASSES
        .get(class_id as usize)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// 名称 → 类别ID (忽略大小写和首尾空白)
pub fn class_id(name: &str) -> Option<u32> {
    let name = name.trim().to_ascii_lowercase();
    COCO_CLASSES
        .iter()
        .position(|c| *c == name)
        .map(|i| i as u32)
}

/// 检测框 (帧坐标, 左上/右下)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 裁剪到帧范围内
    pub fn clamp_to(&mut self, width: u32, height: u32) {
        let (w, h) = (width as f32, height as f32);
        self.x1 = self.x1.clamp(0.0, w);
        self.y1 = self.y1.clamp(0.0, h);
        self.x2 = self.x2.clamp(0.0, w);
        self.y2 = self.y2.clamp(0.0, h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_class_names() {
        let names: Vec<String> = VEHICLE_CLASSES.iter().map(|&id| class_name(id)).collect();
        assert_eq!(names, vec!["car", "motorcycle", "bus", "truck"]);
        assert_eq!(class_id(" Truck "), Some(7));
        assert_eq!(class_id("spaceship"), None);
        assert_eq!(class_name(99), "class_99");
    }

    #[test]
    fn test_bbox_clamp() {
        let mut b = BBox::new(-5.0, 10.0, 700.0, 490.0, 0.9, 2);
        b.clamp_to(640, 480);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (0.0, 10.0, 640.0, 480.0));
        assert_eq!(b.center(), (320.0, 245.0));
    }
}
