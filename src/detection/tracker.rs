//! 跟踪公共组件
//! Kalman box filter, IoU and per-class colours

use super::types::BBox;

// ========== 卡尔曼滤波器 ==========

/// 匀速模型的边界框滤波器
/// 状态向量: [cx, cy, w, h, vx, vy, vw, vh], 协方差简化为对角阵
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    p: [f32; 8],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
}

impl KalmanBoxFilter {
    /// - `q`: 过程噪声 (越小越平滑)
    /// - `r`: 观测噪声 (越大越信任预测)
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            state: [cx, cy, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0, 10.0, 10.0, 10.0, 100.0, 100.0, 100.0, 100.0],
            q,
            r,
        }
    }

    /// 预测下一帧
    pub fn predict(&mut self) {
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
            self.p[i] += self.p[i + 4] + self.q;
            self.p[i + 4] += self.q * 0.1;
        }
        // 尺寸不能为负
        self.state[2] = self.state[2].max(1.0);
        self.state[3] = self.state[3].max(1.0);
    }

    /// 融合观测
    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        let z = [cx, cy, bbox.width(), bbox.height()];

        for i in 0..4 {
            let residual = z[i] - self.state[i];
            let k = self.p[i] / (self.p[i] + self.r);
            let kv = self.p[i + 4] / (self.p[i + 4] + self.r * 10.0);

            self.state[i] += k * residual;
            self.state[i + 4] += kv * residual;
            self.p[i] *= 1.0 - k;
            self.p[i + 4] *= 1.0 - kv;
        }
    }

    /// 当前状态对应的边界框 (置信度/类别由调用方填写)
    pub fn bbox(&self, confidence: f32, class_id: u32) -> BBox {
        let [cx, cy, w, h, ..] = self.state;
        let (w, h) = (w.max(1.0), h.max(1.0));
        BBox::new(
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
            confidence,
            class_id,
        )
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.state[4], self.state[5])
    }
}

// ========== 工具函数 ==========

/// 两个边界框的 IoU
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// 按类别取颜色 (黄金角度采样色相)
pub fn class_color(class_id: u32) -> (u8, u8, u8) {
    let hue = (class_id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.85, 0.95)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
