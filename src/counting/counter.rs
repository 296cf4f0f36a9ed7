//! 区域穿越计数
//!
//! 每个跟踪ID只计一次:
//! - 线: 上一帧中心 → 当前中心 的连线与区域线相交时计数
//!   竖线按 x 增大为进, 其余按 y 增大为进
//! - 多边形: 当前中心落入区域时计数
//!   区域宽 < 高 时按 x 增大为进, 否则按 y 增大为进

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::region::CrossingRegion;
use super::table::ClassCountTable;
use crate::detection::{class_name, VehicleTrack};

/// 穿越方向
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// 穿越计数器 (单次运行内有效, 新运行前需 reset)
#[derive(Debug, Default)]
pub struct RegionCounter {
    table: ClassCountTable,
    counted: HashSet<u32>,
    last_centroid: HashMap<u32, (f32, f32)>,
}

impl RegionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.table = ClassCountTable::new();
        self.counted.clear();
        self.last_centroid.clear();
    }

    pub fn counts(&self) -> &ClassCountTable {
        &self.table
    }

    pub fn counted_ids(&self) -> usize {
        self.counted.len()
    }

    /// 处理本帧所有轨迹, 返回新产生的穿越事件
    pub fn update(
        &mut self,
        tracks: &[VehicleTrack],
        region: &CrossingRegion,
    ) -> Vec<(u32, Direction)> {
        let mut events = Vec::new();
        for track in tracks.iter().filter(|t| t.is_active()) {
            let label = class_name(track.class_id);
            if let Some(direction) = self.observe(track.id, &label, track.center(), region) {
                events.push((track.id, direction));
            }
        }

        // 跟踪器已丢弃的ID不再需要历史位置
        self.last_centroid
            .retain(|id, _| tracks.iter().any(|t| t.id == *id));

        events
    }

    /// 处理单个轨迹的当前中心点
    pub fn observe(
        &mut self,
        track_id: u32,
        label: &str,
        centroid: (f32, f32),
        region: &CrossingRegion,
    ) -> Option<Direction> {
        self.table.observe(label);

        let previous = self.last_centroid.insert(track_id, centroid)?;
        if self.counted.contains(&track_id) {
            return None;
        }

        let direction = crossing_direction(region, previous, centroid)?;
        self.counted.insert(track_id);
        match direction {
            Direction::In => self.table.record_in(label),
            Direction::Out => self.table.record_out(label),
        }
        debug!("🚗 #{} {} {:?}", track_id, label, direction);
        Some(direction)
    }
}

/// 判断 prev → current 是否穿越区域以及方向
pub fn crossing_direction(
    region: &CrossingRegion,
    prev: (f32, f32),
    current: (f32, f32),
) -> Option<Direction> {
    let forward = |along_x: bool| {
        let moved = if along_x {
            current.0 > prev.0
        } else {
            current.1 > prev.1
        };
        if moved {
            Direction::In
        } else {
            Direction::Out
        }
    };

    if region.is_line() {
        if !region.crossed_by(prev, current) {
            return None;
        }
        Some(forward(region.is_mostly_vertical()))
    } else {
        if !region.contains(current) {
            return None;
        }
        let (x0, y0, x1, y1) = region.bounds();
        Some(forward(x1 - x0 < y1 - y0))
    }
}
