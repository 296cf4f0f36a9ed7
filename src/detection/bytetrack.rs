//! ByteTrack 算法实现
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IoU)
//! 3. 低分框救援丢失的轨迹
//! 4. 纯运动模型,无需外观特征
//!
//! 车辆计数只需要稳定的ID: 类别随轨迹创建固定,不随后续检测漂移。

use serde::{Deserialize, Serialize};

use super::tracker::{compute_iou, KalmanBoxFilter};
use super::types::BBox;

/// 跟踪参数 (可由 JSON 配置覆盖)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// 最大允许丢失帧数
    pub max_lost_frames: u32,
    /// 高分检测阈值
    pub high_score_threshold: f32,
    /// 低分检测阈值 (用于救援)
    pub low_score_threshold: f32,
    /// 高分匹配 IoU 阈值
    pub high_iou_threshold: f32,
    /// 低分匹配 IoU 阈值
    pub low_iou_threshold: f32,
    /// 卡尔曼过程噪声
    pub process_noise: f32,
    /// 卡尔曼观测噪声
    pub measurement_noise: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_lost_frames: 30, // 30帧(约1秒)
            high_score_threshold: 0.5,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.3,
            low_iou_threshold: 0.2,
            process_noise: 0.1,
            measurement_noise: 0.5,
        }
    }
}

/// 单条车辆轨迹
#[derive(Clone, Debug)]
pub struct VehicleTrack {
    /// 唯一跟踪ID (单次运行内不复用)
    pub id: u32,
    /// 当前边界框 (滤波平滑后)
    pub bbox: BBox,
    /// 类别 (创建时确定)
    pub class_id: u32,
    /// 最近一次匹配的检测置信度
    pub score: f32,
    /// 连续丢失帧数
    pub frames_lost: u32,
    /// 命中次数
    pub hits: u32,
    kalman: KalmanBoxFilter,
}

impl VehicleTrack {
    fn new(id: u32, det: &BBox, settings: &TrackerSettings) -> Self {
        let kalman = KalmanBoxFilter::new(det, settings.process_noise, settings.measurement_noise);
        Self {
            id,
            bbox: kalman.bbox(det.confidence, det.class_id),
            class_id: det.class_id,
            score: det.confidence,
            frames_lost: 0,
            hits: 1,
            kalman,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.bbox(self.score, self.class_id);
    }

    fn update(&mut self, det: &BBox) {
        self.kalman.update(det);
        self.score = det.confidence;
        self.bbox = self.kalman.bbox(self.score, self.class_id);
        self.frames_lost = 0;
        self.hits += 1;
    }

    fn mark_lost(&mut self) {
        self.frames_lost += 1;
    }

    /// 本帧是否有检测支撑
    pub fn is_active(&self) -> bool {
        self.frames_lost == 0
    }

    /// 中心点
    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<VehicleTrack>,
    next_id: u32,
    settings: TrackerSettings,
}

impl ByteTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            settings,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// 清空所有轨迹,ID 从1重新分配
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    pub fn tracks(&self) -> &[VehicleTrack] {
        &self.tracks
    }

    /// 更新跟踪 (ByteTrack 两轮匹配)
    pub fn update(&mut self, detections: &[BBox]) -> &[VehicleTrack] {
        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets = Vec::new();
        let mut low_dets = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.settings.high_score_threshold {
                high_dets.push(idx);
            } else if det.confidence >= self.settings.low_score_threshold {
                low_dets.push(idx);
            }
        }

        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        // 3. 第一轮: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let assignments = self.associate(
            detections,
            &high_dets,
            &all_tracks,
            self.settings.high_iou_threshold,
        );
        for (det_idx, track_idx) in assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
        }

        // 4. 第二轮: 低分检测 + 未匹配轨迹 (救援)
        let unmatched_tracks: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();
        let rescued = self.associate(
            detections,
            &low_dets,
            &unmatched_tracks,
            self.settings.low_iou_threshold,
        );
        for (det_idx, track_idx) in rescued {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
        }

        // 5. 未匹配轨迹 → 丢失
        for (track_idx, matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].mark_lost();
            }
        }

        // 6. 未匹配高分检测 → 新轨迹
        for det_idx in high_dets {
            if !matched_det[det_idx] {
                let track = VehicleTrack::new(self.next_id, &detections[det_idx], &self.settings);
                self.tracks.push(track);
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.settings.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        &self.tracks
    }

    /// 贪心 IoU 匹配,同类别才允许关联
    fn associate(
        &self,
        detections: &[BBox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            let det = &detections[det_idx];
            for &track_idx in track_indices {
                let track = &self.tracks[track_idx];
                if track.class_id != det.class_id {
                    continue;
                }
                let iou = compute_iou(det, &track.bbox);
                if iou >= iou_threshold {
                    candidates.push((iou, det_idx, track_idx));
                }
            }
        }

        // IoU 从大到小
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; self.tracks.len()];
        let mut assignments = Vec::new();
        for (_, det_idx, track_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                used_det[det_idx] = true;
                used_track[track_idx] = true;
                assignments.push((det_idx, track_idx));
            }
        }
        assignments
    }

    /// 跟踪统计信息
    pub fn stats(&self) -> String {
        format!(
            "跟踪: {} 辆 | 总ID: {}",
            self.tracks.iter().filter(|t| t.is_active()).count(),
            self.next_id - 1
        )
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(x: f32, conf: f32) -> BBox {
        BBox::new(x, 100.0, x + 60.0, 140.0, conf, 2)
    }

    #[test]
    fn test_id_persists_across_frames() {
        let mut tracker = ByteTracker::default();

        let first = tracker.update(&[car(10.0, 0.9)]);
        assert_eq!(first.len(), 1);
        let id = first[0].id;

        for step in 1..10 {
            let tracks = tracker.update(&[car(10.0 + step as f32 * 4.0, 0.9)]);
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].id, id);
            assert!(tracks[0].is_active());
        }
    }

    #[test]
    fn test_low_score_rescues_track() {
        let mut tracker = ByteTracker::default();
        let id = tracker.update(&[car(10.0, 0.9)])[0].id;

        // 低分框不新建轨迹,但能续上已有轨迹
        let tracks = tracker.update(&[car(12.0, 0.2)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, id);
        assert!(tracks[0].is_active());

        let mut fresh = ByteTracker::default();
        assert!(fresh.update(&[car(10.0, 0.2)]).is_empty());
    }

    #[test]
    fn test_lost_tracks_expire() {
        let settings = TrackerSettings {
            max_lost_frames: 2,
            ..TrackerSettings::default()
        };
        let mut tracker = ByteTracker::new(settings);
        tracker.update(&[car(10.0, 0.9)]);

        assert_eq!(tracker.update(&[]).len(), 1);
        assert_eq!(tracker.update(&[]).len(), 1);
        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn test_class_mismatch_not_associated() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[car(10.0, 0.9)]);

        let mut truck = car(10.0, 0.9);
        truck.class_id = 7;
        let tracks = tracker.update(&[truck]);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks.iter().filter(|t| t.is_active()).count(), 1);
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[car(10.0, 0.9), car(300.0, 0.9)]);
        tracker.reset();
        assert!(tracker.tracks().is_empty());
        assert_eq!(tracker.update(&[car(10.0, 0.9)])[0].id, 1);
    }

    #[test]
    fn test_settings_from_partial_json() {
        let settings: TrackerSettings =
            serde_json::from_str(r#"{"max_lost_frames": 10}"#).unwrap();
        assert_eq!(settings.max_lost_frames, 10);
        assert_eq!(
            settings.high_score_threshold,
            TrackerSettings::default().high_score_threshold
        );
    }
}
