//! 帧标注: 计数区域、车辆框、ID 标签、计数面板
//!
//! 默认使用内置的 DejaVu Sans (assets/font), `--font` 可替换。

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::counting::{ClassCountTable, CrossingRegion};
use crate::detection::tracker::class_color;
use crate::detection::{class_name, VehicleTrack};
use crate::video::Frame;

const REGION_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const PANEL_BG: Rgb<u8> = Rgb([32, 32, 32]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 内置字体
const DEFAULT_FONT: &[u8] = include_bytes!("../assets/font/DejaVuSans.ttf");

/// 标注器
pub struct Annotator {
    font: Option<FontArc>,
    /// 线宽 (像素)
    line_width: u32,
    /// 字号
    scale: PxScale,
}

impl Annotator {
    /// 加载字体文件; `None` 时使用内置字体
    pub fn new(font_path: Option<&Path>) -> Result<Self> {
        let font = match font_path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("读取字体失败: {}", path.display()))?;
                let font = FontArc::try_from_vec(bytes)
                    .with_context(|| format!("解析字体失败: {}", path.display()))?;
                info!("🔤 标注字体: {}", path.display());
                Some(font)
            }
            None => match FontArc::try_from_slice(DEFAULT_FONT) {
                Ok(font) => Some(font),
                Err(e) => {
                    warn!("⚠️ 内置字体不可用 ({}), 输出视频只绘制区域和检测框", e);
                    None
                }
            },
        };

        Ok(Self {
            font,
            line_width: 2,
            scale: PxScale::from(18.0),
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 返回标注后的新帧 (尺寸与输入一致)
    pub fn draw(
        &self,
        frame: &Frame,
        region: &CrossingRegion,
        tracks: &[VehicleTrack],
        counts: &ClassCountTable,
    ) -> Result<Frame> {
        let mut canvas = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .context("帧数据长度与尺寸不符")?;

        self.draw_region(&mut canvas, region);
        for track in tracks.iter().filter(|t| t.is_active()) {
            self.draw_track(&mut canvas, track);
        }
        self.draw_panel(&mut canvas, counts);

        Ok(Frame::rgb(
            frame.index,
            frame.width,
            frame.height,
            canvas.into_raw(),
        ))
    }

    fn draw_region(&self, canvas: &mut RgbImage, region: &CrossingRegion) {
        let points = region.points();
        let mut edges: Vec<((f32, f32), (f32, f32))> =
            points.windows(2).map(|w| (w[0], w[1])).collect();
        if !region.is_line() {
            edges.push((points[points.len() - 1], points[0]));
        }

        for (a, b) in edges {
            // 沿法线方向加粗
            let (dx, dy) = (b.0 - a.0, b.1 - a.1);
            let len = dx.hypot(dy);
            if len <= f32::EPSILON {
                continue;
            }
            let (nx, ny) = (-dy / len, dx / len);
            let half = (self.line_width / 2) as f32;

            for offset in 0..self.line_width {
                let o = offset as f32 - half;
                draw_line_segment_mut(
                    canvas,
                    (a.0 + nx * o, a.1 + ny * o),
                    (b.0 + nx * o, b.1 + ny * o),
                    REGION_COLOR,
                );
            }
        }
    }

    fn draw_track(&self, canvas: &mut RgbImage, track: &VehicleTrack) {
        let (r, g, b) = class_color(track.class_id);
        let color = Rgb([r, g, b]);

        let x = track.bbox.x1.round() as i32;
        let y = track.bbox.y1.round() as i32;
        let w = (track.bbox.width().round() as u32).max(1);
        let h = (track.bbox.height().round() as u32).max(1);

        for i in 0..self.line_width {
            let (w, h) = (w.saturating_sub(2 * i).max(1), h.saturating_sub(2 * i).max(1));
            draw_hollow_rect_mut(
                canvas,
                Rect::at(x + i as i32, y + i as i32).of_size(w, h),
                color,
            );
        }

        if let Some(font) = &self.font {
            let label = format!("{} #{}", class_name(track.class_id), track.id);
            let (tw, th) = text_size(self.scale, font, &label);
            let ty = (y - th as i32 - 4).max(0);
            draw_filled_rect_mut(canvas, Rect::at(x, ty).of_size(tw + 4, th + 4), color);
            draw_text_mut(canvas, TEXT_COLOR, x + 2, ty + 2, self.scale, font, &label);
        }
    }

    fn draw_panel(&self, canvas: &mut RgbImage, counts: &ClassCountTable) {
        let Some(font) = &self.font else {
            return;
        };
        if counts.is_empty() {
            return;
        }

        let lines: Vec<String> = counts
            .iter()
            .map(|(label, c)| format!("{} IN {} OUT {}", label, c.entered, c.exited))
            .collect();

        let mut width = 0;
        let mut line_height = 0;
        for line in &lines {
            let (w, h) = text_size(self.scale, font, line);
            width = width.max(w);
            line_height = line_height.max(h);
        }
        let line_height = line_height + 6;

        draw_filled_rect_mut(
            canvas,
            Rect::at(8, 8).of_size(width + 12, line_height * lines.len() as u32 + 6),
            PANEL_BG,
        );
        for (i, line) in lines.iter().enumerate() {
            let y = 12 + (i as u32 * line_height) as i32;
            draw_text_mut(canvas, TEXT_COLOR, 14, y, self.scale, font, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::ClassCounts;
    use crate::detection::{BBox, ByteTracker};

    #[test]
    fn test_draw_keeps_dimensions() {
        let annotator = Annotator::new(None).unwrap();
        assert!(annotator.has_font());

        let frame = Frame::filled(3, 160, 120, [0, 0, 0]);
        let region = CrossingRegion::default_for(160, 120);

        let mut tracker = ByteTracker::default();
        let tracks = tracker
            .update(&[BBox::new(10.0, 10.0, 50.0, 40.0, 0.9, 2)])
            .to_vec();

        let out = annotator
            .draw(&frame, &region, &tracks, &ClassCountTable::new())
            .unwrap();

        assert_eq!(out.dimensions(), (160, 120));
        assert_eq!(out.index, 3);
        assert!(out.is_well_formed());

        // 区域线 x=80 被绘制
        let px = ((60 * 160 + 80) * 3) as usize;
        assert_eq!(&out.data[px..px + 3], &REGION_COLOR.0);

        // 框左上角被绘制
        let (r, g, b) = class_color(2);
        let px = ((10 * 160 + 10) * 3) as usize;
        assert_eq!(&out.data[px..px + 3], &[r, g, b]);
    }

    #[test]
    fn test_default_font_draws_count_panel() {
        let annotator = Annotator::new(None).unwrap();
        let frame = Frame::filled(0, 200, 120, [0, 0, 0]);
        let region = CrossingRegion::default_for(200, 120);
        let counts: ClassCountTable = [("car", ClassCounts::new(3, 1))].into_iter().collect();

        let out = annotator.draw(&frame, &region, &[], &counts).unwrap();

        // 面板左上角: 背景色
        let px = ((10 * 200 + 10) * 3) as usize;
        assert_eq!(&out.data[px..px + 3], &PANEL_BG.0);

        // 面板内有文字像素
        let bright = (8..30u32)
            .flat_map(|y| (8..80u32).map(move |x| ((y * 200 + x) * 3) as usize))
            .filter(|&i| out.data[i] > 128 && out.data[i + 1] > 128 && out.data[i + 2] > 128)
            .count();
        assert!(bright > 0);
    }

    #[test]
    fn test_horizontal_region_is_thick() {
        let annotator = Annotator::new(None).unwrap();
        let frame = Frame::filled(0, 64, 48, [0, 0, 0]);
        let region = CrossingRegion::line((0.0, 30.0), (63.0, 30.0));

        let out = annotator
            .draw(&frame, &region, &[], &ClassCountTable::new())
            .unwrap();

        let painted: Vec<u32> = (25..36u32)
            .filter(|y| {
                let px = ((y * 64 + 40) * 3) as usize;
                out.data[px..px + 3] == REGION_COLOR.0
            })
            .collect();
        assert_eq!(painted.len(), annotator.line_width as usize);
        assert!(painted.contains(&30));
    }

    #[test]
    fn test_missing_font_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Annotator::new(Some(&dir.path().join("nope.ttf"))).is_err());
    }
}
