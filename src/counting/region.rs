//! 计数区域 (线段或多边形, 帧坐标)

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// 计数区域: 2个点为线, ≥3个点为多边形
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f32; 2]>", into = "Vec<[f32; 2]>")]
pub struct CrossingRegion {
    points: Vec<(f32, f32)>,
}

impl CrossingRegion {
    pub fn new(points: Vec<(f32, f32)>) -> anyhow::Result<Self> {
        if points.len() < 2 {
            bail!("计数区域至少需要2个点, 实际 {}", points.len());
        }
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            bail!("计数区域包含非法坐标: {:?}", points);
        }
        Ok(Self { points })
    }

    /// 线段区域
    pub fn line(a: (f32, f32), b: (f32, f32)) -> Self {
        Self { points: vec![a, b] }
    }

    /// 默认区域: 画面正中的竖线
    pub fn default_for(width: u32, height: u32) -> Self {
        let x = (width / 2) as f32;
        Self::line((x, 0.0), (x, height as f32))
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    pub fn is_line(&self) -> bool {
        self.points.len() == 2
    }

    /// 包围盒 (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }

    /// 线段是否更接近竖直 (|dx| < |dy|)
    pub fn is_mostly_vertical(&self) -> bool {
        let (a, b) = (self.points[0], self.points[self.points.len() - 1]);
        (a.0 - b.0).abs() < (a.1 - b.1).abs()
    }

    /// 线段 p→q 是否与区域线相交 (含端点接触)
    pub fn crossed_by(&self, p: (f32, f32), q: (f32, f32)) -> bool {
        self.points
            .windows(2)
            .any(|edge| segments_intersect(edge[0], edge[1], p, q))
    }

    /// 点是否在多边形内部 (射线法)
    pub fn contains(&self, p: (f32, f32)) -> bool {
        if self.is_line() {
            return false;
        }
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.points[i];
            let (xj, yj) = self.points[j];
            if (yi > p.1) != (yj > p.1) && p.0 < (xj - xi) * (p.1 - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

impl TryFrom<Vec<[f32; 2]>> for CrossingRegion {
    type Error = anyhow::Error;

    fn try_from(points: Vec<[f32; 2]>) -> anyhow::Result<Self> {
        Self::new(points.into_iter().map(|[x, y]| (x, y)).collect())
    }
}

impl From<CrossingRegion> for Vec<[f32; 2]> {
    fn from(region: CrossingRegion) -> Self {
        region.points.into_iter().map(|(x, y)| [x, y]).collect()
    }
}

/// 解析 `x,y;x,y;...`
impl FromStr for CrossingRegion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let points = s
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                let (x, y) = p
                    .split_once(',')
                    .with_context(|| format!("坐标格式应为 x,y: {:?}", p))?;
                let x: f32 = x.trim().parse().with_context(|| format!("非法x坐标: {:?}", x))?;
                let y: f32 = y.trim().parse().with_context(|| format!("非法y坐标: {:?}", y))?;
                Ok((x, y))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(points)
    }
}

impl fmt::Display for CrossingRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .points
            .iter()
            .map(|(x, y)| format!("{},{}", x, y))
            .collect();
        write!(f, "{}", parts.join(";"))
    }
}

fn orientation(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn on_segment(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> bool {
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

fn segments_intersect(a: (f32, f32), b: (f32, f32), c: (f32, f32), d: (f32, f32)) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(c, d, a))
        || (d2 == 0.0 && on_segment(c, d, b))
        || (d3 == 0.0 && on_segment(a, b, c))
        || (d4 == 0.0 && on_segment(a, b, d))
}
