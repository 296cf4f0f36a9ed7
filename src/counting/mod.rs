/// 计数系统 (Counting)
///
/// - Region:  计数线/多边形
/// - Table:   分类别进出计数
/// - Counter: 按跟踪ID判定穿越
pub mod counter;
pub mod region;
pub mod table;

pub use counter::{crossing_direction, Direction, RegionCounter};
pub use region::CrossingRegion;
pub use table::{ClassCountTable, ClassCounts};
