//! 31 位定点坐标几何
//!
//! 职责：
//! - `PointI` / `AreaI`: 全世界 2^31 地址空间内的整数点与矩形
//! - `TileId`: (x, y) 瓦片号，结合缩放级别得到 31 位包围盒
//! - 射线求交、多边形面积等整数几何工具
//!
//! 坐标系：x 向东增长，y 向南增长 (与屏幕坐标一致)。

use serde::{Deserialize, Serialize};

/// 缩放级别 (0..=31)
pub type ZoomLevel = u8;

pub const MIN_ZOOM_LEVEL: ZoomLevel = 0;
pub const MAX_ZOOM_LEVEL: ZoomLevel = 31;

/// 31 位整数点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PointI {
    pub x: i32,
    pub y: i32,
}

impl PointI {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 31 位整数矩形 (闭区间)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AreaI {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// 矩形的四条边，按顺时针遍历顺序编号 (y 向下)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Top = 0,
    Right = 1,
    Bottom = 2,
    Left = 3,
}

impl Edge {
    pub fn from_index(index: i32) -> Edge {
        match index.rem_euclid(4) {
            0 => Edge::Top,
            1 => Edge::Right,
            2 => Edge::Bottom,
            _ => Edge::Left,
        }
    }
}

impl AreaI {
    #[inline]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// 包含所有点的最小矩形
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a PointI>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut area = AreaI::new(first.x, first.y, first.x, first.y);
        for p in iter {
            area.enlarge_to_include(p);
        }
        Some(area)
    }

    pub fn enlarge_to_include(&mut self, p: &PointI) {
        self.left = self.left.min(p.x);
        self.right = self.right.max(p.x);
        self.top = self.top.min(p.y);
        self.bottom = self.bottom.max(p.y);
    }

    pub fn union(&self, other: &AreaI) -> AreaI {
        AreaI::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    #[inline]
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    #[inline]
    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    pub fn center(&self) -> PointI {
        PointI::new(
            ((i64::from(self.left) + i64::from(self.right)) / 2) as i32,
            ((i64::from(self.top) + i64::from(self.bottom)) / 2) as i32,
        )
    }

    #[inline]
    pub fn contains_point(&self, p: &PointI) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }

    /// `other` 是否完全位于本矩形内
    #[inline]
    pub fn contains(&self, other: &AreaI) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    #[inline]
    pub fn intersects(&self, other: &AreaI) -> bool {
        !(other.right < self.left
            || other.left > self.right
            || other.bottom < self.top
            || other.top > self.bottom)
    }

    /// 四边向下对齐到 2^shift 网格
    pub fn aligned(&self, shift: u32) -> AreaI {
        let mask = !((1i32 << shift) - 1);
        AreaI::new(
            self.left & mask,
            self.top & mask,
            self.right & mask,
            self.bottom & mask,
        )
    }

    /// 点是否位于矩形边上，返回所在边
    pub fn edge_of(&self, p: &PointI) -> Option<Edge> {
        let within_x = p.x >= self.left && p.x <= self.right;
        let within_y = p.y >= self.top && p.y <= self.bottom;
        if p.y == self.top && within_x {
            Some(Edge::Top)
        } else if p.x == self.right && within_y {
            Some(Edge::Right)
        } else if p.y == self.bottom && within_x {
            Some(Edge::Bottom)
        } else if p.x == self.left && within_y {
            Some(Edge::Left)
        } else {
            None
        }
    }

    /// 顺时针闭合的四角环 (左上 -> 右上 -> 右下 -> 左下 -> 左上)
    pub fn corner_ring(&self) -> Vec<PointI> {
        vec![
            PointI::new(self.left, self.top),
            PointI::new(self.right, self.top),
            PointI::new(self.right, self.bottom),
            PointI::new(self.left, self.bottom),
            PointI::new(self.left, self.top),
        ]
    }
}

/// 瓦片号 (不含缩放级别)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub x: i32,
    pub y: i32,
}

impl TileId {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 瓦片的 31 位包围盒 (右/下边界不含相邻瓦片的起点)
    pub fn bbox31(&self, zoom: ZoomLevel) -> AreaI {
        let shift = u32::from(MAX_ZOOM_LEVEL - zoom.min(MAX_ZOOM_LEVEL));
        let size = 1i64 << shift;
        let left = i64::from(self.x) << shift;
        let top = i64::from(self.y) << shift;
        AreaI::new(
            left as i32,
            top as i32,
            (left + size - 1).min(i64::from(i32::MAX)) as i32,
            (top + size - 1).min(i64::from(i32::MAX)) as i32,
        )
    }

    /// 包含 31 位点的瓦片
    pub fn from_point31(p: &PointI, zoom: ZoomLevel) -> TileId {
        let shift = u32::from(MAX_ZOOM_LEVEL - zoom.min(MAX_ZOOM_LEVEL));
        TileId::new(p.x >> shift, p.y >> shift)
    }
}

/// 与区域相交的全部瓦片
pub fn tiles_in_area(area: &AreaI, zoom: ZoomLevel) -> Vec<TileId> {
    let tl = TileId::from_point31(&PointI::new(area.left, area.top), zoom);
    let br = TileId::from_point31(&PointI::new(area.right, area.bottom), zoom);
    let mut tiles = Vec::with_capacity(((br.x - tl.x + 1) * (br.y - tl.y + 1)).max(0) as usize);
    for y in tl.y..=br.y {
        for x in tl.x..=br.x {
            tiles.push(TileId::new(x, y));
        }
    }
    tiles
}

// ============================================================================
// 多边形工具
// ============================================================================

/// 水平射线 y = middle_y 与线段的交点 x 坐标
///
/// 端点恰好落在射线上时将射线上移一个单位，避免重复计数。
pub fn ray_intersect_x(prev: &PointI, next: &PointI, middle_y: i32) -> Option<i32> {
    let (mut a, mut b) = (*prev, *next);
    if a.y > b.y {
        std::mem::swap(&mut a, &mut b);
    }
    let mut my = middle_y;
    if b.y == my || a.y == my {
        my -= 1;
    }
    if a.y > my || b.y < my {
        return None;
    }
    if b.y == a.y {
        return Some(b.x);
    }
    let rx = f64::from(b.x)
        + (f64::from(my) - f64::from(b.y)) * (f64::from(b.x) - f64::from(a.x))
            / (f64::from(b.y) - f64::from(a.y));
    Some(rx as i32)
}

/// 射线法判断点是否在环内
pub fn polygon_contains_point(ring: &[PointI], p: &PointI) -> bool {
    let mut inside = false;
    if ring.len() < 3 {
        return false;
    }
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x = f64::from(a.x)
                + (f64::from(p.y) - f64::from(a.y)) * (f64::from(b.x) - f64::from(a.x))
                    / (f64::from(b.y) - f64::from(a.y));
            if f64::from(p.x) < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// 鞋带公式计算的环面积 (31 位单位的平方，取绝对值)
pub fn polygon_area31(ring: &[PointI]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0.0f64;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        doubled += (f64::from(ring[j].x) + f64::from(ring[i].x))
            * (f64::from(ring[j].y) - f64::from(ring[i].y));
        j = i;
    }
    (doubled * 0.5).abs()
}

/// 点集的算术平均中心
pub fn points_center(points: &[PointI]) -> Option<PointI> {
    if points.is_empty() {
        return None;
    }
    let (sx, sy) = points.iter().fold((0i64, 0i64), |(sx, sy), p| {
        (sx + i64::from(p.x), sy + i64::from(p.y))
    });
    let n = points.len() as i64;
    Some(PointI::new((sx / n) as i32, (sy / n) as i32))
}

/// 在区域内寻找多边形的一个内部点
///
/// 以区域与多边形包围盒交集的中线为扫描线，取第一段完全落在区域内的内部区间中点。
pub fn interior_point_in_area(ring: &[PointI], area: &AreaI) -> Option<PointI> {
    let bbox = AreaI::from_points(ring)?;
    if !bbox.intersects(area) {
        return None;
    }
    let top = bbox.top.max(area.top);
    let bottom = bbox.bottom.min(area.bottom);
    let scan_y = ((i64::from(top) + i64::from(bottom)) / 2) as i32;
    let mut xs: Vec<i32> = ring
        .windows(2)
        .filter(|w| (w[0].y > scan_y) != (w[1].y > scan_y))
        .map(|w| {
            let (a, b) = (w[0], w[1]);
            (f64::from(a.x)
                + (f64::from(scan_y) - f64::from(a.y)) * (f64::from(b.x) - f64::from(a.x))
                    / (f64::from(b.y) - f64::from(a.y))) as i32
        })
        .collect();
    xs.sort_unstable();
    xs.chunks_exact(2)
        .map(|pair| {
            PointI::new(
                ((i64::from(pair[0]) + i64::from(pair[1])) / 2) as i32,
                scan_y,
            )
        })
        .find(|p| area.contains_point(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_bbox_round_trip() {
        let tile = TileId::new(34_567, 22_123);
        let bbox = tile.bbox31(16);
        assert_eq!(bbox.width(), (1 << 15) - 1);
        assert_eq!(TileId::from_point31(&bbox.center(), 16), tile);
    }

    #[test]
    fn test_contains_and_intersects() {
        let a = AreaI::new(0, 0, 100, 100);
        let b = AreaI::new(10, 10, 20, 20);
        let c = AreaI::new(90, 90, 200, 200);
        assert!(a.contains(&b));
        assert!(!a.contains(&c));
        assert!(a.intersects(&c));
        assert!(!b.intersects(&c));
    }

    #[test]
    fn test_edge_detection() {
        let area = AreaI::new(0, 0, 64, 64);
        assert_eq!(area.edge_of(&PointI::new(10, 0)), Some(Edge::Top));
        assert_eq!(area.edge_of(&PointI::new(64, 10)), Some(Edge::Right));
        assert_eq!(area.edge_of(&PointI::new(10, 64)), Some(Edge::Bottom));
        assert_eq!(area.edge_of(&PointI::new(0, 10)), Some(Edge::Left));
        assert_eq!(area.edge_of(&PointI::new(10, 10)), None);
    }

    #[test]
    fn test_polygon_area_and_contains() {
        let square = AreaI::new(0, 0, 10, 10).corner_ring();
        assert!((polygon_area31(&square) - 100.0).abs() < 1e-9);
        assert!(polygon_contains_point(&square, &PointI::new(5, 5)));
        assert!(!polygon_contains_point(&square, &PointI::new(15, 5)));
    }

    #[test]
    fn test_interior_point_for_concave_ring() {
        // U 形：中心点落在缺口中
        let ring = vec![
            PointI::new(0, 0),
            PointI::new(30, 0),
            PointI::new(30, 30),
            PointI::new(20, 30),
            PointI::new(20, 10),
            PointI::new(10, 10),
            PointI::new(10, 30),
            PointI::new(0, 30),
            PointI::new(0, 0),
        ];
        let area = AreaI::new(0, 0, 30, 30);
        let p = interior_point_in_area(&ring, &area).unwrap();
        assert!(polygon_contains_point(&ring, &p));
    }

    #[test]
    fn test_tiles_in_area() {
        let area = TileId::new(4, 4).bbox31(5).union(&TileId::new(5, 6).bbox31(5));
        assert_eq!(tiles_in_area(&area, 5).len(), 6);
    }
}
