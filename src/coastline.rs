//! 海岸线多边形化
//!
//! 海岸线数据是折线，约定水域在行进方向右侧 (y 向下坐标系)。处理步骤：
//!
//! 1. 把每条海岸线裁剪到瓦片矩形内，得到若干段
//! 2. 首尾相接的段拼接起来；已闭合的段直接成环
//! 3. 未闭合的段从出口沿瓦片边界顺时针走到最近的入口，接上下一段，直到回到起点
//! 4. 按环的绕向分类：顺时针为水域 (natural=coastline)，逆时针为陆地 (natural=land)
//!
//! 瓦片内没有海岸线时，由空间树的 ocean 统计决定整块填充水域还是陆地。

use crate::area::{AreaI, Edge, PointI, ZoomLevel};
use crate::map_object::{MapEncodingRules, MapObject};
use crate::query::MapFoundationType;
use std::collections::HashMap;
use std::sync::Arc;

/// 多边形化结果
#[derive(Debug, Default)]
pub struct CoastlinePolygons {
    /// 底色填充在前，其后为各个环
    pub objects: Vec<MapObject>,
    pub water_rings: usize,
    pub land_rings: usize,
}

/// 环是否顺时针 (y 向下坐标系中的视觉方向)
pub fn is_clockwise_way(ring: &[PointI]) -> bool {
    signed_area2(ring) > 0
}

/// 有向面积的两倍；顺时针为正
fn signed_area2(ring: &[PointI]) -> i128 {
    if ring.len() < 3 {
        return 0;
    }
    let mut sum: i128 = 0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += i128::from(a.x) * i128::from(b.y) - i128::from(b.x) * i128::from(a.y);
    }
    sum
}

/// 按底色生成覆盖整块瓦片的填充对象
pub fn fill_entire_area(tile: &AreaI, foundation: MapFoundationType, id: i64) -> MapObject {
    let rules = MapEncodingRules::synthetic();
    let type_id = match foundation {
        MapFoundationType::FullWater => rules.natural_coastline,
        MapFoundationType::FullLand | MapFoundationType::Mixed => rules.natural_land,
        MapFoundationType::Undefined => {
            tracing::warn!(?tile, "undefined foundation, marking tile as broken coastline");
            rules.natural_coastline_broken
        }
    };
    MapObject::synthetic(id, tile.corner_ring(), type_id, true)
}

/// 把与瓦片相交的海岸线转换为水域 / 陆地多边形
///
/// 返回空结果表示瓦片内没有可用的海岸线。`first_id` 为第一个合成对象的序号。
pub fn polygonize_coastlines(
    tile: &AreaI,
    zoom: ZoomLevel,
    coastlines: &[Arc<MapObject>],
    first_id: i64,
) -> CoastlinePolygons {
    let mut pieces: Vec<Vec<PointI>> = Vec::new();
    for coastline in coastlines {
        if coastline.points31.len() < 2 || !coastline.bbox31.intersects(tile) {
            continue;
        }
        pieces.extend(clip_polyline(&coastline.points31, tile));
    }
    if pieces.is_empty() {
        return CoastlinePolygons::default();
    }

    let pieces = stitch(pieces);
    let mut rings: Vec<Vec<PointI>> = Vec::new();
    let mut open: Vec<Vec<PointI>> = Vec::new();
    for piece in pieces {
        if piece.len() > 3 && piece.first() == piece.last() {
            rings.push(piece);
        } else if piece.len() >= 2 {
            open.push(piece);
        }
    }

    if !open.is_empty() {
        let tolerance = snap_tolerance(zoom);
        for piece in open.iter_mut() {
            snap_ends_to_boundary(piece, tile, tolerance);
        }
        rings.extend(close_along_boundary(open, tile));
    }

    let rules = MapEncodingRules::synthetic();
    let mut result = CoastlinePolygons::default();
    let mut ring_objects = Vec::with_capacity(rings.len());
    for (index, ring) in rings.into_iter().enumerate() {
        if ring.len() < 4 {
            tracing::warn!(points = ring.len(), "degenerate coastline ring skipped");
            continue;
        }
        let water = is_clockwise_way(&ring);
        let type_id = if water {
            result.water_rings += 1;
            rules.natural_coastline
        } else {
            result.land_rings += 1;
            rules.natural_land
        };
        ring_objects.push(MapObject::synthetic(
            first_id + 1 + index as i64,
            ring,
            type_id,
            true,
        ));
    }
    if ring_objects.is_empty() {
        return result;
    }

    // 出现水域环说明环外是陆地；只有岛屿时环外是水域
    let base = if result.water_rings > 0 {
        MapFoundationType::FullLand
    } else {
        MapFoundationType::FullWater
    };
    result.objects.push(fill_entire_area(tile, base, first_id));
    result.objects.extend(ring_objects);
    tracing::debug!(
        water = result.water_rings,
        land = result.land_rings,
        "coastlines polygonized"
    );
    result
}

/// 端点吸附到边界的容差 (约一个像素)
fn snap_tolerance(zoom: ZoomLevel) -> i64 {
    1i64 << (31 - i64::from(zoom.min(23)) - 8)
}

// ============================================================================
// 裁剪与拼接
// ============================================================================

/// Liang-Barsky 线段裁剪
fn clip_segment(a: PointI, b: PointI, rect: &AreaI) -> Option<(PointI, PointI)> {
    let (x0, y0) = (f64::from(a.x), f64::from(a.y));
    let (dx, dy) = (f64::from(b.x) - x0, f64::from(b.y) - y0);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    let checks = [
        (-dx, x0 - f64::from(rect.left)),
        (dx, f64::from(rect.right) - x0),
        (-dy, y0 - f64::from(rect.top)),
        (dy, f64::from(rect.bottom) - y0),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let at = |t: f64| {
        if t <= 0.0 {
            return a;
        }
        if t >= 1.0 {
            return b;
        }
        let x = (x0 + t * dx).round() as i64;
        let y = (y0 + t * dy).round() as i64;
        PointI::new(
            x.clamp(i64::from(rect.left), i64::from(rect.right)) as i32,
            y.clamp(i64::from(rect.top), i64::from(rect.bottom)) as i32,
        )
    };
    Some((at(t0), at(t1)))
}

/// 折线裁剪为矩形内的若干段
fn clip_polyline(points: &[PointI], rect: &AreaI) -> Vec<Vec<PointI>> {
    let mut pieces = Vec::new();
    let mut current: Vec<PointI> = Vec::new();
    for w in points.windows(2) {
        match clip_segment(w[0], w[1], rect) {
            None => {
                if current.len() >= 2 {
                    pieces.push(std::mem::take(&mut current));
                }
                current.clear();
            }
            Some((start, end)) => {
                if current.last() != Some(&start) {
                    if current.len() >= 2 {
                        pieces.push(std::mem::take(&mut current));
                    }
                    current.clear();
                    current.push(start);
                }
                if current.last() != Some(&end) {
                    current.push(end);
                }
                if end != w[1] {
                    // 线段在此离开矩形
                    if current.len() >= 2 {
                        pieces.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
            }
        }
    }
    if current.len() >= 2 {
        pieces.push(current);
    }
    pieces
}

/// 拼接首尾相接的段
fn stitch(mut pieces: Vec<Vec<PointI>>) -> Vec<Vec<PointI>> {
    loop {
        let mut starts: HashMap<PointI, usize> = HashMap::new();
        for (index, piece) in pieces.iter().enumerate() {
            if let Some(first) = piece.first() {
                if piece.first() != piece.last() {
                    starts.entry(*first).or_insert(index);
                }
            }
        }
        let mut joined = None;
        for (index, piece) in pieces.iter().enumerate() {
            if piece.first() == piece.last() {
                continue;
            }
            if let Some(&next) = piece.last().and_then(|last| starts.get(last)) {
                if next != index {
                    joined = Some((index, next));
                    break;
                }
                // 自身首尾相接即闭合，无需处理
            }
        }
        match joined {
            Some((index, next)) => {
                let tail = std::mem::take(&mut pieces[next]);
                pieces[index].extend(tail.into_iter().skip(1));
                pieces.remove(next);
            }
            None => return pieces,
        }
    }
}

// ============================================================================
// 沿边界闭合
// ============================================================================

/// 点在瓦片周长上的顺时针位置 (左上角为 0)
fn perimeter_position(p: &PointI, tile: &AreaI) -> Option<i64> {
    let (w, h) = (tile.width(), tile.height());
    Some(match tile.edge_of(p)? {
        Edge::Top => i64::from(p.x) - i64::from(tile.left),
        Edge::Right => w + i64::from(p.y) - i64::from(tile.top),
        Edge::Bottom => w + h + i64::from(tile.right) - i64::from(p.x),
        Edge::Left => 2 * w + h + i64::from(tile.bottom) - i64::from(p.y),
    })
}

/// 端点不在边界上时投影到最近的边
fn snap_ends_to_boundary(piece: &mut Vec<PointI>, tile: &AreaI, tolerance: i64) {
    for at_start in [true, false] {
        let p = if at_start { piece[0] } else { piece[piece.len() - 1] };
        if tile.edge_of(&p).is_some() {
            continue;
        }
        let candidates = [
            (i64::from(p.y) - i64::from(tile.top), PointI::new(p.x, tile.top)),
            (i64::from(tile.right) - i64::from(p.x), PointI::new(tile.right, p.y)),
            (i64::from(tile.bottom) - i64::from(p.y), PointI::new(p.x, tile.bottom)),
            (i64::from(p.x) - i64::from(tile.left), PointI::new(tile.left, p.y)),
        ];
        let Some((distance, snapped)) = candidates.into_iter().min_by_key(|(d, _)| *d) else {
            continue;
        };
        if distance > tolerance {
            tracing::warn!(x = p.x, y = p.y, "coastline ends inside tile, closing to nearest edge");
        }
        if at_start {
            piece.insert(0, snapped);
        } else {
            piece.push(snapped);
        }
    }
}

fn close_along_boundary(pieces: Vec<Vec<PointI>>, tile: &AreaI) -> Vec<Vec<PointI>> {
    let (w, h) = (tile.width(), tile.height());
    let perimeter = 2 * (w + h);
    if perimeter == 0 {
        return Vec::new();
    }
    let corners = [
        (0, PointI::new(tile.left, tile.top)),
        (w, PointI::new(tile.right, tile.top)),
        (w + h, PointI::new(tile.right, tile.bottom)),
        (2 * w + h, PointI::new(tile.left, tile.bottom)),
    ];
    let entries: Vec<i64> = pieces
        .iter()
        .map(|piece| perimeter_position(&piece[0], tile).unwrap_or(0))
        .collect();

    let mut used = vec![false; pieces.len()];
    let mut rings = Vec::new();
    for first in 0..pieces.len() {
        if used[first] {
            continue;
        }
        let mut ring: Vec<PointI> = Vec::new();
        let mut current = first;
        for _ in 0..=pieces.len() {
            used[current] = true;
            for p in &pieces[current] {
                if ring.last() != Some(p) {
                    ring.push(*p);
                }
            }
            let Some(exit) = ring.last().and_then(|p| perimeter_position(p, tile)) else {
                break;
            };
            let next = (0..pieces.len())
                .filter(|&j| !used[j] || j == first)
                .min_by_key(|&j| ((entries[j] - exit).rem_euclid(perimeter), j));
            let Some(next) = next else {
                break;
            };
            let distance = (entries[next] - exit).rem_euclid(perimeter);
            let mut passed: Vec<(i64, PointI)> = corners
                .iter()
                .map(|(pos, corner)| ((pos - exit).rem_euclid(perimeter), *corner))
                .filter(|(offset, _)| *offset > 0 && *offset < distance)
                .collect();
            passed.sort_by_key(|(offset, _)| *offset);
            ring.extend(passed.into_iter().map(|(_, corner)| corner));
            if next == first {
                break;
            }
            current = next;
        }
        if let Some(start) = ring.first().copied() {
            if ring.last() != Some(&start) {
                ring.push(start);
            }
        }
        rings.push(ring);
    }
    rings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_object::{MapObjectOrigin, ObfObjectId};

    const TILE: AreaI = AreaI::new(0, 0, 1024, 1024);

    fn coastline(points: &[(i32, i32)]) -> Arc<MapObject> {
        let rules = MapEncodingRules::synthetic();
        Arc::new(MapObject::new(
            ObfObjectId(1),
            MapObjectOrigin::Detailed,
            rules.clone(),
            points.iter().map(|&(x, y)| PointI::new(x, y)).collect(),
            vec![rules.natural_coastline],
        ))
    }

    fn kind(object: &MapObject) -> &str {
        object
            .type_rule(0)
            .map(|r| r.value.as_str())
            .unwrap_or("")
    }

    #[test]
    fn test_winding_classifies_land_and_water() {
        let clockwise = TILE.corner_ring();
        assert!(is_clockwise_way(&clockwise));
        let mut reversed = clockwise.clone();
        reversed.reverse();
        assert!(!is_clockwise_way(&reversed));

        let ring = |points: Vec<PointI>| {
            let pts: Vec<(i32, i32)> = points.iter().map(|p| (p.x, p.y)).collect();
            coastline(&pts)
        };
        let inner = AreaI::new(100, 100, 300, 300).corner_ring();
        let water = polygonize_coastlines(&TILE, 16, &[ring(inner.clone())], 0);
        assert_eq!(water.water_rings, 1);
        assert_eq!(kind(&water.objects[1]), "coastline");
        // 水域环外是陆地
        assert_eq!(kind(&water.objects[0]), "land");

        let mut island = inner;
        island.reverse();
        let land = polygonize_coastlines(&TILE, 16, &[ring(island)], 0);
        assert_eq!(land.land_rings, 1);
        assert_eq!(kind(&land.objects[1]), "land");
        assert_eq!(kind(&land.objects[0]), "coastline");
    }

    #[test]
    fn test_crossing_coastline_closes_clockwise() {
        // 向东行进，水域在南侧
        let east = polygonize_coastlines(&TILE, 16, &[coastline(&[(-100, 512), (2000, 512)])], 0);
        assert_eq!(east.water_rings, 1);
        let ring = &east.objects[1].points31;
        assert!(is_clockwise_way(ring));
        assert_eq!(
            east.objects[1].bbox31,
            AreaI::new(0, 512, 1024, 1024)
        );

        // 向西行进，水域在北侧
        let west = polygonize_coastlines(&TILE, 16, &[coastline(&[(2000, 512), (-100, 512)])], 0);
        assert_eq!(west.objects[1].bbox31, AreaI::new(0, 0, 1024, 512));
    }

    #[test]
    fn test_split_coastline_pieces_are_stitched() {
        let parts = [
            coastline(&[(-100, 300), (500, 300)]),
            coastline(&[(500, 300), (500, 700)]),
            coastline(&[(500, 700), (2000, 700)]),
        ];
        let result = polygonize_coastlines(&TILE, 16, &parts, 10);
        assert_eq!(result.water_rings, 1);
        assert_eq!(result.objects.len(), 2);
        assert!(result.objects.iter().all(|o| !o.id.is_deduplicatable()));
    }

    #[test]
    fn test_no_coastline_in_tile() {
        let far = coastline(&[(5000, 5000), (6000, 6000)]);
        let result = polygonize_coastlines(&TILE, 16, &[far], 0);
        assert!(result.objects.is_empty());
    }

    #[test]
    fn test_fill_by_foundation() {
        assert_eq!(kind(&fill_entire_area(&TILE, MapFoundationType::FullWater, 1)), "coastline");
        assert_eq!(kind(&fill_entire_area(&TILE, MapFoundationType::Mixed, 1)), "land");
        assert_eq!(
            kind(&fill_entire_area(&TILE, MapFoundationType::Undefined, 1)),
            "coastline_broken"
        );
    }

    #[test]
    fn test_clip_polyline_splits_on_exit() {
        let points = [
            PointI::new(-10, 10),
            PointI::new(10, 10),
            PointI::new(10, -10),
            PointI::new(20, -10),
            PointI::new(20, 10),
        ];
        let pieces = clip_polyline(&points, &AreaI::new(0, 0, 100, 100));
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], vec![PointI::new(0, 10), PointI::new(10, 10), PointI::new(10, 0)]);
        assert_eq!(pieces[1], vec![PointI::new(20, 0), PointI::new(20, 10)]);
    }
}
