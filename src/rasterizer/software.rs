//! 软件栅格化后端
//!
//! 扫描线填充：每行在像素中心采样，收集边的交点后按填充规则取区间。
//! 描边把每段线扩成四边形、端点按线帽补形状，统一成逆时针后按非零规则填充，
//! 因此重叠部分不会互相抵消。文字画成等宽方块字形，只用于占位与测试。
//!
//! 每次绘制调用同时记录到命令列表，便于检查绘制顺序。

use super::canvas::{
    Bitmap, Canvas, DashPattern, FillPaint, FillRule, LineCap, RasterBackend, Rgba8, StrokePaint,
    TextPaint,
};
use super::fonts::DEFAULT_ADVANCE;
use crate::error::{ObfError, ObfResult};
use kurbo::{BezPath, PathEl, Point, Rect, Vec2};

const FLATTEN_TOLERANCE: f64 = 0.25;
const CAP_SEGMENTS: usize = 12;
const LINE_HEIGHT: f64 = 1.2;
/// 方块字形相对字号的高度
const GLYPH_HEIGHT: f64 = 0.7;

/// 绘制调用记录
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear { color: u32 },
    FillPath { color: u32, bounds: Rect },
    StrokePath { color: u32, width: f64, dashed: bool },
    Bitmap { dest: Rect },
    Text { text: String, origin: Point },
    TextOnPath { text: String },
}

#[derive(Debug, Clone)]
pub struct SoftwareBackend {
    /// 单张画布的像素上限
    max_pixels: u64,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self {
            max_pixels: 4096 * 4096,
        }
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self { max_pixels }
    }
}

impl RasterBackend for SoftwareBackend {
    type Canvas = SoftwareCanvas;

    fn name(&self) -> &'static str {
        "software"
    }

    fn create_canvas(&self, width: u32, height: u32) -> ObfResult<SoftwareCanvas> {
        let count = u64::from(width) * u64::from(height);
        if count == 0 || count > self.max_pixels {
            tracing::error!(width, height, "raster surface size rejected");
            return Err(ObfError::SurfaceAllocation { width, height });
        }
        let mut pixels: Vec<Rgba8> = Vec::new();
        if pixels.try_reserve_exact(count as usize).is_err() {
            tracing::error!(width, height, "raster surface allocation failed");
            return Err(ObfError::SurfaceAllocation { width, height });
        }
        pixels.resize(count as usize, Rgba8::TRANSPARENT);
        Ok(SoftwareCanvas {
            width,
            height,
            pixels,
            commands: Vec::new(),
        })
    }

    fn finish(&self, canvas: SoftwareCanvas) -> Bitmap {
        let SoftwareCanvas {
            width,
            height,
            pixels,
            ..
        } = canvas;
        Bitmap::from_pixels(width, height, pixels)
            .unwrap_or_else(|| Bitmap::filled(width, height, Rgba8::TRANSPARENT))
    }
}

#[derive(Debug)]
pub struct SoftwareCanvas {
    width: u32,
    height: u32,
    pixels: Vec<Rgba8>,
    commands: Vec<DrawCommand>,
}

impl SoftwareCanvas {
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    fn blend(&mut self, x: usize, y: usize, color: Rgba8) {
        let index = y * self.width as usize + x;
        if let Some(px) = self.pixels.get_mut(index) {
            *px = px.blend_over(color);
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba8) {
        let x0 = rect.x0.max(0.0).round() as usize;
        let y0 = rect.y0.max(0.0).round() as usize;
        let x1 = (rect.x1.min(f64::from(self.width))).round().max(0.0) as usize;
        let y1 = (rect.y1.min(f64::from(self.height))).round().max(0.0) as usize;
        for y in y0..y1 {
            for x in x0..x1 {
                self.blend(x, y, color);
            }
        }
    }

    /// 扫描线填充若干环
    fn fill_rings(&mut self, rings: &[Vec<Point>], rule: FillRule, color: Rgba8) {
        if color.a == 0 {
            return;
        }
        let mut edges: Vec<(Point, Point, i32)> = Vec::new();
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        for ring in rings.iter().filter(|r| r.len() >= 3) {
            for i in 0..ring.len() {
                let a = ring[i];
                let b = ring[(i + 1) % ring.len()];
                if a.y == b.y {
                    continue;
                }
                let (top, bottom, winding) = if a.y < b.y { (a, b, 1) } else { (b, a, -1) };
                y_min = y_min.min(top.y);
                y_max = y_max.max(bottom.y);
                edges.push((top, bottom, winding));
            }
        }
        if edges.is_empty() {
            return;
        }

        let row_start = y_min.max(0.0).floor() as usize;
        let row_end = (y_max.min(f64::from(self.height))).ceil().max(0.0) as usize;
        let width = f64::from(self.width);
        let mut crossings: Vec<(f64, i32)> = Vec::new();
        for row in row_start..row_end {
            let y = row as f64 + 0.5;
            crossings.clear();
            for (top, bottom, winding) in &edges {
                if y >= top.y && y < bottom.y {
                    let x = top.x + (y - top.y) * (bottom.x - top.x) / (bottom.y - top.y);
                    crossings.push((x, *winding));
                }
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut accumulated = 0;
            for pair in crossings.windows(2) {
                accumulated += pair[0].1;
                let inside = match rule {
                    FillRule::NonZero => accumulated != 0,
                    FillRule::EvenOdd => accumulated % 2 != 0,
                };
                if !inside {
                    continue;
                }
                let start = (pair[0].0 - 0.5).ceil().clamp(0.0, width) as usize;
                let end = (pair[1].0 - 0.5).ceil().clamp(0.0, width) as usize;
                for x in start..end {
                    self.blend(x, row, color);
                }
            }
        }
    }
}

/// 展平为折线 (是否闭合)
fn flatten_path(path: &BezPath) -> Vec<(Vec<Point>, bool)> {
    let mut result: Vec<(Vec<Point>, bool)> = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    kurbo::flatten(path, FLATTEN_TOLERANCE, |el| match el {
        PathEl::MoveTo(p) => {
            if current.len() > 1 {
                result.push((std::mem::take(&mut current), false));
            }
            current.clear();
            current.push(p);
        }
        PathEl::LineTo(p) => current.push(p),
        PathEl::ClosePath => {
            if current.len() > 1 {
                result.push((std::mem::take(&mut current), true));
            }
            current.clear();
        }
        _ => {}
    });
    if current.len() > 1 {
        result.push((current, false));
    }
    result
}

/// 按虚线间隔切出实线段
fn apply_dash(polyline: &[Point], dash: &DashPattern) -> Vec<Vec<Point>> {
    let period = dash.period();
    if period <= 0.0 || dash.intervals.is_empty() {
        return vec![polyline.to_vec()];
    }
    let mut pieces = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    let mut index = 0usize;
    let mut remaining = dash.intervals[0];
    // 跳过 phase
    let mut phase = dash.phase.rem_euclid(period);
    while phase > 0.0 {
        if phase >= remaining {
            phase -= remaining;
            index = (index + 1) % dash.intervals.len();
            remaining = dash.intervals[index];
        } else {
            remaining -= phase;
            phase = 0.0;
        }
    }
    let mut on = index % 2 == 0;
    if on {
        if let Some(first) = polyline.first() {
            current.push(*first);
        }
    }
    for w in polyline.windows(2) {
        let (mut a, b) = (w[0], w[1]);
        let mut segment = a.distance(b);
        while segment > 0.0 {
            let step = remaining.min(segment);
            let t = step / segment;
            let p = a.lerp(b, t);
            if on {
                current.push(p);
            }
            segment -= step;
            remaining -= step;
            a = p;
            if remaining <= 1e-9 {
                if on && current.len() > 1 {
                    pieces.push(std::mem::take(&mut current));
                }
                current.clear();
                index = (index + 1) % dash.intervals.len();
                remaining = dash.intervals[index];
                on = index % 2 == 0;
                if on {
                    current.push(a);
                }
            }
        }
    }
    if on && current.len() > 1 {
        pieces.push(current);
    }
    pieces
}

/// 折线描边的外形多边形
fn stroke_outline(polyline: &[Point], half_width: f64, cap: LineCap, closed: bool) -> Vec<Vec<Point>> {
    let mut rings = Vec::new();
    let mut points: Vec<Point> = polyline.to_vec();
    if closed && points.first() != points.last() {
        if let Some(&first) = points.first() {
            points.push(first);
        }
    }
    points.dedup();
    if points.len() < 2 {
        if let (Some(&p), LineCap::Round | LineCap::Square) = (points.first(), cap) {
            rings.push(circle(p, half_width));
        }
        return rings;
    }
    let last = points.len() - 2;
    for (i, w) in points.windows(2).enumerate() {
        let (mut a, mut b) = (w[0], w[1]);
        let dir = (b - a).normalize();
        if cap == LineCap::Square && !closed {
            if i == 0 {
                a -= dir * half_width;
            }
            if i == last {
                b += dir * half_width;
            }
        }
        let normal = Vec2::new(-dir.y, dir.x) * half_width;
        rings.push(vec![a + normal, b + normal, b - normal, a - normal]);
    }
    // 折点处补圆，避免相邻段之间出现缝隙
    if half_width > 1.0 {
        for p in &points[1..points.len() - 1] {
            rings.push(circle(*p, half_width));
        }
    }
    if cap == LineCap::Round && !closed {
        rings.push(circle(points[0], half_width));
        rings.push(circle(points[points.len() - 1], half_width));
    }
    for ring in &mut rings {
        if signed_area(ring) < 0.0 {
            ring.reverse();
        }
    }
    rings
}

fn circle(center: Point, radius: f64) -> Vec<Point> {
    (0..CAP_SEGMENTS)
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / CAP_SEGMENTS as f64;
            center + Vec2::new(angle.cos(), angle.sin()) * radius
        })
        .collect()
}

fn signed_area(ring: &[Point]) -> f64 {
    let mut doubled = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        doubled += a.x * b.y - b.x * a.y;
    }
    doubled * 0.5
}

fn path_bounds(rings: &[(Vec<Point>, bool)]) -> Rect {
    let mut points = rings.iter().flat_map(|(r, _)| r.iter());
    let Some(first) = points.next() else {
        return Rect::ZERO;
    };
    points.fold(Rect::from_points(*first, *first), |rect, p| rect.union_pt(*p))
}

impl Canvas for SoftwareCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self, color: u32) {
        self.commands.push(DrawCommand::Clear { color });
        let px = Rgba8::from_argb(color);
        self.pixels.iter_mut().for_each(|p| *p = px);
    }

    fn fill_path(&mut self, path: &BezPath, paint: &FillPaint) {
        let polylines = flatten_path(path);
        self.commands.push(DrawCommand::FillPath {
            color: paint.color,
            bounds: path_bounds(&polylines),
        });
        let rings: Vec<Vec<Point>> = polylines.into_iter().map(|(ring, _)| ring).collect();
        self.fill_rings(&rings, paint.rule, Rgba8::from_argb(paint.color));
    }

    fn stroke_path(&mut self, path: &BezPath, paint: &StrokePaint) {
        self.commands.push(DrawCommand::StrokePath {
            color: paint.color,
            width: paint.width,
            dashed: paint.dash.is_some(),
        });
        if paint.width <= 0.0 {
            return;
        }
        let polylines = flatten_path(path);
        let color = Rgba8::from_argb(paint.color);
        let half_width = (paint.width / 2.0).max(0.5);
        // 模糊近似为一圈半透明的外带
        if paint.blur > 0.0 {
            let soft = Rgba8 {
                a: color.a / 2,
                ..color
            };
            let rings = stroke_rings(&polylines, half_width + paint.blur, paint);
            self.fill_rings(&rings, FillRule::NonZero, soft);
        }
        let rings = stroke_rings(&polylines, half_width, paint);
        self.fill_rings(&rings, FillRule::NonZero, color);
    }

    fn draw_bitmap(&mut self, bitmap: &Bitmap, dest: Rect) {
        self.commands.push(DrawCommand::Bitmap { dest });
        if dest.width() <= 0.0 || dest.height() <= 0.0 || bitmap.width() == 0 || bitmap.height() == 0 {
            return;
        }
        let x0 = dest.x0.max(0.0).floor() as u32;
        let y0 = dest.y0.max(0.0).floor() as u32;
        let x1 = dest.x1.min(f64::from(self.width)).ceil().max(0.0) as u32;
        let y1 = dest.y1.min(f64::from(self.height)).ceil().max(0.0) as u32;
        for y in y0..y1 {
            let v = ((f64::from(y) + 0.5 - dest.y0) / dest.height() * f64::from(bitmap.height())).floor();
            if v < 0.0 || v >= f64::from(bitmap.height()) {
                continue;
            }
            for x in x0..x1 {
                let u = ((f64::from(x) + 0.5 - dest.x0) / dest.width() * f64::from(bitmap.width())).floor();
                if u < 0.0 || u >= f64::from(bitmap.width()) {
                    continue;
                }
                if let Some(src) = bitmap.pixel(u as u32, v as u32) {
                    self.blend(x as usize, y as usize, src);
                }
            }
        }
    }

    fn draw_text(&mut self, lines: &[String], origin: Point, paint: &TextPaint) {
        self.commands.push(DrawCommand::Text {
            text: lines.join("\n"),
            origin,
        });
        let advance = paint.size * DEFAULT_ADVANCE;
        let glyph_height = paint.size * GLYPH_HEIGHT;
        let mut glyphs = Vec::new();
        for (row, line) in lines.iter().enumerate() {
            let baseline = origin.y + row as f64 * paint.size * LINE_HEIGHT;
            for (col, c) in line.chars().enumerate() {
                if c.is_whitespace() {
                    continue;
                }
                let x = origin.x + col as f64 * advance;
                glyphs.push(Rect::new(
                    x + advance * 0.1,
                    baseline - glyph_height,
                    x + advance * 0.9,
                    baseline,
                ));
            }
        }
        self.draw_glyphs(&glyphs, paint);
    }

    fn draw_text_on_path(&mut self, text: &str, path: &[Point], paint: &TextPaint) {
        self.commands.push(DrawCommand::TextOnPath {
            text: text.to_string(),
        });
        let advance = paint.size * DEFAULT_ADVANCE;
        let half = paint.size * GLYPH_HEIGHT / 2.0;
        let mut glyphs = Vec::new();
        for (i, c) in text.chars().enumerate() {
            if c.is_whitespace() {
                continue;
            }
            let distance = (i as f64 + 0.5) * advance;
            if let Some(p) = point_along(path, distance) {
                glyphs.push(Rect::new(p.x - half, p.y - half, p.x + half, p.y + half));
            }
        }
        self.draw_glyphs(&glyphs, paint);
    }
}

impl SoftwareCanvas {
    fn draw_glyphs(&mut self, glyphs: &[Rect], paint: &TextPaint) {
        if paint.halo_radius > 0.0 {
            let halo = Rgba8::from_argb(paint.halo_color);
            for glyph in glyphs {
                self.fill_rect(glyph.inflate(paint.halo_radius, paint.halo_radius), halo);
            }
        }
        let color = Rgba8::from_argb(paint.color);
        for glyph in glyphs {
            self.fill_rect(*glyph, color);
        }
    }
}

/// 沿折线距离 `distance` 处的点
fn stroke_rings(polylines: &[(Vec<Point>, bool)], half_width: f64, paint: &StrokePaint) -> Vec<Vec<Point>> {
    let mut rings = Vec::new();
    for (polyline, closed) in polylines {
        let pieces = match &paint.dash {
            Some(dash) => apply_dash(polyline, dash),
            None => vec![polyline.clone()],
        };
        let closed = *closed && paint.dash.is_none();
        for piece in pieces {
            rings.extend(stroke_outline(&piece, half_width, paint.cap, closed));
        }
    }
    rings
}

pub fn point_along(path: &[Point], distance: f64) -> Option<Point> {
    let mut walked = 0.0;
    for w in path.windows(2) {
        let length = w[0].distance(w[1]);
        if walked + length >= distance && length > 0.0 {
            return Some(w[0].lerp(w[1], (distance - walked) / length));
        }
        walked += length;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const RED: u32 = 0xffff_0000;
    const WHITE: u32 = 0xffff_ffff;

    fn canvas(size: u32) -> SoftwareCanvas {
        let mut canvas = SoftwareBackend::new().create_canvas(size, size).unwrap();
        canvas.clear(WHITE);
        canvas
    }

    fn rect_path(x0: f64, y0: f64, x1: f64, y1: f64) -> BezPath {
        let mut path = BezPath::new();
        path.move_to((x0, y0));
        path.line_to((x1, y0));
        path.line_to((x1, y1));
        path.line_to((x0, y1));
        path.close_path();
        path
    }

    #[test]
    fn test_fill_rectangle() {
        let mut canvas = canvas(16);
        canvas.fill_path(
            &rect_path(2.0, 2.0, 6.0, 6.0),
            &FillPaint { color: RED, rule: FillRule::EvenOdd },
        );
        assert_eq!(canvas.pixel(3, 3), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(5, 5), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(6, 6), Some(Rgba8::from_argb(WHITE)));
        assert_eq!(canvas.pixel(1, 3), Some(Rgba8::from_argb(WHITE)));
    }

    #[test]
    fn test_even_odd_leaves_hole() {
        let mut canvas = canvas(16);
        let mut path = rect_path(0.0, 0.0, 12.0, 12.0);
        for el in rect_path(4.0, 4.0, 8.0, 8.0).elements() {
            path.push(*el);
        }
        canvas.fill_path(&path, &FillPaint { color: RED, rule: FillRule::EvenOdd });
        assert_eq!(canvas.pixel(1, 1), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(5, 5), Some(Rgba8::from_argb(WHITE)));
    }

    #[test]
    fn test_stroke_covers_line() {
        let mut canvas = canvas(32);
        let mut path = BezPath::new();
        path.move_to((2.0, 10.0));
        path.line_to((20.0, 10.0));
        path.line_to((20.0, 28.0));
        canvas.stroke_path(&path, &StrokePaint::solid(RED, 4.0));
        assert_eq!(canvas.pixel(10, 10), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(20, 20), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(20, 10), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(10, 20), Some(Rgba8::from_argb(WHITE)));
    }

    #[test]
    fn test_dashed_stroke_has_gaps() {
        let mut canvas = canvas(32);
        let mut path = BezPath::new();
        path.move_to((0.0, 10.0));
        path.line_to((32.0, 10.0));
        let paint = StrokePaint {
            dash: Some(Arc::new(DashPattern { intervals: vec![4.0, 4.0], phase: 0.0 })),
            ..StrokePaint::solid(RED, 2.0)
        };
        canvas.stroke_path(&path, &paint);
        assert_eq!(canvas.pixel(1, 10), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(5, 10), Some(Rgba8::from_argb(WHITE)));
        assert_eq!(canvas.pixel(9, 10), Some(Rgba8::from_argb(RED)));
    }

    #[test]
    fn test_oversized_surface_is_rejected() {
        let backend = SoftwareBackend::with_max_pixels(100);
        assert!(matches!(
            backend.create_canvas(20, 20),
            Err(ObfError::SurfaceAllocation { width: 20, height: 20 })
        ));
        assert!(backend.create_canvas(0, 10).is_err());
    }

    #[test]
    fn test_draw_bitmap_scales() {
        let mut canvas = canvas(16);
        let icon = Bitmap::filled(2, 2, Rgba8::from_argb(RED));
        canvas.draw_bitmap(&icon, Rect::new(4.0, 4.0, 8.0, 8.0));
        assert_eq!(canvas.pixel(4, 4), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(7, 7), Some(Rgba8::from_argb(RED)));
        assert_eq!(canvas.pixel(8, 8), Some(Rgba8::from_argb(WHITE)));
    }

    #[test]
    fn test_point_along() {
        let path = [Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0)];
        assert_eq!(point_along(&path, 15.0), Some(Point::new(10.0, 5.0)));
        assert_eq!(point_along(&path, 25.0), None);
    }
}
