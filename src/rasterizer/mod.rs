//! 栅格化
//!
//! 把一个瓦片排序好的图元画到画布上，按固定的遍序：
//!
//! 1. 背景色
//! 2. 面 (含内环，奇偶填充；可选边框)
//! 3. 阴影 (阴影模式 2 / 3)
//! 4. 线 (每个图元自下而上画 -3..=4 共 8 层)
//! 5. 单行箭头
//! 6. 图标 (带碰撞检测)
//! 7. 文字 (带碰撞检测与同名最小距离)
//!
//! 画布由 `RasterBackend` 提供；`software` 是内置的纯软件实现。

pub mod canvas;
pub mod fonts;
pub mod paint_cache;
pub mod resources;
pub mod software;
pub mod text;

pub use canvas::{
    Bitmap, Canvas, DashPattern, FillPaint, FillRule, LineCap, RasterBackend, Rgba8, StrokePaint,
    TextPaint,
};
pub use fonts::{FontFace, FontRegistry};
pub use paint_cache::PaintCache;
pub use resources::{MapResources, ResourceProvider};
pub use software::{DrawCommand, SoftwareBackend, SoftwareCanvas};

use crate::area::{AreaI, PointI, ZoomLevel};
use crate::config::RenderConfig;
use crate::map_object::{MapObject, ObfObjectId};
use crate::primitives::{IconSymbol, Primitive, PrimitivisedObjects, Symbol, TextSymbol, TileContext};
use crate::quad_tree::QuadTree;
use crate::style::{line_layer_property, props, LineLayerProperty, MAX_LINE_LAYER, MIN_LINE_LAYER};
use kurbo::{BezPath, Point, Rect, Size, Vec2};
use serde::Serialize;
use std::sync::Arc;

/// 行高相对字号
const TEXT_LINE_HEIGHT: f64 = 1.2;
/// 同名路段合并的最大间隙与最大总长 (dip)
const COMBINE_GAP_DIP: f64 = 45.0;
const COMBINE_MAX_LENGTH_DIP: f64 = 550.0;
/// 可见性判断时画布外扩的像素
const VISIBILITY_MARGIN: f64 = 16.0;
/// 文字盾牌超出文字框的边距 (dip)
const TEXT_SHIELD_PADDING: f64 = 3.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RasterStats {
    pub polygons: usize,
    pub polygon_borders: usize,
    pub shadows: usize,
    pub polylines: usize,
    pub line_layers: usize,
    pub oneway_arrows: usize,
    pub icons_drawn: usize,
    pub icons_rejected: usize,
    pub texts_drawn: usize,
    pub texts_rejected: usize,
}

/// 各瓦片共享的栅格化环境：画笔缓存、字体、位图资源与缩放
pub struct RasterizerEnvironment {
    pub paints: PaintCache,
    pub fonts: FontRegistry,
    pub resources: Arc<dyn ResourceProvider>,
    scale: f64,
    text_scale: f64,
    density: f64,
}

impl RasterizerEnvironment {
    pub fn new(config: &RenderConfig, resources: Arc<dyn ResourceProvider>) -> Self {
        Self {
            paints: PaintCache::new(),
            fonts: FontRegistry::with_default_faces(),
            resources,
            scale: f64::from(config.scale()),
            text_scale: f64::from(config.text_scale_factor()),
            density: f64::from(config.density_factor),
        }
    }

    pub fn with_fonts(mut self, fonts: FontRegistry) -> Self {
        self.fonts = fonts;
        self
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

type SymbolKey = (ObfObjectId, u32);

enum TextLayout {
    Lines(Vec<String>),
    Path(Vec<Point>),
}

/// 31 位坐标到画布像素
#[derive(Debug, Clone, Copy)]
struct CanvasProjection {
    context: TileContext,
    factor: f64,
}

impl CanvasProjection {
    fn new(context: TileContext, canvas_width: u32) -> Self {
        let factor = if context.tile_size_px == 0 {
            1.0
        } else {
            f64::from(canvas_width) / f64::from(context.tile_size_px)
        };
        Self { context, factor }
    }

    fn point(&self, p: &PointI) -> Point {
        let (x, y) = self.context.to_pixel(p);
        Point::new(x * self.factor, y * self.factor)
    }

    fn points(&self, points: &[PointI]) -> Vec<Point> {
        points.iter().map(|p| self.point(p)).collect()
    }

    fn rect(&self, area: &AreaI) -> Rect {
        let a = self.point(&PointI::new(area.left, area.top));
        let b = self.point(&PointI::new(area.right, area.bottom));
        Rect::from_points(a, b)
    }

    fn path(&self, points: &[PointI], close: bool) -> BezPath {
        let mut path = BezPath::new();
        for (i, p) in points.iter().enumerate() {
            if i == 0 {
                path.move_to(self.point(p));
            } else {
                path.line_to(self.point(p));
            }
        }
        if close && points.len() > 2 {
            path.close_path();
        }
        path
    }

    fn pixels_per_unit(&self) -> f64 {
        self.context.pixels_per_unit() * self.factor
    }
}

fn overlaps(a: &Rect, b: &Rect) -> bool {
    a.x0 <= b.x1 && b.x0 <= a.x1 && a.y0 <= b.y1 && b.y0 <= a.y1
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a - o).cross(b - o)
}

fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    (d1 > 0.0) != (d2 > 0.0) && (d3 > 0.0) != (d4 > 0.0)
}

fn ring_contains(ring: &[Point], p: Point) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// 外环是否与可见区域相交：有顶点落在区域内、有边穿过区域边界，或区域中心在环内
fn polygon_visible(ring: &[Point], visible: Rect) -> bool {
    if ring.iter().any(|p| visible.contains(*p)) {
        return true;
    }
    let corners = [
        Point::new(visible.x0, visible.y0),
        Point::new(visible.x1, visible.y0),
        Point::new(visible.x1, visible.y1),
        Point::new(visible.x0, visible.y1),
    ];
    let crosses = ring.windows(2).any(|edge| {
        (0..4).any(|k| segments_intersect(edge[0], edge[1], corners[k], corners[(k + 1) % 4]))
    });
    crosses || ring_contains(ring, visible.center())
}

fn has_rule(object: &MapObject, rule: Option<u32>) -> bool {
    rule.is_some_and(|id| {
        object.type_ids.contains(&id) || object.additional_type_ids.contains(&id)
    })
}

/// 线图元的单行箭头方向：Some(false) 正向，Some(true) 反向
fn oneway_direction(primitive: &Primitive, zoom: ZoomLevel) -> Option<bool> {
    let object = &primitive.object;
    let encoding = &object.encoding;
    let tagged = || {
        if has_rule(object, encoding.oneway) {
            Some(false)
        } else if has_rule(object, encoding.oneway_reverse) {
            Some(true)
        } else {
            None
        }
    };
    match primitive.tag_value() {
        ("highway", _) if zoom >= 16 => tagged(),
        ("route", "ferry") if zoom >= 15 => tagged(),
        ("waterway", "stream") if zoom >= 15 => Some(false),
        ("waterway", "river") if zoom >= 12 => Some(false),
        ("waterway", "canal") if zoom >= 14 => Some(false),
        _ => None,
    }
}

pub struct Rasterizer<'e> {
    env: &'e RasterizerEnvironment,
}

impl<'e> Rasterizer<'e> {
    pub fn new(env: &'e RasterizerEnvironment) -> Self {
        Self { env }
    }

    /// 在画布上画出整个瓦片
    pub fn rasterize<C: Canvas>(&self, canvas: &mut C, primitives: &PrimitivisedObjects) -> RasterStats {
        let projection = CanvasProjection::new(primitives.context, canvas.width());
        let visible = canvas.bounds().inflate(VISIBILITY_MARGIN, VISIBILITY_MARGIN);
        let mut stats = RasterStats::default();

        canvas.clear(primitives.background_color);
        self.draw_polygons(canvas, &projection, visible, primitives, &mut stats);
        if matches!(primitives.shadow_rendering_mode, 2 | 3) {
            self.draw_shadows(canvas, &projection, visible, primitives, &mut stats);
        }
        self.draw_polylines(canvas, &projection, visible, primitives, &mut stats);
        self.draw_oneway_arrows(canvas, &projection, visible, primitives, &mut stats);

        let mut collisions: QuadTree<SymbolKey> = QuadTree::new(canvas.bounds());
        self.draw_icons(canvas, &projection, &mut collisions, primitives, &mut stats);
        self.draw_texts(canvas, &projection, &mut collisions, primitives, &mut stats);

        tracing::trace!(
            tile = ?primitives.context.area31,
            polygons = stats.polygons,
            polylines = stats.polylines,
            icons = stats.icons_drawn,
            texts = stats.texts_drawn,
            "tile rasterized"
        );
        stats
    }

    // ========================================================================
    // 面
    // ========================================================================

    fn draw_polygons<C: Canvas>(
        &self,
        canvas: &mut C,
        projection: &CanvasProjection,
        visible: Rect,
        primitives: &PrimitivisedObjects,
        stats: &mut RasterStats,
    ) {
        for primitive in &primitives.polygons {
            let evaluation = &primitive.evaluation;
            let Some(color) = evaluation.color(props::COLOR).filter(|c| c >> 24 != 0) else {
                continue;
            };
            let object = &primitive.object;
            if !overlaps(&projection.rect(&object.bbox31), &visible)
                || !polygon_visible(&projection.points(&object.points31), visible)
            {
                continue;
            }
            let mut path = projection.path(&object.points31, true);
            for inner in &object.inner_polygons31 {
                for el in projection.path(inner, true).elements() {
                    path.push(*el);
                }
            }
            canvas.fill_path(&path, &FillPaint { color, rule: FillRule::EvenOdd });
            stats.polygons += 1;

            let border_width = evaluation
                .float_or(line_layer_property(-1, LineLayerProperty::StrokeWidth), 0.0);
            if border_width > 0.0 {
                let border_color = evaluation
                    .color(line_layer_property(-1, LineLayerProperty::Color))
                    .unwrap_or(color);
                canvas.stroke_path(
                    &path,
                    &StrokePaint::solid(border_color, f64::from(border_width) * self.env.scale),
                );
                stats.polygon_borders += 1;
            }
        }
    }

    // ========================================================================
    // 阴影与线
    // ========================================================================

    fn base_width(&self, primitive: &Primitive) -> f64 {
        f64::from(primitive.evaluation.float_or(props::STROKE_WIDTH, 0.0)) * self.env.scale
    }

    /// 阴影笔：(颜色, 半径像素)
    fn shadow_of(&self, primitive: &Primitive) -> Option<(u32, f64)> {
        let radius = f64::from(primitive.evaluation.float_or(props::SHADOW_RADIUS, 0.0)) * self.env.scale;
        let color = primitive.evaluation.color(props::SHADOW_COLOR)?;
        (radius > 0.0 && color >> 24 != 0).then_some((color, radius))
    }

    fn draw_shadows<C: Canvas>(
        &self,
        canvas: &mut C,
        projection: &CanvasProjection,
        visible: Rect,
        primitives: &PrimitivisedObjects,
        stats: &mut RasterStats,
    ) {
        let solid = primitives.shadow_rendering_mode == 3;
        for level in primitives.shadow_level_min..=primitives.shadow_level_max {
            for primitive in primitives.polylines.iter().filter(|p| p.shadow_level == level) {
                let Some((color, radius)) = self.shadow_of(primitive) else {
                    continue;
                };
                let base = self.base_width(primitive);
                if base <= 0.0 || !overlaps(&projection.rect(&primitive.object.bbox31), &visible) {
                    continue;
                }
                let mut paint = StrokePaint::solid(color, base + radius * 2.0);
                paint.cap = LineCap::Round;
                if !solid {
                    paint.blur = radius;
                }
                canvas.stroke_path(&projection.path(&primitive.object.points31, false), &paint);
                stats.shadows += 1;
            }
        }
    }

    fn layer_paint(&self, primitive: &Primitive, layer: i32) -> Option<StrokePaint> {
        let evaluation = &primitive.evaluation;
        let width = f64::from(
            evaluation.float_or(line_layer_property(layer, LineLayerProperty::StrokeWidth), 0.0),
        ) * self.env.scale;
        if width <= 0.0 {
            return None;
        }
        let color = evaluation.color(line_layer_property(layer, LineLayerProperty::Color))?;
        let cap = evaluation
            .string(line_layer_property(layer, LineLayerProperty::Cap))
            .map(LineCap::parse)
            .unwrap_or_default();
        let dash = evaluation
            .string(line_layer_property(layer, LineLayerProperty::PathEffect))
            .and_then(|pattern| self.env.paints.dash(pattern, self.env.scale));
        Some(StrokePaint {
            color,
            width,
            cap,
            dash,
            blur: 0.0,
        })
    }

    fn draw_polylines<C: Canvas>(
        &self,
        canvas: &mut C,
        projection: &CanvasProjection,
        visible: Rect,
        primitives: &PrimitivisedObjects,
        stats: &mut RasterStats,
    ) {
        let one_step_shadow = primitives.shadow_rendering_mode == 1;
        for primitive in &primitives.polylines {
            let object = &primitive.object;
            if object.points31.len() < 2 || !overlaps(&projection.rect(&object.bbox31), &visible) {
                continue;
            }
            let path = projection.path(&object.points31, false);
            let mut drawn = false;
            for layer in MIN_LINE_LAYER..=MAX_LINE_LAYER {
                let Some(paint) = self.layer_paint(primitive, layer) else {
                    continue;
                };
                if layer == 0 && one_step_shadow {
                    if let Some((color, radius)) = self.shadow_of(primitive) {
                        let mut shadow = StrokePaint::solid(color, paint.width + radius);
                        shadow.cap = paint.cap;
                        shadow.blur = radius;
                        canvas.stroke_path(&path, &shadow);
                        stats.shadows += 1;
                    }
                }
                canvas.stroke_path(&path, &paint);
                stats.line_layers += 1;
                drawn = true;
            }
            if drawn {
                stats.polylines += 1;
            }
        }
    }

    fn draw_oneway_arrows<C: Canvas>(
        &self,
        canvas: &mut C,
        projection: &CanvasProjection,
        visible: Rect,
        primitives: &PrimitivisedObjects,
        stats: &mut RasterStats,
    ) {
        let zoom = primitives.context.zoom;
        for primitive in &primitives.polylines {
            let Some(reverse) = oneway_direction(primitive, zoom) else {
                continue;
            };
            let object = &primitive.object;
            if object.points31.len() < 2 || !overlaps(&projection.rect(&object.bbox31), &visible) {
                continue;
            }
            let color = primitive
                .evaluation
                .color(props::ONEWAY_ARROWS_COLOR)
                .unwrap_or(paint_cache::DEFAULT_ONEWAY_COLOR);
            let path = projection.path(&object.points31, false);
            for paint in self.env.paints.oneway_paints(reverse, color, self.env.scale) {
                canvas.stroke_path(&path, &paint);
            }
            stats.oneway_arrows += 1;
        }
    }

    // ========================================================================
    // 符号
    // ========================================================================

    fn draw_icons<C: Canvas>(
        &self,
        canvas: &mut C,
        projection: &CanvasProjection,
        collisions: &mut QuadTree<SymbolKey>,
        primitives: &PrimitivisedObjects,
        stats: &mut RasterStats,
    ) {
        let mut icons: Vec<&IconSymbol> = primitives
            .symbols()
            .filter_map(|s| match s {
                Symbol::Icon(icon) => Some(icon),
                Symbol::Text(_) => None,
            })
            .collect();
        icons.sort_by_key(|i| (i.order, i.object_id, i.sub_index));

        let bounds = canvas.bounds();
        let scale = self.env.scale;
        for icon in icons {
            let location = projection.point(&icon.location31);
            if !bounds.contains(location) {
                continue;
            }
            let shield = icon.shield.as_deref().and_then(|name| self.env.resources.shield(name));
            let layers: Vec<Arc<Bitmap>> = icon
                .layers
                .iter()
                .filter_map(|name| {
                    let bitmap = self.env.resources.icon(name);
                    if bitmap.is_none() {
                        tracing::debug!(icon = %name, "icon resource missing");
                    }
                    bitmap
                })
                .collect();
            if layers.is_empty() && shield.is_none() {
                continue;
            }

            let (w, h) = layers
                .iter()
                .chain(shield.iter())
                .fold((0.0f64, 0.0f64), |(w, h), b| {
                    (w.max(f64::from(b.width())), h.max(f64::from(b.height())))
                });
            let size = Size::new(w * scale, h * scale);
            let center = location
                + Vec2::new(
                    f64::from(icon.shift_px) * size.width,
                    f64::from(icon.shift_py) * size.height,
                );
            let dest = Rect::from_center_size(center, size);

            let collision_size = if icon.intersection_size > 0.0 {
                let side = f64::from(icon.intersection_size) * scale;
                Size::new(side, side)
            } else if icon.visible_size > 0.0 {
                let side = f64::from(icon.visible_size) * scale;
                Size::new(side, side)
            } else {
                size
            };
            let margin = f64::from(icon.intersection_margin) * scale;
            let collision = Rect::from_center_size(center, collision_size).inflate(margin, margin);
            if !collisions.insert_if_free(collision, (icon.object_id, icon.sub_index)) {
                stats.icons_rejected += 1;
                continue;
            }

            if let Some(shield) = &shield {
                canvas.draw_bitmap(shield, dest);
            }
            for bitmap in &layers {
                canvas.draw_bitmap(bitmap, dest);
            }
            stats.icons_drawn += 1;
        }
    }

    fn draw_texts<C: Canvas>(
        &self,
        canvas: &mut C,
        projection: &CanvasProjection,
        collisions: &mut QuadTree<SymbolKey>,
        primitives: &PrimitivisedObjects,
        stats: &mut RasterStats,
    ) {
        let texts: Vec<TextSymbol> = primitives
            .symbols()
            .filter_map(|s| match s {
                Symbol::Text(text) => Some(text.clone()),
                Symbol::Icon(_) => None,
            })
            .collect();
        let ppu = projection.pixels_per_unit();
        let (gap31, max_length31) = if ppu > 0.0 {
            (
                COMBINE_GAP_DIP * self.env.density / ppu,
                COMBINE_MAX_LENGTH_DIP * self.env.density / ppu,
            )
        } else {
            (0.0, 0.0)
        };
        let mut texts = text::combine_similar_texts(texts, gap31, max_length31);
        texts.sort_by_key(|t| (t.order, t.object_id, t.sub_index));

        let bounds = canvas.bounds();
        let scale = self.env.scale;
        let mut placed: Vec<(String, Point)> = Vec::new();
        for symbol in &texts {
            let size = f64::from(symbol.size) * self.env.text_scale;
            let face = self.env.fonts.select(&symbol.text, symbol.bold, symbol.italic);
            let paint = TextPaint {
                font: face.name.clone(),
                size,
                color: symbol.color,
                bold: symbol.bold,
                italic: symbol.italic,
                halo_radius: f64::from(symbol.halo_radius) * scale,
                halo_color: symbol.halo_color,
            };

            let (layout, text_box) = if symbol.is_on_path() {
                let path = projection.points(&symbol.path31);
                let width = face.measure(&symbol.text, size);
                let Some(placement) = text::place_on_path(&path, width, size, bounds) else {
                    stats.texts_rejected += 1;
                    continue;
                };
                (TextLayout::Path(placement.points), placement.bounds)
            } else {
                let center = projection.point(&symbol.location31)
                    + Vec2::new(0.0, f64::from(symbol.dy) * scale);
                if !bounds.contains(center) {
                    continue;
                }
                let lines = text::wrap_text(&symbol.text, symbol.wrap_width);
                let width = lines
                    .iter()
                    .map(|l| face.measure(l, size))
                    .fold(0.0, f64::max);
                let height = lines.len() as f64 * size * TEXT_LINE_HEIGHT;
                let text_box = Rect::from_center_size(center, Size::new(width, height));
                (TextLayout::Lines(lines), text_box)
            };
            let anchor = text_box.center();

            let min_distance = f64::from(symbol.min_distance) * scale;
            if min_distance > 0.0
                && placed
                    .iter()
                    .any(|(text, p)| *text == symbol.text && p.distance(anchor) < min_distance)
            {
                stats.texts_rejected += 1;
                continue;
            }

            let factor = f64::from(symbol.intersection_size_factor).max(0.0);
            let margin = f64::from(symbol.intersection_margin) * scale;
            let collision = Rect::from_center_size(anchor, text_box.size() * factor)
                .inflate(margin, margin);
            if !collisions.insert_if_free(collision, (symbol.object_id, symbol.sub_index)) {
                stats.texts_rejected += 1;
                continue;
            }

            if let Some(shield) = symbol
                .shield
                .as_deref()
                .and_then(|name| self.env.resources.shield(name))
            {
                let padding = TEXT_SHIELD_PADDING * scale;
                canvas.draw_bitmap(&shield, text_box.inflate(padding, padding));
            }
            match &layout {
                TextLayout::Lines(lines) => {
                    let origin = Point::new(text_box.x0, text_box.y0 + size);
                    canvas.draw_text(lines, origin, &paint);
                }
                TextLayout::Path(points) => canvas.draw_text_on_path(&symbol.text, points, &paint),
            }
            placed.push((symbol.text.clone(), anchor));
            stats.texts_drawn += 1;
        }
    }
}
