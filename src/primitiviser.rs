//! 图元化
//!
//! 把一个瓦片的地图对象按样式转换为排序好的图元列表：
//!
//! 1. 海岸线折线替换为多边形化后的水域 / 陆地环；没有海岸线时按底色填充
//! 2. 对象的每个类型在 order 规则集中求值，得到 order / objectType / shadowLevel
//! 3. 面、线、点分别在各自规则集中求值；过小的面只保留为点 (标注)
//! 4. 道路按密度网格限流
//! 5. 按 z 序排序，并为点与线生成图标和文字符号

use crate::area::{
    interior_point_in_area, points_center, polygon_area31, polygon_contains_point, PointI,
    ZoomLevel,
};
use crate::coastline::{fill_entire_area, polygonize_coastlines};
use crate::config::RenderConfig;
use crate::error::{ObfError, ObfResult};
use crate::language::select_captions;
use crate::map_object::MapObject;
use crate::primitives::{
    IconSymbol, Primitive, PrimitiveType, PrimitivesGroup, PrimitivisedObjects, Symbol,
    TextSymbol, TileContext,
};
use crate::query::{is_aborted, MapFoundationType, QueryController};
use crate::style::{props, RuleSet, Style};
use crate::style_evaluator::{EvaluationResult, StyleEvaluator};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// 合成对象序号起点 (海岸线环与底色)
const SYNTHETIC_ID_BASE: i64 = 1;
const DEFAULT_SYMBOL_ORDER: i32 = 100;
const OBJECTS_PER_ABORT_CHECK: usize = 64;

/// 样式在当前缩放级别下的全局属性
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileAttributes {
    pub background_color: u32,
    pub shadow_rendering_mode: i32,
    /// 面最小像素面积
    pub polygon_min_size: f64,
    pub road_density_zoom_tile: i32,
    /// 0 表示不限流
    pub roads_density_limit: u32,
}

pub struct Primitiviser {
    style: Arc<Style>,
    config: RenderConfig,
}

impl Primitiviser {
    pub fn new(style: Arc<Style>, config: RenderConfig) -> Self {
        Self { style, config }
    }

    pub fn style(&self) -> &Arc<Style> {
        &self.style
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// 样式属性优先，缺省时回退到配置
    pub fn tile_attributes(&self, zoom: ZoomLevel) -> TileAttributes {
        let mut evaluator = StyleEvaluator::new(&self.style);
        evaluator.set_zoom(zoom);
        TileAttributes {
            background_color: evaluator
                .attribute_color("defaultColor")
                .unwrap_or(self.config.default_background_color),
            shadow_rendering_mode: evaluator
                .attribute_int("shadowRendering")
                .unwrap_or(self.config.shadow_rendering_mode),
            polygon_min_size: evaluator
                .attribute_float("polygonMinSizeToDisplay")
                .map(f64::from)
                .unwrap_or(self.config.polygon_min_size_to_display),
            road_density_zoom_tile: evaluator
                .attribute_int("roadDensityZoomTile")
                .unwrap_or(self.config.road_density_zoom_tile),
            roads_density_limit: evaluator
                .attribute_int("roadsDensityLimitPerTile")
                .map(|v| v.max(0) as u32)
                .unwrap_or(self.config.roads_density_limit_per_tile),
        }
    }

    /// 一次完成整个瓦片的图元化 (不经过共享缓存)
    pub fn primitivise(
        &self,
        context: &TileContext,
        objects: &[Arc<MapObject>],
        foundation: MapFoundationType,
        controller: Option<&dyn QueryController>,
    ) -> ObfResult<PrimitivisedObjects> {
        let attributes = self.tile_attributes(context.zoom);
        let prepared = self.prepare_objects(context, objects, foundation);
        let mut groups = Vec::with_capacity(prepared.len());
        for (index, object) in prepared.iter().enumerate() {
            if index % OBJECTS_PER_ABORT_CHECK == 0 && is_aborted(controller) {
                return Err(ObfError::Cancelled);
            }
            groups.push(Arc::new(self.build_group(context, object, &attributes)));
        }
        Ok(self.assemble(context, foundation, &attributes, groups))
    }

    // ========================================================================
    // 海岸线
    // ========================================================================

    /// 用多边形化结果替换海岸线折线
    pub fn prepare_objects(
        &self,
        context: &TileContext,
        objects: &[Arc<MapObject>],
        foundation: MapFoundationType,
    ) -> Vec<Arc<MapObject>> {
        let (coastlines, rest): (Vec<Arc<MapObject>>, Vec<Arc<MapObject>>) = objects
            .iter()
            .cloned()
            .partition(|o| o.is_coastline() && !o.is_closed_figure(false));

        let mut prepared = Vec::with_capacity(rest.len() + 2);
        if !coastlines.is_empty() {
            let polygons = polygonize_coastlines(
                &context.area31,
                context.zoom,
                &coastlines,
                SYNTHETIC_ID_BASE,
            );
            if polygons.objects.is_empty() {
                prepared.push(Arc::new(fill_entire_area(
                    &context.area31,
                    foundation,
                    SYNTHETIC_ID_BASE,
                )));
            } else {
                prepared.extend(polygons.objects.into_iter().map(Arc::new));
            }
        } else if foundation != MapFoundationType::Undefined {
            prepared.push(Arc::new(fill_entire_area(
                &context.area31,
                foundation,
                SYNTHETIC_ID_BASE,
            )));
        }
        prepared.extend(rest);
        prepared
    }

    // ========================================================================
    // 单个对象
    // ========================================================================

    /// 计算一个对象的图元与符号
    ///
    /// 结果只依赖对象、缩放级别与瓦片像素尺寸，因此可以跨瓦片共享。
    pub fn build_group(
        &self,
        context: &TileContext,
        object: &Arc<MapObject>,
        attributes: &TileAttributes,
    ) -> PrimitivesGroup {
        let mut group = PrimitivesGroup::new(object.clone());
        let additional: Vec<(&str, &str)> = object
            .additional_type_ids
            .iter()
            .filter_map(|&id| object.encoding.rule(id))
            .map(|r| (r.tag.as_str(), r.value.as_str()))
            .collect();
        let is_closed = object.is_closed_figure(false);
        let ppu = context.pixels_per_unit();
        let area_px = if is_closed {
            polygon_area31(&object.points31) * ppu * ppu
        } else {
            0.0
        };
        let layer = object.simple_layer();

        for type_index in 0..object.type_ids.len() {
            let Some(rule) = object.type_rule(type_index) else {
                tracing::error!(
                    object = object.id.0,
                    type_id = object.type_ids[type_index],
                    "unknown encoding rule"
                );
                continue;
            };
            let mut evaluator = StyleEvaluator::new(&self.style);
            evaluator
                .set_tag_value(&rule.tag, &rule.value)
                .set_zoom(context.zoom)
                .set_int(props::LAYER, layer)
                .set_bool(props::AREA, object.is_area)
                .set_bool(props::POINT, object.points31.len() == 1)
                .set_bool(props::CYCLE, is_closed)
                .set_additional(additional.iter().copied());

            let Some(order_eval) = evaluator.evaluate(RuleSet::Order) else {
                continue;
            };
            let order = order_eval.int_or(props::ORDER, -1);
            if order < 0 {
                continue;
            }
            let shadow_level = order_eval.int_or(props::SHADOW_LEVEL, 0);
            let Some(kind) = PrimitiveType::from_object_type(order_eval.int_or(props::OBJECT_TYPE, 0))
            else {
                continue;
            };
            let make = |kind: PrimitiveType, z_order: f64, evaluation: EvaluationResult| Primitive {
                object: object.clone(),
                kind,
                type_index,
                z_order,
                area_px,
                shadow_level,
                evaluation,
            };

            match kind {
                PrimitiveType::Polygon => {
                    if object.points31.len() <= 2 {
                        tracing::warn!(
                            object = object.id.0,
                            points = object.points31.len(),
                            "polygon has too few points"
                        );
                        continue;
                    }
                    if !is_closed {
                        tracing::warn!(object = object.id.0, "polygon is not closed");
                        continue;
                    }
                    let Some(polygon_eval) = evaluator.evaluate(RuleSet::Polygon) else {
                        continue;
                    };
                    if area_px >= attributes.polygon_min_size && area_px > 0.0 {
                        let z_order = f64::from(order) + 1.0 / area_px;
                        group
                            .polygons
                            .push(Arc::new(make(PrimitiveType::Polygon, z_order, polygon_eval)));
                    }
                    if !order_eval.bool_or(props::IGNORE_POLYGON_AS_POINT_AREA, false) {
                        let point_eval = evaluator.evaluate(RuleSet::Point).unwrap_or_default();
                        group
                            .points
                            .push(Arc::new(make(PrimitiveType::Point, f64::from(order), point_eval)));
                    }
                }
                PrimitiveType::Polyline => {
                    if object.points31.len() < 2 {
                        continue;
                    }
                    let Some(line_eval) = evaluator.evaluate(RuleSet::Line) else {
                        continue;
                    };
                    group
                        .polylines
                        .push(Arc::new(make(PrimitiveType::Polyline, f64::from(order), line_eval)));
                }
                PrimitiveType::Point => {
                    if object.points31.is_empty() {
                        continue;
                    }
                    let point_eval = evaluator.evaluate(RuleSet::Point).unwrap_or_default();
                    group
                        .points
                        .push(Arc::new(make(PrimitiveType::Point, f64::from(order), point_eval)));
                }
            }
        }

        self.collect_symbols(context, &mut group, &additional);
        group
    }

    // ========================================================================
    // 符号
    // ========================================================================

    fn collect_symbols(
        &self,
        context: &TileContext,
        group: &mut PrimitivesGroup,
        additional: &[(&str, &str)],
    ) {
        let object = group.object.clone();
        let mut sub_index = 0u32;
        let mut symbols = Vec::new();

        for point in &group.points {
            let Some(location) = point_location(&object) else {
                continue;
            };
            if let Some(icon) = icon_symbol(point, location, sub_index) {
                symbols.push(Symbol::Icon(icon));
                sub_index += 1;
            }
        }

        // 文字只挂在第一个点图元上；没有点图元时沿第一条线
        let anchor = group.points.first().or_else(|| group.polylines.first());
        if let Some(anchor) = anchor {
            let on_path = anchor.kind == PrimitiveType::Polyline;
            let location = if on_path {
                object.points31.get(object.points31.len() / 2).copied()
            } else {
                point_location(&object)
            };
            if let Some(location) = location {
                for (name_tag, text) in self.caption_texts(&object) {
                    if let Some(symbol) = self.text_symbol(
                        context,
                        anchor,
                        additional,
                        &name_tag,
                        text,
                        location,
                        on_path,
                        sub_index,
                    ) {
                        symbols.push(Symbol::Text(symbol));
                        sub_index += 1;
                    }
                }
            }
        }
        group.symbols = symbols;
    }

    /// (nameTag, 文本)：按语言策略选出的名称在前，其余非 name 标签随后
    fn caption_texts(&self, object: &MapObject) -> Vec<(String, String)> {
        let localized_tag = format!("name:{}", self.config.locale_language);
        let mut texts: Vec<(String, String)> = select_captions(
            self.config.language_preference,
            object.caption("name"),
            object.caption(&localized_tag),
        )
        .into_iter()
        .map(|text| (String::new(), text))
        .collect();
        for (tag, text) in object.captions_in_order() {
            if tag == "name" || tag.starts_with("name:") || text.is_empty() {
                continue;
            }
            texts.push((tag.to_string(), text.to_string()));
        }
        texts
    }

    #[allow(clippy::too_many_arguments)]
    fn text_symbol(
        &self,
        context: &TileContext,
        anchor: &Primitive,
        additional: &[(&str, &str)],
        name_tag: &str,
        text: String,
        location31: PointI,
        on_path: bool,
        sub_index: u32,
    ) -> Option<TextSymbol> {
        let object = &anchor.object;
        let (tag, value) = anchor.tag_value();
        let mut evaluator = StyleEvaluator::new(&self.style);
        evaluator
            .set_tag_value(tag, value)
            .set_zoom(context.zoom)
            .set_int(props::LAYER, object.simple_layer())
            .set_bool(props::AREA, object.is_area)
            .set_bool(props::POINT, object.points31.len() == 1)
            .set_bool(props::CYCLE, object.is_closed_figure(false))
            .set_string(props::NAME_TAG, name_tag)
            .set_int(props::TEXT_LENGTH, text.chars().count() as i32)
            .set_additional(additional.iter().copied());
        let evaluation = evaluator.evaluate(RuleSet::Text)?;
        let size = evaluation.float_or(props::TEXT_SIZE, 0.0);
        if size <= 0.0 {
            return None;
        }
        let on_path = on_path && evaluation.bool_or(props::TEXT_ON_PATH, true);
        let wrap_width = if on_path {
            0
        } else {
            match evaluation.int(props::TEXT_WRAP_WIDTH) {
                Some(width) => width.max(0) as usize,
                None => self.config.default_text_wrap_chars,
            }
        };
        Some(TextSymbol {
            object_id: object.id,
            sub_index,
            text,
            name_tag: name_tag.to_string(),
            location31,
            path31: if on_path {
                object.points31.clone()
            } else {
                Vec::new()
            },
            order: evaluation.int_or(props::TEXT_ORDER, DEFAULT_SYMBOL_ORDER),
            size,
            color: evaluation.color(props::TEXT_COLOR).unwrap_or(0xff00_0000),
            halo_radius: evaluation.float_or(props::TEXT_HALO_RADIUS, 0.0),
            halo_color: evaluation.color(props::TEXT_HALO_COLOR).unwrap_or(0xffff_ffff),
            wrap_width,
            min_distance: evaluation.float_or(props::TEXT_MIN_DISTANCE, 0.0),
            bold: evaluation.bool_or(props::TEXT_BOLD, false),
            italic: evaluation.bool_or(props::TEXT_ITALIC, false),
            dy: evaluation.float_or(props::TEXT_DY, 0.0),
            shield: evaluation.string(props::TEXT_SHIELD).map(str::to_string),
            intersection_margin: evaluation.float_or(props::INTERSECTION_MARGIN, 0.0),
            intersection_size_factor: evaluation.float_or(props::INTERSECTION_SIZE_FACTOR, 1.0),
        })
    }

    // ========================================================================
    // 汇总
    // ========================================================================

    /// 合并各对象的图元，限流并排序
    pub fn assemble(
        &self,
        context: &TileContext,
        foundation: MapFoundationType,
        attributes: &TileAttributes,
        groups: Vec<Arc<PrimitivesGroup>>,
    ) -> PrimitivisedObjects {
        let mut polygons = Vec::new();
        let mut polylines = Vec::new();
        let mut points = Vec::new();
        for group in &groups {
            polygons.extend(group.polygons.iter().cloned());
            polylines.extend(group.polylines.iter().cloned());
            points.extend(group.points.iter().cloned());
        }

        polygons.sort_by(|a, b| compare_primitives(a, b, true));
        polylines.sort_by(|a, b| compare_primitives(a, b, false));
        points.sort_by(|a, b| compare_primitives(a, b, false));

        let polylines = filter_by_density(
            polylines,
            context.zoom,
            attributes.road_density_zoom_tile,
            attributes.roads_density_limit,
        );

        let shadow_levels = polylines
            .iter()
            .map(|p| p.shadow_level)
            .filter(|&level| level > 0);
        let (shadow_level_min, shadow_level_max) = shadow_levels
            .fold(None, |acc: Option<(i32, i32)>, level| match acc {
                None => Some((level, level)),
                Some((lo, hi)) => Some((lo.min(level), hi.max(level))),
            })
            .unwrap_or((0, 0));

        tracing::debug!(
            zoom = context.zoom,
            polygons = polygons.len(),
            polylines = polylines.len(),
            points = points.len(),
            "primitivised tile"
        );

        PrimitivisedObjects {
            context: *context,
            foundation,
            background_color: attributes.background_color,
            shadow_rendering_mode: attributes.shadow_rendering_mode,
            shadow_level_min,
            shadow_level_max,
            polygons,
            polylines,
            points,
            groups,
        }
    }
}

/// z 序升序；面在同 z 时类型下标大的在前
fn compare_primitives(a: &Primitive, b: &Primitive, polygons: bool) -> Ordering {
    a.z_order
        .total_cmp(&b.z_order)
        .then_with(|| {
            if polygons {
                b.type_index.cmp(&a.type_index)
            } else {
                a.type_index.cmp(&b.type_index)
            }
        })
        .then_with(|| a.object.points31.len().cmp(&b.object.points31.len()))
        .then_with(|| a.object.id.cmp(&b.object.id))
}

/// 道路密度限流
///
/// 以 `zoom + density_zoom_tile` 级网格分桶，从排序末尾 (优先级最高) 开始，
/// 只要线经过的任一网格未满即保留，并只计入其中未满的网格。
/// `density_zoom_tile` 或 `limit` 为 0 时不做过滤。
pub fn filter_by_density(
    polylines: Vec<Arc<Primitive>>,
    zoom: ZoomLevel,
    density_zoom_tile: i32,
    limit: u32,
) -> Vec<Arc<Primitive>> {
    if density_zoom_tile == 0 || limit == 0 {
        return polylines;
    }
    let dz = (i32::from(zoom) + density_zoom_tile).clamp(0, 31) as u32;
    let shift = 31 - dz;
    let mut counts: HashMap<i64, u32> = HashMap::new();
    let mut accepted = Vec::with_capacity(polylines.len());

    for primitive in polylines.into_iter().rev() {
        if primitive.tag_value().0 != "highway" {
            accepted.push(primitive);
            continue;
        }
        let cells: BTreeSet<i64> = primitive
            .object
            .points31
            .iter()
            .map(|p| {
                let x = i64::from(p.x) >> shift;
                let y = i64::from(p.y) >> shift;
                (x << dz) | y
            })
            .collect();
        let mut has_room = false;
        for cell in cells {
            let count = counts.entry(cell).or_insert(0);
            if *count < limit {
                *count += 1;
                has_room = true;
            }
        }
        if has_room {
            accepted.push(primitive);
        }
    }
    accepted.reverse();
    accepted
}

/// 点符号的位置：单点、标注点、质心 (在环内时) 或环内任一点
fn point_location(object: &MapObject) -> Option<PointI> {
    if object.points31.len() == 1 {
        return object.points31.first().copied();
    }
    if let Some(label) = object.label31 {
        return Some(label);
    }
    if object.is_closed_figure(false) {
        let center = points_center(&object.points31)?;
        if polygon_contains_point(&object.points31, &center) {
            return Some(center);
        }
        return interior_point_in_area(&object.points31, &object.bbox31);
    }
    object.points31.get(object.points31.len() / 2).copied()
}

fn icon_symbol(point: &Primitive, location31: PointI, sub_index: u32) -> Option<IconSymbol> {
    let evaluation = &point.evaluation;
    let layers: Vec<String> = [
        props::ICON_1,
        props::ICON,
        props::ICON_2,
        props::ICON_3,
        props::ICON_4,
        props::ICON_5,
    ]
    .into_iter()
    .filter_map(|id| evaluation.string(id).map(str::to_string))
    .collect();
    if layers.is_empty() {
        return None;
    }
    Some(IconSymbol {
        object_id: point.object.id,
        sub_index,
        location31,
        order: evaluation.int_or(props::ICON_ORDER, DEFAULT_SYMBOL_ORDER),
        layers,
        shield: evaluation.string(props::SHIELD).map(str::to_string),
        shift_px: evaluation.float_or(props::ICON_SHIFT_PX, 0.0),
        shift_py: evaluation.float_or(props::ICON_SHIFT_PY, 0.0),
        visible_size: evaluation.float_or(props::ICON_VISIBLE_SIZE, 0.0),
        intersection_margin: evaluation.float_or(props::INTERSECTION_MARGIN, 0.0),
        intersection_size: evaluation.float_or(props::INTERSECTION_SIZE, 0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::TileId;
    use crate::map_object::MapObjectOrigin;
    use crate::test_support::{memory_object, TEST_STYLE_JSON};

    const ZOOM: ZoomLevel = 16;

    fn primitiviser(config: RenderConfig) -> Primitiviser {
        let style = Style::from_json(TEST_STYLE_JSON).expect("test style");
        Primitiviser::new(Arc::new(style), config)
    }

    fn context() -> TileContext {
        TileContext::new(TileId::new(0, 0), ZOOM, 256)
    }

    fn water() -> Arc<MapObject> {
        memory_object(
            10,
            &[("natural", "water")],
            &[(1000, 1000), (20000, 1000), (20000, 20000), (1000, 20000), (1000, 1000)],
            &[("name", "Lake")],
        )
    }

    fn road(id: i64, y: i32) -> Arc<MapObject> {
        memory_object(
            id,
            &[("highway", "residential")],
            &[(2000, y), (30000, y)],
            &[("name", "Main Street")],
        )
    }

    #[test]
    fn test_polygon_and_polyline_primitives() {
        let primitiviser = primitiviser(RenderConfig::default());
        let objects = vec![road(20, 5000), water()];
        let result = primitiviser
            .primitivise(&context(), &objects, MapFoundationType::Undefined, None)
            .unwrap();

        assert_eq!(result.polygons.len(), 1);
        assert_eq!(result.polygons[0].object.id.0, 10);
        assert_eq!(result.polygons[0].order(), 10);
        assert_eq!(result.polygons[0].evaluation.color(props::COLOR), Some(0xff00_00ff));

        assert_eq!(result.polylines.len(), 1);
        assert_eq!(result.polylines[0].object.id.0, 20);
        assert_eq!(result.polylines[0].order(), 20);
        assert_eq!(result.polylines[0].evaluation.float(props::STROKE_WIDTH), Some(2.0));

        // 水面作为点保留用于标注
        assert_eq!(result.points.len(), 1);
        let texts: Vec<&str> = result
            .symbols()
            .filter_map(|s| match s {
                Symbol::Text(t) => Some(t.text.as_str()),
                Symbol::Icon(_) => None,
            })
            .collect();
        assert!(texts.contains(&"Lake"));
        assert!(texts.contains(&"Main Street"));
    }

    #[test]
    fn test_primitivise_is_idempotent() {
        let primitiviser = primitiviser(RenderConfig::default());
        let objects = vec![water(), road(20, 5000), road(21, 9000)];
        let first = primitiviser
            .primitivise(&context(), &objects, MapFoundationType::FullLand, None)
            .unwrap();
        let second = primitiviser
            .primitivise(&context(), &objects, MapFoundationType::FullLand, None)
            .unwrap();
        assert_eq!(first.polygons, second.polygons);
        assert_eq!(first.polylines, second.polylines);
        assert_eq!(first.points, second.points);
        let first_symbols: Vec<&Symbol> = first.symbols().collect();
        let second_symbols: Vec<&Symbol> = second.symbols().collect();
        assert_eq!(first_symbols, second_symbols);
    }

    #[test]
    fn test_polygons_sorted_with_area_penalty() {
        let primitiviser = primitiviser(RenderConfig::default());
        let small = memory_object(
            11,
            &[("natural", "water")],
            &[(100, 100), (600, 100), (600, 600), (100, 600), (100, 100)],
            &[],
        );
        let result = primitiviser
            .primitivise(&context(), &[small, water()], MapFoundationType::FullLand, None)
            .unwrap();
        let ids: Vec<i64> = result.polygons.iter().map(|p| p.object.id.0).collect();
        // 陆地底色 (order 4) 最先，其后大水面，小水面最后
        assert_eq!(ids.len(), 3);
        assert_eq!(result.polygons[0].object.origin, MapObjectOrigin::Synthetic);
        assert_eq!(&ids[1..], &[10, 11]);
    }

    #[test]
    fn test_density_limit_keeps_exactly_limit() {
        let config = RenderConfig {
            roads_density_limit_per_tile: 3,
            road_density_zoom_tile: 2,
            ..RenderConfig::default()
        };
        let primitiviser = primitiviser(config);
        let roads: Vec<Arc<MapObject>> = (0..8).map(|i| road(100 + i, 3000 + i as i32 * 10)).collect();
        let result = primitiviser
            .primitivise(&context(), &roads, MapFoundationType::Undefined, None)
            .unwrap();
        assert_eq!(result.polylines.len(), 3);
        // 排序靠后的优先保留
        let ids: Vec<i64> = result.polylines.iter().map(|p| p.object.id.0).collect();
        assert_eq!(ids, vec![105, 106, 107]);
    }

    #[test]
    fn test_density_filter_off_at_zero_zoom_tile() {
        let config = RenderConfig {
            roads_density_limit_per_tile: 3,
            road_density_zoom_tile: 0,
            ..RenderConfig::default()
        };
        let primitiviser = primitiviser(config);
        let roads: Vec<Arc<MapObject>> = (0..8).map(|i| road(100 + i, 3000 + i as i32 * 10)).collect();
        let result = primitiviser
            .primitivise(&context(), &roads, MapFoundationType::Undefined, None)
            .unwrap();
        assert_eq!(result.polylines.len(), 8);
    }

    #[test]
    fn test_density_counts_only_cells_with_room() {
        let config = RenderConfig {
            roads_density_limit_per_tile: 1,
            road_density_zoom_tile: 2,
            ..RenderConfig::default()
        };
        let primitiviser = primitiviser(config);
        // 网格边长 8192：a 经过 (0,0) 与 (3,0)，b 经过 (3,0) 与 (3,3)，c 只经过 (3,3)
        let line = |id: i64, coords: &[(i32, i32)]| {
            memory_object(id, &[("highway", "residential")], coords, &[])
        };
        let objects = vec![
            line(300, &[(30000, 28000), (31000, 29000)]),
            line(301, &[(30000, 3000), (30000, 28000)]),
            line(302, &[(2000, 3000), (30000, 3000)]),
        ];
        let result = primitiviser
            .primitivise(&context(), &objects, MapFoundationType::Undefined, None)
            .unwrap();
        let mut ids: Vec<i64> = result.polylines.iter().map(|p| p.object.id.0).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![301, 302]);
    }

    #[test]
    fn test_coastline_replaced_by_rings() {
        let primitiviser = primitiviser(RenderConfig::default());
        let tile = context().area31;
        let mid = tile.top + (tile.bottom - tile.top) / 2;
        let coast = memory_object(
            50,
            &[("natural", "coastline")],
            &[(tile.left - 100, mid), (tile.right + 100, mid)],
            &[],
        );
        let result = primitiviser
            .primitivise(&context(), &[coast], MapFoundationType::Mixed, None)
            .unwrap();
        // 陆地底色 + 一块水域环；原始海岸线不再出现
        assert_eq!(result.polygons.len(), 2);
        assert!(result.polygons.iter().all(|p| p.object.id.0 <= 0));
        assert_eq!(result.polygons[0].tag_value(), ("natural", "land"));
        assert_eq!(result.polygons[1].tag_value(), ("natural", "coastline"));
        assert!(result.polylines.is_empty());
    }

    #[test]
    fn test_undefined_foundation_without_coastline_adds_nothing() {
        let primitiviser = primitiviser(RenderConfig::default());
        let prepared =
            primitiviser.prepare_objects(&context(), &[water()], MapFoundationType::Undefined);
        assert_eq!(prepared.len(), 1);
        let prepared =
            primitiviser.prepare_objects(&context(), &[water()], MapFoundationType::FullWater);
        assert_eq!(prepared.len(), 2);
        assert!(prepared[0].is_coastline());
    }

    #[test]
    fn test_cafe_point_gets_icon() {
        let primitiviser = primitiviser(RenderConfig::default());
        let cafe = memory_object(30, &[("amenity", "cafe")], &[(5000, 5000)], &[]);
        let result = primitiviser
            .primitivise(&context(), &[cafe], MapFoundationType::Undefined, None)
            .unwrap();
        let icons: Vec<&IconSymbol> = result
            .symbols()
            .filter_map(|s| match s {
                Symbol::Icon(icon) => Some(icon),
                Symbol::Text(_) => None,
            })
            .collect();
        assert_eq!(icons.len(), 1);
        assert_eq!(icons[0].layers, vec!["cafe".to_string()]);
        assert_eq!(icons[0].location31, PointI::new(5000, 5000));
    }

    #[test]
    fn test_cancelled_primitivise() {
        use crate::query::CancellationFlag;
        let flag = CancellationFlag::new();
        flag.abort();
        let primitiviser = primitiviser(RenderConfig::default());
        let result = primitiviser.primitivise(
            &context(),
            &[water()],
            MapFoundationType::Undefined,
            Some(&flag as &dyn QueryController),
        );
        assert!(matches!(result, Err(ObfError::Cancelled)));
    }
}
