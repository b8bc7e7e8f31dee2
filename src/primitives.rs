//! 图元与符号
//!
//! - `Primitive`: 一个对象的一个类型在样式中求值后的可绘制单元 (面 / 线 / 点)
//! - `Symbol`: 图标或文字，栅格化时参与碰撞检测
//! - `PrimitivesGroup`: 一个对象产生的全部图元与符号，跨瓦片共享时整体缓存
//! - `PrimitivisedObjects`: 一个瓦片排序完毕、可直接栅格化的结果

use crate::area::{AreaI, PointI, TileId, ZoomLevel, MAX_ZOOM_LEVEL};
use crate::map_object::{MapObject, ObfObjectId};
use crate::query::MapFoundationType;
use crate::style_evaluator::EvaluationResult;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PrimitiveType {
    Point = 1,
    Polyline = 2,
    Polygon = 3,
}

impl PrimitiveType {
    /// 排序规则集输出的 objectType
    pub fn from_object_type(value: i32) -> Option<PrimitiveType> {
        match value {
            1 => Some(PrimitiveType::Point),
            2 => Some(PrimitiveType::Polyline),
            3 => Some(PrimitiveType::Polygon),
            _ => None,
        }
    }
}

/// 瓦片的像素坐标换算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileContext {
    pub area31: AreaI,
    pub zoom: ZoomLevel,
    pub tile_size_px: u32,
}

impl TileContext {
    pub fn new(tile_id: TileId, zoom: ZoomLevel, tile_size_px: u32) -> Self {
        Self {
            area31: tile_id.bbox31(zoom),
            zoom,
            tile_size_px,
        }
    }

    /// 每个 31 位单位对应的像素数
    pub fn pixels_per_unit(&self) -> f64 {
        let shift = i32::from(MAX_ZOOM_LEVEL - self.zoom.min(MAX_ZOOM_LEVEL));
        f64::from(self.tile_size_px) / 2f64.powi(shift)
    }

    /// 31 位点到瓦片像素坐标
    pub fn to_pixel(&self, p: &PointI) -> (f64, f64) {
        let ppu = self.pixels_per_unit();
        (
            (f64::from(p.x) - f64::from(self.area31.left)) * ppu,
            (f64::from(p.y) - f64::from(self.area31.top)) * ppu,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Primitive {
    pub object: Arc<MapObject>,
    pub kind: PrimitiveType,
    /// 对象类型列表中的下标
    pub type_index: usize,
    /// order，面另加 1/面积
    pub z_order: f64,
    /// 像素面积 (仅面)
    pub area_px: f64,
    pub shadow_level: i32,
    pub evaluation: EvaluationResult,
}

impl Primitive {
    pub fn order(&self) -> i32 {
        self.z_order.floor() as i32
    }

    /// 图元对应的 (tag, value)
    pub fn tag_value(&self) -> (&str, &str) {
        self.object
            .type_rule(self.type_index)
            .map(|r| (r.tag.as_str(), r.value.as_str()))
            .unwrap_or(("", ""))
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        self.object.id == other.object.id
            && self.kind == other.kind
            && self.type_index == other.type_index
            && self.z_order.to_bits() == other.z_order.to_bits()
            && self.shadow_level == other.shadow_level
            && self.evaluation == other.evaluation
    }
}

// ============================================================================
// 符号
// ============================================================================

/// 图标叠加的层 (自下而上)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IconSymbol {
    pub object_id: ObfObjectId,
    pub sub_index: u32,
    pub location31: PointI,
    pub order: i32,
    /// 由下至上：icon_1, icon, icon2..icon5
    pub layers: Vec<String>,
    pub shield: Option<String>,
    pub shift_px: f32,
    pub shift_py: f32,
    pub visible_size: f32,
    pub intersection_margin: f32,
    pub intersection_size: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSymbol {
    pub object_id: ObfObjectId,
    pub sub_index: u32,
    pub text: String,
    pub name_tag: String,
    pub location31: PointI,
    /// 非空时沿路径绘制
    pub path31: Vec<PointI>,
    pub order: i32,
    pub size: f32,
    pub color: u32,
    pub halo_radius: f32,
    pub halo_color: u32,
    /// 折行宽度 (字符数)，0 为不折行
    pub wrap_width: usize,
    pub min_distance: f32,
    pub bold: bool,
    pub italic: bool,
    pub dy: f32,
    pub shield: Option<String>,
    pub intersection_margin: f32,
    pub intersection_size_factor: f32,
}

impl TextSymbol {
    pub fn is_on_path(&self) -> bool {
        self.path31.len() >= 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Symbol {
    Icon(IconSymbol),
    Text(TextSymbol),
}

impl Symbol {
    pub fn order(&self) -> i32 {
        match self {
            Symbol::Icon(icon) => icon.order,
            Symbol::Text(text) => text.order,
        }
    }

    pub fn object_id(&self) -> ObfObjectId {
        match self {
            Symbol::Icon(icon) => icon.object_id,
            Symbol::Text(text) => text.object_id,
        }
    }

    pub fn sub_index(&self) -> u32 {
        match self {
            Symbol::Icon(icon) => icon.sub_index,
            Symbol::Text(text) => text.sub_index,
        }
    }

    /// 放置优先级：order 升序，其次对象 id 与子序号
    pub fn priority_key(&self) -> (i32, ObfObjectId, u32) {
        (self.order(), self.object_id(), self.sub_index())
    }
}

// ============================================================================
// 分组与瓦片结果
// ============================================================================

/// 一个对象产生的图元与符号
#[derive(Debug, Clone)]
pub struct PrimitivesGroup {
    pub object: Arc<MapObject>,
    pub polygons: Vec<Arc<Primitive>>,
    pub polylines: Vec<Arc<Primitive>>,
    pub points: Vec<Arc<Primitive>>,
    pub symbols: Vec<Symbol>,
}

impl PrimitivesGroup {
    pub fn new(object: Arc<MapObject>) -> Self {
        Self {
            object,
            polygons: Vec::new(),
            polylines: Vec::new(),
            points: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
            && self.polylines.is_empty()
            && self.points.is_empty()
            && self.symbols.is_empty()
    }
}

/// 一个瓦片的排序后图元
#[derive(Debug, Clone)]
pub struct PrimitivisedObjects {
    pub context: TileContext,
    pub foundation: MapFoundationType,
    pub background_color: u32,
    pub shadow_rendering_mode: i32,
    pub shadow_level_min: i32,
    pub shadow_level_max: i32,
    pub polygons: Vec<Arc<Primitive>>,
    pub polylines: Vec<Arc<Primitive>>,
    pub points: Vec<Arc<Primitive>>,
    pub groups: Vec<Arc<PrimitivesGroup>>,
}

impl PrimitivisedObjects {
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> + '_ {
        self.groups.iter().flat_map(|g| g.symbols.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty() && self.polylines.is_empty() && self.points.is_empty()
    }
}
