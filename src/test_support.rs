//! 测试用 OBF 构建器
//!
//! 以与读取器对称的方式写出最小可用的 OBF 文件：每个 `TestBox` 成为层级下的一个根节点
//! (叶节点)，其数据块紧随根节点之后写入，shiftToData 在块位置确定后回填。

use crate::area::{AreaI, PointI, ZoomLevel};
use crate::map_section as ms;
use crate::obf_codec::{wire_type, CodedOutput};
use crate::obf_file::{self, MAP_VERSION};
use crate::route_section as rs;
use crate::spatial_tree::{
    FIELD_BOTTOM, FIELD_LEFT, FIELD_OCEAN, FIELD_RIGHT, FIELD_SHIFT_TO_DATA, FIELD_TOP,
};

const MAP_MASK: i32 = !31;

/// 按首次出现顺序分配的规则 id (从 1 开始)
#[derive(Default)]
struct RuleTable {
    rules: Vec<(String, String)>,
}

impl RuleTable {
    fn id(&mut self, tag: &str, value: &str) -> u32 {
        if let Some(pos) = self.rules.iter().position(|(t, v)| t == tag && v == value) {
            return pos as u32 + 1;
        }
        self.rules.push((tag.to_string(), value.to_string()));
        self.rules.len() as u32
    }
}

#[derive(Default)]
struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    fn index(&mut self, s: &str) -> u32 {
        if let Some(pos) = self.strings.iter().position(|x| x == s) {
            return pos as u32;
        }
        self.strings.push(s.to_string());
        self.strings.len() as u32 - 1
    }

    fn write(&self, out: &mut CodedOutput, field: u32) {
        let mut table = CodedOutput::new();
        for s in &self.strings {
            table.write_string_field(ms::STRING_TABLE_S, s);
        }
        out.write_message_field(field, table.as_bytes());
    }
}

fn pairs(tags: &[(&str, &str)]) -> Vec<(String, String)> {
    tags.iter()
        .map(|(t, v)| (t.to_string(), v.to_string()))
        .collect()
}

fn points(coords: &[(i32, i32)]) -> Vec<PointI> {
    coords.iter().map(|&(x, y)| PointI::new(x, y)).collect()
}

// ============================================================================
// 地图分区
// ============================================================================

#[derive(Debug, Clone)]
enum TestCaption {
    Text(String),
    Raw(u32),
}

#[derive(Debug, Clone)]
pub struct TestMapObject {
    id: i64,
    types: Vec<(String, String)>,
    additional: Vec<(String, String)>,
    points: Vec<PointI>,
    inner: Vec<Vec<PointI>>,
    label: Option<PointI>,
    captions: Vec<(String, TestCaption)>,
    is_area: bool,
}

impl TestMapObject {
    fn new(id: i64, types: &[(&str, &str)], points: Vec<PointI>, is_area: bool) -> Self {
        Self {
            id,
            types: pairs(types),
            additional: Vec::new(),
            points,
            inner: Vec::new(),
            label: None,
            captions: Vec::new(),
            is_area,
        }
    }

    pub fn polygon(id: i64, types: &[(&str, &str)], coords: &[(i32, i32)]) -> Self {
        Self::new(id, types, points(coords), true)
    }

    pub fn line(id: i64, types: &[(&str, &str)], coords: &[(i32, i32)]) -> Self {
        Self::new(id, types, points(coords), false)
    }

    pub fn point(id: i64, types: &[(&str, &str)], x: i32, y: i32) -> Self {
        Self::new(id, types, vec![PointI::new(x, y)], false)
    }

    pub fn with_name(mut self, tag: &str, text: &str) -> Self {
        self.captions
            .push((tag.to_string(), TestCaption::Text(text.to_string())));
        self
    }

    /// 直接写入字符串表下标 (可以越界)
    pub fn with_raw_caption(mut self, tag: &str, index: u32) -> Self {
        self.captions.push((tag.to_string(), TestCaption::Raw(index)));
        self
    }

    pub fn with_inner(mut self, coords: &[(i32, i32)]) -> Self {
        self.inner.push(points(coords));
        self
    }

    pub fn with_additional(mut self, tags: &[(&str, &str)]) -> Self {
        self.additional.extend(pairs(tags));
        self
    }

    pub fn with_label(mut self, x: i32, y: i32) -> Self {
        self.label = Some(PointI::new(x, y));
        self
    }
}

#[derive(Debug, Clone)]
pub struct TestBox {
    area: AreaI,
    ocean: Option<bool>,
    objects: Vec<TestMapObject>,
}

impl TestBox {
    pub fn leaf(area: AreaI) -> Self {
        Self {
            area,
            ocean: None,
            objects: Vec::new(),
        }
    }

    pub fn with_object(mut self, object: TestMapObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_ocean(mut self, ocean: bool) -> Self {
        self.ocean = Some(ocean);
        self
    }
}

struct TestLevel {
    min_zoom: ZoomLevel,
    max_zoom: ZoomLevel,
    boxes: Vec<TestBox>,
}

pub struct TestMapSection {
    name: String,
    levels: Vec<TestLevel>,
}

impl TestMapSection {
    /// 节点加入最近声明的层级
    pub fn add_box(&mut self, b: TestBox) -> &mut Self {
        if let Some(level) = self.levels.last_mut() {
            level.boxes.push(b);
        }
        self
    }

    /// 开始一个新层级，之后的 `add_box` 写入该层级
    pub fn add_level(&mut self, min_zoom: ZoomLevel, max_zoom: ZoomLevel) -> &mut Self {
        self.levels.push(TestLevel {
            min_zoom,
            max_zoom,
            boxes: Vec::new(),
        });
        self
    }

    fn write(&self, out: &mut CodedOutput) {
        let mut rules = RuleTable::default();
        let all_objects = self
            .levels
            .iter()
            .flat_map(|l| l.boxes.iter())
            .flat_map(|b| b.objects.iter());
        for object in all_objects {
            for (t, v) in object.types.iter().chain(object.additional.iter()) {
                rules.id(t, v);
            }
            for (tag, _) in &object.captions {
                rules.id(tag, "");
            }
        }

        let section_pos = out.begin_fixed32_message(obf_file::MAP_INDEX);
        out.write_string_field(ms::INDEX_NAME, &self.name);
        for (tag, value) in &rules.rules {
            let mut rule = CodedOutput::new();
            rule.write_string_field(ms::RULE_TAG, tag);
            rule.write_string_field(ms::RULE_VALUE, value);
            out.write_message_field(ms::INDEX_RULES, rule.as_bytes());
        }

        for level in &self.levels {
            write_level(level, &mut rules, out);
        }
        out.end_fixed32_message(section_pos);
    }
}

fn write_level(level: &TestLevel, rules: &mut RuleTable, out: &mut CodedOutput) {
    let area = level
        .boxes
        .iter()
        .map(|b| b.area)
        .reduce(|a, b| a.union(&b))
        .unwrap_or_default();
    let level_pos = out.begin_fixed32_message(ms::INDEX_LEVELS);
    out.write_int32_field(ms::LEVEL_MAX_ZOOM, i32::from(level.max_zoom));
    out.write_int32_field(ms::LEVEL_MIN_ZOOM, i32::from(level.min_zoom));
    out.write_int32_field(ms::LEVEL_LEFT, area.left);
    out.write_int32_field(ms::LEVEL_RIGHT, area.right);
    out.write_int32_field(ms::LEVEL_TOP, area.top);
    out.write_int32_field(ms::LEVEL_BOTTOM, area.bottom);

    // (shift 占位位置, 节点 payload 起点)
    let mut shifts = Vec::new();
    for b in &level.boxes {
        let node_pos = out.begin_fixed32_message(ms::LEVEL_BOXES);
        let payload_start = node_pos + 4;
        out.write_sint32_field(FIELD_LEFT, b.area.left - area.left);
        out.write_sint32_field(FIELD_RIGHT, b.area.right - area.right);
        out.write_sint32_field(FIELD_TOP, b.area.top - area.top);
        out.write_sint32_field(FIELD_BOTTOM, b.area.bottom - area.bottom);
        out.write_tag(FIELD_SHIFT_TO_DATA, wire_type::FIXED32);
        shifts.push((out.position(), payload_start));
        out.write_fixed32_be(0);
        if let Some(ocean) = b.ocean {
            out.write_bool_field(FIELD_OCEAN, ocean);
        }
        out.end_fixed32_message(node_pos);
    }

    for (b, (shift_pos, payload_start)) in level.boxes.iter().zip(shifts) {
        out.write_tag(ms::LEVEL_BLOCKS, wire_type::LENGTH_DELIMITED);
        let block_pos = out.position();
        out.patch_fixed32_be(shift_pos, (block_pos - payload_start) as u32);
        let block = write_map_block(b, rules);
        out.write_length_prefixed(&block);
    }
    out.end_fixed32_message(level_pos);
}

fn write_map_coordinates(ring: &[PointI], node: &AreaI) -> Vec<u8> {
    let mut out = CodedOutput::new();
    let mut px = node.left & MAP_MASK;
    let mut py = node.top & MAP_MASK;
    for p in ring {
        out.write_sint32((p.x - px) >> ms::MAP_COORDINATES_SHIFT);
        out.write_sint32((p.y - py) >> ms::MAP_COORDINATES_SHIFT);
        px = p.x;
        py = p.y;
    }
    out.into_bytes()
}

fn write_map_block(b: &TestBox, rules: &mut RuleTable) -> Vec<u8> {
    let mut block = CodedOutput::new();
    let base_id = b.objects.iter().map(|o| o.id).min().unwrap_or(0);
    block.write_uint64_field(ms::BLOCK_BASE_ID, base_id as u64);
    let mut strings = StringTable::default();
    for object in &b.objects {
        let mut data = CodedOutput::new();
        let field = if object.is_area {
            ms::DATA_AREA_COORDINATES
        } else {
            ms::DATA_COORDINATES
        };
        data.write_bytes_field(field, &write_map_coordinates(&object.points, &b.area));
        for ring in &object.inner {
            data.write_bytes_field(ms::DATA_INNER_POLYGON, &write_map_coordinates(ring, &b.area));
        }
        let types: Vec<u32> = object.types.iter().map(|(t, v)| rules.id(t, v)).collect();
        data.write_packed_varints(ms::DATA_TYPES, &types);
        if !object.additional.is_empty() {
            let additional: Vec<u32> = object
                .additional
                .iter()
                .map(|(t, v)| rules.id(t, v))
                .collect();
            data.write_packed_varints(ms::DATA_ADDITIONAL_TYPES, &additional);
        }
        if let Some(label) = object.label {
            let mut l = CodedOutput::new();
            l.write_sint32((label.x - (b.area.left & MAP_MASK)) >> ms::MAP_COORDINATES_SHIFT);
            l.write_sint32((label.y - (b.area.top & MAP_MASK)) >> ms::MAP_COORDINATES_SHIFT);
            data.write_bytes_field(ms::DATA_LABEL, l.as_bytes());
        }
        if !object.captions.is_empty() {
            let mut refs = Vec::new();
            for (tag, caption) in &object.captions {
                refs.push(rules.id(tag, ""));
                refs.push(match caption {
                    TestCaption::Text(text) => strings.index(text),
                    TestCaption::Raw(index) => *index,
                });
            }
            data.write_packed_varints(ms::DATA_STRING_NAMES, &refs);
        }
        data.write_sint64_field(ms::DATA_ID, object.id - base_id);
        block.write_message_field(ms::BLOCK_DATA_OBJECTS, data.as_bytes());
    }
    strings.write(&mut block, ms::BLOCK_STRING_TABLE);
    block.into_bytes()
}

// ============================================================================
// 路网分区
// ============================================================================

#[derive(Debug, Clone)]
pub struct TestRoute {
    id: i64,
    types: Vec<(String, String)>,
    points: Vec<PointI>,
    names: Vec<(String, String)>,
    point_types: Vec<(usize, String, String)>,
    /// (类型, to id, via id)
    restrictions: Vec<(u32, i64, Option<i64>)>,
}

impl TestRoute {
    pub fn new(id: i64, types: &[(&str, &str)], coords: &[(i32, i32)]) -> Self {
        Self {
            id,
            types: pairs(types),
            points: points(coords),
            names: Vec::new(),
            point_types: Vec::new(),
            restrictions: Vec::new(),
        }
    }

    pub fn with_name(mut self, tag: &str, text: &str) -> Self {
        self.names.push((tag.to_string(), text.to_string()));
        self
    }

    pub fn with_point_type(mut self, point: usize, tag: &str, value: &str) -> Self {
        self.point_types
            .push((point, tag.to_string(), value.to_string()));
        self
    }

    pub fn with_restriction(mut self, kind: u32, to: i64, via: Option<i64>) -> Self {
        self.restrictions.push((kind, to, via));
        self
    }
}

struct TestRouteSection {
    name: String,
    area: AreaI,
    routes: Vec<TestRoute>,
}

impl TestRouteSection {
    fn write(&self, out: &mut CodedOutput) {
        let mut rules = RuleTable::default();
        for route in &self.routes {
            for (t, v) in &route.types {
                rules.id(t, v);
            }
            for (t, _) in &route.names {
                rules.id(t, "");
            }
            for (_, t, v) in &route.point_types {
                rules.id(t, v);
            }
        }

        let section_pos = out.begin_fixed32_message(obf_file::ROUTING_INDEX);
        out.write_string_field(rs::INDEX_NAME, &self.name);
        for (tag, value) in &rules.rules {
            let mut rule = CodedOutput::new();
            rule.write_string_field(rs::RULE_TAG, tag);
            rule.write_string_field(rs::RULE_VALUE, value);
            out.write_message_field(rs::INDEX_RULES, rule.as_bytes());
        }

        let node_pos = out.begin_fixed32_message(rs::INDEX_ROOT_BOXES);
        let payload_start = node_pos + 4;
        out.write_sint32_field(FIELD_LEFT, self.area.left);
        out.write_sint32_field(FIELD_RIGHT, self.area.right);
        out.write_sint32_field(FIELD_TOP, self.area.top);
        out.write_sint32_field(FIELD_BOTTOM, self.area.bottom);
        out.write_tag(FIELD_SHIFT_TO_DATA, wire_type::FIXED32);
        let shift_pos = out.position();
        out.write_fixed32_be(0);
        out.end_fixed32_message(node_pos);

        out.write_tag(rs::INDEX_BLOCKS, wire_type::LENGTH_DELIMITED);
        let block_pos = out.position();
        out.patch_fixed32_be(shift_pos, (block_pos - payload_start) as u32);
        let block = self.write_block(&mut rules);
        out.write_length_prefixed(&block);
        out.end_fixed32_message(section_pos);
    }

    fn write_block(&self, rules: &mut RuleTable) -> Vec<u8> {
        let mut block = CodedOutput::new();
        let ids: Vec<i64> = self.routes.iter().map(|r| r.id).collect();
        let mut id_table = CodedOutput::new();
        let mut prev = 0i64;
        for &id in &ids {
            id_table.write_sint64_field(rs::ID_TABLE_ROUTE_ID, id - prev);
            prev = id;
        }
        block.write_message_field(rs::BLOCK_ID_TABLE, id_table.as_bytes());

        let mut strings = StringTable::default();
        for (index, route) in self.routes.iter().enumerate() {
            let mut data = CodedOutput::new();
            let mut coords = CodedOutput::new();
            let mut px = self.area.left >> rs::ROUTE_COORDINATES_SHIFT;
            let mut py = self.area.top >> rs::ROUTE_COORDINATES_SHIFT;
            for p in &route.points {
                let x = p.x >> rs::ROUTE_COORDINATES_SHIFT;
                let y = p.y >> rs::ROUTE_COORDINATES_SHIFT;
                coords.write_sint32(x - px);
                coords.write_sint32(y - py);
                px = x;
                py = y;
            }
            data.write_bytes_field(rs::DATA_POINTS, coords.as_bytes());

            if !route.point_types.is_empty() {
                let mut pt = CodedOutput::new();
                for (point, tag, value) in &route.point_types {
                    let mut types = CodedOutput::new();
                    types.write_varint32(rules.id(tag, value));
                    pt.write_varint32(*point as u32);
                    pt.write_length_prefixed(types.as_bytes());
                }
                data.write_bytes_field(rs::DATA_POINT_TYPES, pt.as_bytes());
            }
            let types: Vec<u32> = route.types.iter().map(|(t, v)| rules.id(t, v)).collect();
            data.write_packed_varints(rs::DATA_TYPES, &types);
            data.write_uint32_field(rs::DATA_ROUTE_ID, index as u32);
            if !route.names.is_empty() {
                let mut refs = Vec::new();
                for (tag, text) in &route.names {
                    refs.push(rules.id(tag, ""));
                    refs.push(strings.index(text));
                }
                data.write_packed_varints(rs::DATA_STRING_NAMES, &refs);
            }
            block.write_message_field(rs::BLOCK_DATA_OBJECTS, data.as_bytes());
        }

        for (from, route) in self.routes.iter().enumerate() {
            for &(kind, to, via) in &route.restrictions {
                let index_of = |id: i64| ids.iter().position(|&x| x == id).unwrap_or(0) as u32;
                let mut r = CodedOutput::new();
                r.write_uint32_field(rs::RESTRICTION_TYPE, kind);
                r.write_uint32_field(rs::RESTRICTION_FROM, from as u32);
                r.write_uint32_field(rs::RESTRICTION_TO, index_of(to));
                if let Some(via) = via {
                    r.write_uint32_field(rs::RESTRICTION_VIA, index_of(via));
                }
                block.write_message_field(rs::BLOCK_RESTRICTIONS, r.as_bytes());
            }
        }
        strings.write(&mut block, rs::BLOCK_STRING_TABLE);
        block.into_bytes()
    }
}

// ============================================================================
// 文件
// ============================================================================

enum TestSection {
    Map(TestMapSection),
    Route(TestRouteSection),
    Poi(Vec<u8>),
}

#[derive(Default)]
pub struct ObfBuilder {
    sections: Vec<TestSection>,
}

impl ObfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_section(
        &mut self,
        name: &str,
        min_zoom: ZoomLevel,
        max_zoom: ZoomLevel,
    ) -> &mut TestMapSection {
        self.sections.push(TestSection::Map(TestMapSection {
            name: name.to_string(),
            levels: vec![TestLevel {
                min_zoom,
                max_zoom,
                boxes: Vec::new(),
            }],
        }));
        match self.sections.last_mut() {
            Some(TestSection::Map(section)) => section,
            _ => unreachable!(),
        }
    }

    pub fn route_section(&mut self, name: &str, area: AreaI, routes: Vec<TestRoute>) -> &mut Self {
        self.sections.push(TestSection::Route(TestRouteSection {
            name: name.to_string(),
            area,
            routes,
        }));
        self
    }

    /// 不透明的 POI 分区 (读取器只记录偏移)
    pub fn poi_section(&mut self, payload: &[u8]) -> &mut Self {
        self.sections.push(TestSection::Poi(payload.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = CodedOutput::new();
        out.write_uint32_field(obf_file::VERSION, MAP_VERSION);
        out.write_uint64_field(obf_file::DATE_CREATED, 1_700_000_000_000);
        for section in &self.sections {
            match section {
                TestSection::Map(s) => s.write(&mut out),
                TestSection::Route(s) => s.write(&mut out),
                TestSection::Poi(payload) => {
                    let pos = out.begin_fixed32_message(obf_file::POI_INDEX);
                    out.write_bytes_field(1, payload);
                    out.end_fixed32_message(pos);
                }
            }
        }
        out.write_uint32_field(obf_file::VERSION_CONFIRM, MAP_VERSION);
        out.into_bytes()
    }
}

// ============================================================================
// 样式
// ============================================================================

/// 覆盖管线各阶段的最小样式
pub const TEST_STYLE_JSON: &str = r##"{
  "name": "test",
  "parameters": [],
  "attributes": [],
  "order": [
    { "tag": "natural", "value": "water", "outputs": { "order": 10, "objectType": 3 } },
    { "tag": "natural", "value": "coastline", "outputs": { "order": 5, "objectType": 3 } },
    { "tag": "natural", "value": "land", "outputs": { "order": 4, "objectType": 3 } },
    { "tag": "highway", "value": "", "outputs": { "order": 20, "objectType": 2 } },
    { "tag": "amenity", "value": "cafe", "outputs": { "order": 30, "objectType": 1 } },
    { "tag": "place", "value": "city", "outputs": { "order": 40, "objectType": 1 } }
  ],
  "polygon": [
    { "tag": "natural", "value": "water", "outputs": { "color": "#ff0000ff" } },
    { "tag": "natural", "value": "coastline", "outputs": { "color": "#ff1010ff" } },
    { "tag": "natural", "value": "land", "outputs": { "color": "#fff0f0e0" } }
  ],
  "line": [
    { "tag": "highway", "value": "", "outputs": { "color": "#ffffffff", "strokeWidth": 2.0 } }
  ],
  "point": [
    { "tag": "amenity", "value": "cafe", "outputs": { "icon": "cafe" } }
  ],
  "text": [
    { "tag": "", "value": "", "outputs": { "textSize": 12.0, "textColor": "#ff000000" } }
  ]
}"##;

/// 直接在内存中构造地图对象 (不经过编码)
///
/// `captions` 为 (tag, 文本)，例如 ("name", "Main Street")。
pub fn memory_object(
    id: i64,
    types: &[(&str, &str)],
    coords: &[(i32, i32)],
    captions: &[(&str, &str)],
) -> std::sync::Arc<crate::map_object::MapObject> {
    use crate::map_object::{MapEncodingRules, MapObject, MapObjectOrigin, ObfObjectId};

    let mut rules = MapEncodingRules::new();
    let type_ids: Vec<u32> = types.iter().map(|(t, v)| rules.ensure_rule(t, v)).collect();
    let caption_ids: Vec<u32> = captions.iter().map(|(t, _)| rules.ensure_rule(t, "")).collect();
    rules.finalize();
    let points = coords.iter().map(|&(x, y)| PointI::new(x, y)).collect();
    let mut object = MapObject::new(
        ObfObjectId(id),
        MapObjectOrigin::Detailed,
        std::sync::Arc::new(rules),
        points,
        type_ids,
    );
    object.captions = caption_ids
        .into_iter()
        .zip(captions.iter())
        .map(|(rule, (_, text))| (rule, text.to_string()))
        .collect();
    std::sync::Arc::new(object)
}

/// 水面 (id 10) 与道路 (id 20, "Long Road") 位于瓦片 (0, 0)@16 的陆地分区
pub fn sample_primitives_provider(
    config: crate::config::RenderConfig,
) -> crate::primitives_provider::PrimitivesProvider {
    use crate::map_objects_provider::MapObjectsProvider;
    use crate::obf_file::ObfFile;
    use crate::obfs_collection::{ObfDataInterface, ObfsCollection, ReaderSettings};
    use crate::primitives_provider::PrimitivesProvider;
    use crate::primitiviser::Primitiviser;
    use crate::style::Style;
    use std::sync::Arc;

    let mut builder = ObfBuilder::new();
    builder.map_section("test", 14, 20).add_box(
        TestBox::leaf(AreaI::new(0, 0, 1 << 16, 1 << 16))
            .with_ocean(false)
            .with_object(TestMapObject::polygon(
                10,
                &[("natural", "water")],
                &[(1024, 1024), (4096, 1024), (4096, 4096), (1024, 4096), (1024, 1024)],
            ))
            .with_object(
                TestMapObject::line(20, &[("highway", "residential")], &[(16384, 16384), (49152, 16384)])
                    .with_name("name", "Long Road"),
            ),
    );
    let collection = ObfsCollection::new();
    collection.add_file(ObfFile::from_bytes("test.obf", builder.build()).expect("test obf"));
    let objects = MapObjectsProvider::new(ObfDataInterface::new(
        Arc::new(collection),
        ReaderSettings::default(),
    ));
    let style = Style::from_json(TEST_STYLE_JSON).expect("test style");
    let primitiviser = Primitiviser::new(Arc::new(style), config);
    PrimitivesProvider::new(Arc::new(objects), Arc::new(primitiviser))
}
