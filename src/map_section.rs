//! 地图分区 (MapIndex) 读取器
//!
//! ```text
//! MapIndex
//!   2   name
//!   4   rules        (varint 长度) tag=3 value=5 id=7 minZoom=9 type=10
//!   5   levels       (4 字节长度) MapRootLevel
//!
//! MapRootLevel
//!   1 maxZoom  2 minZoom  3 left  4 right  5 top  6 bottom
//!   7   boxes        根节点 (相对层级边界的增量)
//!   15  blocks       MapDataBlock (varint 长度)
//!
//! MapDataBlock
//!   10 baseId   12 dataObjects (MapData)   15 stringTable (s=1)
//!
//! MapData
//!   1 coordinates  2 areaCoordinates  4 polygonInnerCoordinates
//!   6 additionalTypes  7 types  8 labelcoordinates  10 stringNames  12 id
//! ```
//!
//! 设计：
//! - 结构扫描只记录层级边界与偏移；字典与根节点在首次查询时解析并缓存 (OnceLock)
//! - 数据块中坐标相对于所在树节点左上角 (对齐到 32) 累积增量
//! - 字符串表位于数据块末尾，先解码对象再统一解析名称

use crate::area::{AreaI, PointI, ZoomLevel};
use crate::error::ObfResult;
use crate::map_object::{
    MapEncodingRule, MapEncodingRules, MapObject, MapObjectOrigin, ObfObjectId,
};
use crate::obf_codec::{tag_field, CodedInput};
use crate::query::{is_aborted, OceanStats, QueryController, QueryStats};
use crate::spatial_tree::{descend_from_root, read_tree_node, TreeNode, TreeWalk};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// 地图数据坐标的网格位移 (1 << 5)
pub const MAP_COORDINATES_SHIFT: u32 = 5;
const MAP_COORDINATES_MASK: i32 = !((1 << MAP_COORDINATES_SHIFT) - 1);

/// 每解码多少个对象轮询一次取消标志
pub const CANCELLATION_POLL_INTERVAL: u32 = 25;

mod field {
    pub const INDEX_NAME: u32 = 2;
    pub const INDEX_RULES: u32 = 4;
    pub const INDEX_LEVELS: u32 = 5;

    pub const RULE_TAG: u32 = 3;
    pub const RULE_VALUE: u32 = 5;
    pub const RULE_ID: u32 = 7;
    pub const RULE_MIN_ZOOM: u32 = 9;
    pub const RULE_TYPE: u32 = 10;

    pub const LEVEL_MAX_ZOOM: u32 = 1;
    pub const LEVEL_MIN_ZOOM: u32 = 2;
    pub const LEVEL_LEFT: u32 = 3;
    pub const LEVEL_RIGHT: u32 = 4;
    pub const LEVEL_TOP: u32 = 5;
    pub const LEVEL_BOTTOM: u32 = 6;
    pub const LEVEL_BOXES: u32 = 7;
    pub const LEVEL_BLOCKS: u32 = 15;

    pub const BLOCK_BASE_ID: u32 = 10;
    pub const BLOCK_DATA_OBJECTS: u32 = 12;
    pub const BLOCK_STRING_TABLE: u32 = 15;
    pub const STRING_TABLE_S: u32 = 1;

    pub const DATA_COORDINATES: u32 = 1;
    pub const DATA_AREA_COORDINATES: u32 = 2;
    pub const DATA_INNER_POLYGON: u32 = 4;
    pub const DATA_ADDITIONAL_TYPES: u32 = 6;
    pub const DATA_TYPES: u32 = 7;
    pub const DATA_LABEL: u32 = 8;
    pub const DATA_STRING_NAMES: u32 = 10;
    pub const DATA_ID: u32 = 12;
}

pub(crate) use field::*;

/// 缩放层级
#[derive(Debug)]
pub struct MapLevel {
    pub min_zoom: ZoomLevel,
    pub max_zoom: ZoomLevel,
    pub area31: AreaI,
    /// payload 起点
    pub offset: usize,
    pub length: usize,
    root_boxes: OnceLock<Vec<TreeNode>>,
}

impl MapLevel {
    pub fn covers_zoom(&self, zoom: ZoomLevel) -> bool {
        self.min_zoom <= zoom && zoom <= self.max_zoom
    }
}

/// 层级的可持久化描述 (sidecar 索引使用)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLevelInfo {
    pub min_zoom: ZoomLevel,
    pub max_zoom: ZoomLevel,
    pub area31: AreaI,
    pub offset: usize,
    pub length: usize,
}

/// 查询参数
#[derive(Clone, Copy)]
pub struct MapQuery<'q> {
    pub area31: AreaI,
    pub zoom: ZoomLevel,
    pub controller: Option<&'q dyn QueryController>,
}

/// 对象接收端
pub trait MapObjectSink {
    /// 对象解析完成、物化之前调用；返回 false 则跳过
    fn accept(&mut self, _id: ObfObjectId, _bbox31: &AreaI) -> bool {
        true
    }

    fn publish(&mut self, object: Arc<MapObject>);
}

impl MapObjectSink for Vec<Arc<MapObject>> {
    fn publish(&mut self, object: Arc<MapObject>) {
        self.push(object);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SectionSearchResult {
    pub stats: QueryStats,
    pub ocean: OceanStats,
}

pub struct MapSection {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    pub origin: MapObjectOrigin,
    pub levels: Vec<MapLevel>,
    data: Arc<[u8]>,
    encoding: OnceLock<Arc<MapEncodingRules>>,
}

impl std::fmt::Debug for MapSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapSection")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("levels", &self.levels.len())
            .finish()
    }
}

/// 解码中间结果：名称仍是字符串表下标
struct RawMapObject {
    id: i64,
    points31: Vec<PointI>,
    inner_polygons31: Vec<Vec<PointI>>,
    label31: Option<PointI>,
    type_ids: Vec<u32>,
    additional_type_ids: Vec<u32>,
    caption_refs: Vec<(u32, u32)>,
    bbox31: AreaI,
    is_area: bool,
}

impl MapSection {
    /// 结构扫描：调用方已读取 tag，当前位于 4 字节长度前缀处
    pub(crate) fn read_structure(
        data: &Arc<[u8]>,
        input: &mut CodedInput<'_>,
        origin: MapObjectOrigin,
    ) -> ObfResult<MapSection> {
        let (start, length, old_limit) = input.enter_fixed32_message()?;
        let mut section = MapSection {
            name: String::new(),
            offset: start,
            length,
            origin,
            levels: Vec::new(),
            data: data.clone(),
            encoding: OnceLock::new(),
        };
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                INDEX_NAME => section.name = input.read_string()?.to_string(),
                INDEX_LEVELS => section.levels.push(read_level_header(input)?),
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);
        Ok(section)
    }

    /// 从 sidecar 索引恢复，跳过结构扫描
    pub(crate) fn from_stored(
        data: &Arc<[u8]>,
        name: String,
        offset: usize,
        length: usize,
        origin: MapObjectOrigin,
        levels: &[MapLevelInfo],
    ) -> MapSection {
        MapSection {
            name,
            offset,
            length,
            origin,
            levels: levels
                .iter()
                .map(|l| MapLevel {
                    min_zoom: l.min_zoom,
                    max_zoom: l.max_zoom,
                    area31: l.area31,
                    offset: l.offset,
                    length: l.length,
                    root_boxes: OnceLock::new(),
                })
                .collect(),
            data: data.clone(),
            encoding: OnceLock::new(),
        }
    }

    pub fn level_infos(&self) -> Vec<MapLevelInfo> {
        self.levels
            .iter()
            .map(|l| MapLevelInfo {
                min_zoom: l.min_zoom,
                max_zoom: l.max_zoom,
                area31: l.area31,
                offset: l.offset,
                length: l.length,
            })
            .collect()
    }

    pub fn bbox31(&self) -> Option<AreaI> {
        self.levels
            .iter()
            .map(|l| l.area31)
            .reduce(|a, b| a.union(&b))
    }

    /// 覆盖该缩放级别的全部层级 (层级范围可以重叠)
    pub fn levels_for_zoom(&self, zoom: ZoomLevel) -> impl Iterator<Item = &MapLevel> + '_ {
        self.levels.iter().filter(move |l| l.covers_zoom(zoom))
    }

    /// 解码字典 (首次调用时读取并缓存)
    pub fn encoding_rules(&self) -> Arc<MapEncodingRules> {
        self.encoding
            .get_or_init(|| match self.read_encoding_rules() {
                Ok(rules) => Arc::new(rules),
                Err(e) => {
                    tracing::error!(section = %self.name, error = %e, "failed to read encoding rules");
                    let mut rules = MapEncodingRules::new();
                    rules.finalize();
                    Arc::new(rules)
                }
            })
            .clone()
    }

    fn read_encoding_rules(&self) -> ObfResult<MapEncodingRules> {
        let mut input = CodedInput::new(&self.data);
        input.seek(self.offset)?;
        let old_limit = input.push_limit(self.length)?;
        let mut rules = MapEncodingRules::new();
        let mut next_id = 1u32;
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                INDEX_RULES => {
                    let rule = read_encoding_rule(&mut input, next_id)?;
                    next_id = rule.id + 1;
                    rules.add_rule(rule);
                }
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);
        rules.finalize();
        tracing::debug!(section = %self.name, rules = rules.len(), "encoding rules loaded");
        Ok(rules)
    }

    fn root_boxes<'l>(&self, level: &'l MapLevel) -> &'l [TreeNode] {
        level.root_boxes.get_or_init(|| match self.read_root_boxes(level) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::error!(section = %self.name, error = %e, "failed to read root boxes");
                Vec::new()
            }
        })
    }

    fn read_root_boxes(&self, level: &MapLevel) -> ObfResult<Vec<TreeNode>> {
        let mut input = CodedInput::new(&self.data);
        input.seek(level.offset)?;
        let old_limit = input.push_limit(level.length)?;
        let mut walk = TreeWalk::headers_only();
        let mut boxes = Vec::new();
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                LEVEL_BOXES => {
                    if let Some(node) = read_tree_node(&mut input, &level.area31, &mut walk)? {
                        boxes.push(node);
                    }
                }
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);
        Ok(boxes)
    }

    /// 空间查询：遍历相交的子树，按偏移顺序读取数据块
    pub fn load_objects(
        &self,
        query: &MapQuery<'_>,
        sink: &mut dyn MapObjectSink,
    ) -> ObfResult<SectionSearchResult> {
        let levels: Vec<&MapLevel> = self
            .levels_for_zoom(query.zoom)
            .filter(|l| l.area31.intersects(&query.area31))
            .collect();
        if levels.is_empty() {
            return Ok(SectionSearchResult::default());
        }
        let encoding = self.encoding_rules();
        let mut input = CodedInput::new(&self.data);
        let mut walk = TreeWalk::search(query.area31, query.controller);

        for level in levels {
            for root in self.root_boxes(level) {
                if !root.bbox31.intersects(&query.area31) {
                    continue;
                }
                if is_aborted(query.controller) {
                    break;
                }
                if let Err(e) = descend_from_root(&mut input, root, &level.area31, &mut walk) {
                    tracing::warn!(section = %self.name, error = %e, "failed to read map subtree");
                }
            }
        }

        let leaves = walk.take_sorted_leaves();
        let mut result = SectionSearchResult {
            stats: walk.stats,
            ocean: walk.ocean,
        };
        for leaf in &leaves {
            if is_aborted(query.controller) {
                break;
            }
            if let Err(e) =
                self.read_block(&mut input, leaf, query, &encoding, sink, &mut result.stats)
            {
                tracing::warn!(
                    section = %self.name,
                    offset = ?leaf.data_offset,
                    error = %e,
                    "failed to read map data block"
                );
            }
        }
        tracing::trace!(
            section = %self.name,
            subtrees_read = result.stats.subtrees_read,
            subtrees_accepted = result.stats.subtrees_accepted,
            objects_visited = result.stats.objects_visited,
            objects_accepted = result.stats.objects_accepted,
            "map section query finished"
        );
        Ok(result)
    }

    fn read_block(
        &self,
        input: &mut CodedInput<'_>,
        node: &TreeNode,
        query: &MapQuery<'_>,
        encoding: &Arc<MapEncodingRules>,
        sink: &mut dyn MapObjectSink,
        stats: &mut QueryStats,
    ) -> ObfResult<()> {
        let Some(data_offset) = node.data_offset else {
            return Ok(());
        };
        input.seek(data_offset)?;
        let old_limit = input.enter_message()?;
        stats.blocks_read += 1;

        let mut base_id = 0i64;
        let mut raw_objects = Vec::new();
        let mut strings: Vec<String> = Vec::new();
        let mut aborted = false;
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                BLOCK_BASE_ID => base_id = input.read_int64()?,
                BLOCK_DATA_OBJECTS => {
                    stats.objects_visited += 1;
                    if stats.objects_visited % CANCELLATION_POLL_INTERVAL == 0
                        && is_aborted(query.controller)
                    {
                        aborted = true;
                        break;
                    }
                    if let Some(raw) =
                        read_map_data(input, &node.bbox31, &query.area31, encoding, base_id)?
                    {
                        raw_objects.push(raw);
                    }
                }
                BLOCK_STRING_TABLE => strings = read_string_table(input)?,
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);
        if aborted {
            return Ok(());
        }

        for raw in raw_objects {
            let id = ObfObjectId(raw.id);
            stats.objects_accepted += 1;
            if !sink.accept(id, &raw.bbox31) {
                continue;
            }
            let captions = raw
                .caption_refs
                .iter()
                .map(|&(rule_id, index)| {
                    let text = match strings.get(index as usize) {
                        Some(s) => s.clone(),
                        None => {
                            tracing::error!(
                                section = %self.name,
                                object = raw.id,
                                index,
                                table_size = strings.len(),
                                "string table index out of range"
                            );
                            String::new()
                        }
                    };
                    (rule_id, text)
                })
                .collect();
            sink.publish(Arc::new(MapObject {
                id,
                origin: self.origin,
                encoding: encoding.clone(),
                points31: raw.points31,
                inner_polygons31: raw.inner_polygons31,
                label31: raw.label31,
                type_ids: raw.type_ids,
                additional_type_ids: raw.additional_type_ids,
                captions,
                bbox31: raw.bbox31,
                is_area: raw.is_area,
            }));
        }
        Ok(())
    }
}

fn read_level_header(input: &mut CodedInput<'_>) -> ObfResult<MapLevel> {
    let (start, length, old_limit) = input.enter_fixed32_message()?;
    let mut level = MapLevel {
        min_zoom: 0,
        max_zoom: 0,
        area31: AreaI::default(),
        offset: start,
        length,
        root_boxes: OnceLock::new(),
    };
    loop {
        let tag = input.read_tag()?;
        match tag_field(tag) {
            0 => break,
            LEVEL_MAX_ZOOM => level.max_zoom = input.read_int32()?.clamp(0, 31) as ZoomLevel,
            LEVEL_MIN_ZOOM => level.min_zoom = input.read_int32()?.clamp(0, 31) as ZoomLevel,
            LEVEL_LEFT => level.area31.left = input.read_int32()?,
            LEVEL_RIGHT => level.area31.right = input.read_int32()?,
            LEVEL_TOP => level.area31.top = input.read_int32()?,
            LEVEL_BOTTOM => level.area31.bottom = input.read_int32()?,
            // 头部之后是根节点与数据块，结构扫描不需要
            LEVEL_BOXES | LEVEL_BLOCKS => {
                input.seek(start + length)?;
                break;
            }
            _ => input.skip_field(tag)?,
        }
    }
    input.pop_limit(old_limit);
    Ok(level)
}

fn read_encoding_rule(input: &mut CodedInput<'_>, default_id: u32) -> ObfResult<MapEncodingRule> {
    let old_limit = input.enter_message()?;
    let mut rule = MapEncodingRule {
        id: default_id,
        tag: String::new(),
        value: String::new(),
        min_zoom: 0,
        rule_type: 0,
    };
    loop {
        let tag = input.read_tag()?;
        match tag_field(tag) {
            0 => break,
            RULE_TAG => rule.tag = input.read_string()?.to_string(),
            RULE_VALUE => rule.value = input.read_string()?.to_string(),
            RULE_ID => rule.id = input.read_varint32()?,
            RULE_MIN_ZOOM => rule.min_zoom = input.read_varint32()?,
            RULE_TYPE => rule.rule_type = input.read_varint32()?,
            _ => input.skip_field(tag)?,
        }
    }
    input.pop_limit(old_limit);
    Ok(rule)
}

pub(crate) fn read_string_table(input: &mut CodedInput<'_>) -> ObfResult<Vec<String>> {
    let old_limit = input.enter_message()?;
    let mut strings = Vec::new();
    loop {
        let tag = input.read_tag()?;
        match tag_field(tag) {
            0 => break,
            STRING_TABLE_S => strings.push(input.read_string()?.to_string()),
            _ => input.skip_field(tag)?,
        }
    }
    input.pop_limit(old_limit);
    Ok(strings)
}

/// 解码坐标串：相对节点左上角 (对齐到 32) 的累积增量
fn read_coordinates(input: &mut CodedInput<'_>, node_bbox: &AreaI) -> ObfResult<Vec<PointI>> {
    let old_limit = input.enter_message()?;
    let mut px = node_bbox.left & MAP_COORDINATES_MASK;
    let mut py = node_bbox.top & MAP_COORDINATES_MASK;
    let mut points = Vec::with_capacity(input.bytes_until_limit() / 2);
    while !input.at_end() {
        let x = (input.read_sint32()? << MAP_COORDINATES_SHIFT).wrapping_add(px);
        let y = (input.read_sint32()? << MAP_COORDINATES_SHIFT).wrapping_add(py);
        points.push(PointI::new(x, y));
        px = x;
        py = y;
    }
    input.pop_limit(old_limit);
    Ok(points)
}

fn read_type_ids(
    input: &mut CodedInput<'_>,
    encoding: &MapEncodingRules,
) -> ObfResult<Vec<u32>> {
    let ids = input.read_packed_varints()?;
    Ok(ids
        .into_iter()
        .filter(|&id| {
            let known = encoding.rule(id).is_some();
            if !known {
                tracing::error!(rule = id, "unknown encoding rule id");
            }
            known
        })
        .collect())
}

/// 有顶点落在查询框内，或对象外包框覆盖整个查询框
fn touches_query(points: &[PointI], bbox: &AreaI, query_area: &AreaI) -> bool {
    points.iter().any(|p| query_area.contains_point(p)) || bbox.contains(query_area)
}

fn read_map_data(
    input: &mut CodedInput<'_>,
    node_bbox: &AreaI,
    query_area: &AreaI,
    encoding: &MapEncodingRules,
    base_id: i64,
) -> ObfResult<Option<RawMapObject>> {
    let old_limit = input.enter_message()?;
    let end = input.limit();
    let mut object = RawMapObject {
        id: base_id,
        points31: Vec::new(),
        inner_polygons31: Vec::new(),
        label31: None,
        type_ids: Vec::new(),
        additional_type_ids: Vec::new(),
        caption_refs: Vec::new(),
        bbox31: AreaI::default(),
        is_area: false,
    };
    let mut rejected = false;
    loop {
        let tag = input.read_tag()?;
        match tag_field(tag) {
            0 => break,
            DATA_COORDINATES | DATA_AREA_COORDINATES => {
                object.is_area = tag_field(tag) == DATA_AREA_COORDINATES;
                object.points31 = read_coordinates(input, node_bbox)?;
                match AreaI::from_points(&object.points31) {
                    Some(bbox) if touches_query(&object.points31, &bbox, query_area) => {
                        object.bbox31 = bbox
                    }
                    _ => {
                        rejected = true;
                        input.seek(end)?;
                        break;
                    }
                }
            }
            DATA_INNER_POLYGON => {
                let ring = read_coordinates(input, node_bbox)?;
                object.inner_polygons31.push(ring);
            }
            DATA_ADDITIONAL_TYPES => {
                object.additional_type_ids = read_type_ids(input, encoding)?;
            }
            DATA_TYPES => object.type_ids = read_type_ids(input, encoding)?,
            DATA_LABEL => {
                let old = input.enter_message()?;
                let dx = input.read_sint32()?;
                let dy = input.read_sint32()?;
                input.pop_limit(old);
                object.label31 = Some(PointI::new(
                    (dx << MAP_COORDINATES_SHIFT).wrapping_add(node_bbox.left & MAP_COORDINATES_MASK),
                    (dy << MAP_COORDINATES_SHIFT).wrapping_add(node_bbox.top & MAP_COORDINATES_MASK),
                ));
            }
            DATA_STRING_NAMES => {
                let pairs = input.read_packed_varints()?;
                for pair in pairs.chunks_exact(2) {
                    if encoding.rule(pair[0]).is_some() {
                        object.caption_refs.push((pair[0], pair[1]));
                    } else {
                        tracing::error!(rule = pair[0], "unknown caption rule id");
                    }
                }
            }
            DATA_ID => object.id = base_id.wrapping_add(input.read_sint64()?),
            _ => input.skip_field(tag)?,
        }
    }
    input.pop_limit(old_limit);
    if rejected || object.points31.is_empty() {
        return Ok(None);
    }
    Ok(Some(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obf_file::ObfFile;
    use crate::test_support::{ObfBuilder, TestBox, TestMapObject};

    fn sample_file() -> ObfFile {
        let mut builder = ObfBuilder::new();
        let section = builder.map_section("sample", 0, 20);
        section.add_box(
            TestBox::leaf(AreaI::new(0, 0, 4096, 4096))
                .with_object(
                    TestMapObject::polygon(
                        10,
                        &[("natural", "water")],
                        &[(64, 64), (512, 64), (512, 512), (64, 512), (64, 64)],
                    )
                    .with_name("name", "Lake")
                    .with_inner(&[(128, 128), (256, 128), (256, 256), (128, 128)]),
                )
                .with_object(TestMapObject::line(
                    11,
                    &[("highway", "residential")],
                    &[(1024, 1024), (2048, 1024)],
                )),
        );
        section.add_box(
            TestBox::leaf(AreaI::new(1 << 20, 1 << 20, (1 << 20) + 4096, (1 << 20) + 4096))
                .with_object(TestMapObject::point(12, &[("amenity", "cafe")], (1 << 20) + 64, (1 << 20) + 64)),
        );
        ObfFile::from_bytes("sample.obf", builder.build()).unwrap()
    }

    #[test]
    fn test_reads_objects_in_query() {
        let file = sample_file();
        let section = &file.map_sections[0];
        let mut objects: Vec<Arc<MapObject>> = Vec::new();
        let query = MapQuery {
            area31: AreaI::new(0, 0, 10_000, 10_000),
            zoom: 15,
            controller: None,
        };
        let result = section.load_objects(&query, &mut objects).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(result.stats.blocks_read, 1);

        let lake = objects.iter().find(|o| o.id == ObfObjectId(10)).unwrap();
        assert!(lake.is_area);
        assert_eq!(lake.points31[1], PointI::new(512, 64));
        assert_eq!(lake.inner_polygons31.len(), 1);
        assert_eq!(lake.caption("name"), Some("Lake"));
        assert!(lake.contains_type("natural", "water"));

        let road = objects.iter().find(|o| o.id == ObfObjectId(11)).unwrap();
        assert!(!road.is_area);
        assert_eq!(road.bbox31, AreaI::new(1024, 1024, 2048, 1024));
    }

    #[test]
    fn test_object_outside_query_rejected() {
        let file = sample_file();
        let section = &file.map_sections[0];
        let mut objects: Vec<Arc<MapObject>> = Vec::new();
        let query = MapQuery {
            area31: AreaI::new(900, 900, 3000, 3000),
            zoom: 15,
            controller: None,
        };
        let result = section.load_objects(&query, &mut objects).unwrap();
        // 湖泊在同一数据块中但包围盒不相交
        assert_eq!(result.stats.objects_visited, 2);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, ObfObjectId(11));
    }

    #[test]
    fn test_level_zoom_range() {
        let file = sample_file();
        let section = &file.map_sections[0];
        let mut objects: Vec<Arc<MapObject>> = Vec::new();
        let query = MapQuery {
            area31: AreaI::new(0, 0, 10_000, 10_000),
            zoom: 21,
            controller: None,
        };
        let result = section.load_objects(&query, &mut objects).unwrap();
        assert!(objects.is_empty());
        assert_eq!(result.stats.subtrees_read, 0);
    }

    #[test]
    fn test_overlapping_levels_all_queried() {
        let mut builder = ObfBuilder::new();
        builder
            .map_section("levels", 10, 16)
            .add_box(TestBox::leaf(AreaI::new(0, 0, 4096, 4096)).with_object(
                TestMapObject::point(1, &[("place", "town")], 64, 64),
            ))
            .add_level(14, 20)
            .add_box(TestBox::leaf(AreaI::new(0, 0, 4096, 4096)).with_object(
                TestMapObject::point(2, &[("amenity", "cafe")], 128, 128),
            ));
        let file = ObfFile::from_bytes("levels.obf", builder.build()).unwrap();
        let section = &file.map_sections[0];
        assert_eq!(section.levels.len(), 2);

        let ids_at = |zoom: ZoomLevel| {
            let mut objects: Vec<Arc<MapObject>> = Vec::new();
            let query = MapQuery {
                area31: AreaI::new(0, 0, 4096, 4096),
                zoom,
                controller: None,
            };
            section.load_objects(&query, &mut objects).unwrap();
            let mut ids: Vec<i64> = objects.iter().map(|o| o.id.0).collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(ids_at(12), vec![1]);
        assert_eq!(ids_at(15), vec![1, 2]);
        assert_eq!(ids_at(18), vec![2]);
    }

    #[test]
    fn test_covering_polygon_without_inner_vertices_accepted() {
        let mut builder = ObfBuilder::new();
        builder.map_section("cover", 0, 20).add_box(
            TestBox::leaf(AreaI::new(0, 0, 8192, 8192))
                .with_object(TestMapObject::polygon(
                    1,
                    &[("natural", "wood")],
                    &[(0, 0), (8192, 0), (8192, 8192), (0, 8192), (0, 0)],
                ))
                // 外包框与查询框相交，但既无顶点在内也不覆盖查询框
                .with_object(TestMapObject::line(
                    2,
                    &[("highway", "path")],
                    &[(1024, 2976), (2976, 1024)],
                )),
        );
        let file = ObfFile::from_bytes("cover.obf", builder.build()).unwrap();
        let mut objects: Vec<Arc<MapObject>> = Vec::new();
        let query = MapQuery {
            area31: AreaI::new(2048, 2048, 4096, 4096),
            zoom: 15,
            controller: None,
        };
        file.map_sections[0].load_objects(&query, &mut objects).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, ObfObjectId(1));
    }

    #[test]
    fn test_out_of_range_string_index_becomes_empty() {
        let mut builder = ObfBuilder::new();
        let section = builder.map_section("broken", 0, 20);
        section.add_box(TestBox::leaf(AreaI::new(0, 0, 4096, 4096)).with_object(
            TestMapObject::point(5, &[("amenity", "cafe")], 64, 64).with_raw_caption("name", 99),
        ));
        let file = ObfFile::from_bytes("broken.obf", builder.build()).unwrap();
        let mut objects: Vec<Arc<MapObject>> = Vec::new();
        let query = MapQuery {
            area31: AreaI::new(0, 0, 4096, 4096),
            zoom: 10,
            controller: None,
        };
        file.map_sections[0].load_objects(&query, &mut objects).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].caption("name"), Some(""));
    }

    #[test]
    fn test_pruning_skips_block_reads() {
        let file = sample_file();
        let section = &file.map_sections[0];
        let mut objects: Vec<Arc<MapObject>> = Vec::new();
        let query = MapQuery {
            area31: AreaI::new(1 << 20, 1 << 20, (1 << 20) + 100, (1 << 20) + 100),
            zoom: 12,
            controller: None,
        };
        let result = section.load_objects(&query, &mut objects).unwrap();
        assert_eq!(result.stats.blocks_read, 1);
        assert_eq!(result.stats.subtrees_read, 1);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, ObfObjectId(12));
    }
}
