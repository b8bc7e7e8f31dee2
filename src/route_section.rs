//! 路网分区 (OsmAndRoutingIndex) 读取器
//!
//! ```text
//! OsmAndRoutingIndex
//!   1 name   2 rules (tag=3 value=5 id=7)   3 rootBoxes   4 basemapBoxes   5 blocks
//!
//! RouteDataBlock
//!   5 idTable (routeId=1，sint64 累积)   6 dataObjects   7 restrictions   8 stringTable
//!
//! RouteData
//!   1 points (sint32 对，相对节点左上角 >> 4)   4 pointTypes   5 pointNames
//!   7 types   12 routeId (idTable 下标)   14 stringNames
//! ```
//!
//! 根节点的增量相对零基准；点坐标以 1 << 4 为网格。

use crate::area::{AreaI, PointI};
use crate::error::ObfResult;
use crate::map_section::read_string_table;
use crate::obf_codec::{tag_field, CodedInput};
use crate::query::{is_aborted, QueryController, QueryStats};
use crate::route_object::{
    PointName, Restriction, RestrictionKind, RouteDataObject, RouteEncodingRules, RouteRulesRef,
    RouteTypeRule,
};
use crate::spatial_tree::{descend_from_root, read_tree_node, TreeNode, TreeWalk};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

pub const ROUTE_COORDINATES_SHIFT: u32 = 4;

mod field {
    pub const INDEX_NAME: u32 = 1;
    pub const INDEX_RULES: u32 = 2;
    pub const INDEX_ROOT_BOXES: u32 = 3;
    pub const INDEX_BASEMAP_BOXES: u32 = 4;
    pub const INDEX_BLOCKS: u32 = 5;

    pub const RULE_TAG: u32 = 3;
    pub const RULE_VALUE: u32 = 5;
    pub const RULE_ID: u32 = 7;

    pub const BLOCK_ID_TABLE: u32 = 5;
    pub const BLOCK_DATA_OBJECTS: u32 = 6;
    pub const BLOCK_RESTRICTIONS: u32 = 7;
    pub const BLOCK_STRING_TABLE: u32 = 8;

    pub const ID_TABLE_ROUTE_ID: u32 = 1;

    pub const RESTRICTION_TYPE: u32 = 1;
    pub const RESTRICTION_FROM: u32 = 2;
    pub const RESTRICTION_TO: u32 = 3;
    pub const RESTRICTION_VIA: u32 = 4;

    pub const DATA_POINTS: u32 = 1;
    pub const DATA_POINT_TYPES: u32 = 4;
    pub const DATA_POINT_NAMES: u32 = 5;
    pub const DATA_TYPES: u32 = 7;
    pub const DATA_ROUTE_ID: u32 = 12;
    pub const DATA_STRING_NAMES: u32 = 14;
}

pub(crate) use field::*;

/// 根节点集合：详细层或基础层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTreeKind {
    Detailed,
    Basemap,
}

pub struct RouteSection {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    data: Arc<[u8]>,
    rules: OnceLock<Arc<RouteEncodingRules>>,
    root_boxes: OnceLock<Vec<TreeNode>>,
    basemap_boxes: OnceLock<Vec<TreeNode>>,
}

impl std::fmt::Debug for RouteSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSection")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

#[derive(Default)]
struct RawRestriction {
    kind: u32,
    from: u32,
    to: u32,
    via: Option<u32>,
}

struct RawRoute {
    route_index: u32,
    points31: Vec<PointI>,
    types: Vec<u32>,
    point_types: Vec<Vec<u32>>,
    point_name_refs: Vec<(usize, u32, u32)>,
    name_refs: Vec<(u32, u32)>,
}

impl RouteSection {
    /// 结构扫描：只读取名称，其余内容按需解析
    pub(crate) fn read_structure(
        data: &Arc<[u8]>,
        input: &mut CodedInput<'_>,
    ) -> ObfResult<RouteSection> {
        let (start, length, old_limit) = input.enter_fixed32_message()?;
        let mut name = String::new();
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                INDEX_NAME => name = input.read_string()?.to_string(),
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);
        Ok(Self::from_stored(data, name, start, length))
    }

    pub(crate) fn from_stored(
        data: &Arc<[u8]>,
        name: String,
        offset: usize,
        length: usize,
    ) -> RouteSection {
        RouteSection {
            name,
            offset,
            length,
            data: data.clone(),
            rules: OnceLock::new(),
            root_boxes: OnceLock::new(),
            basemap_boxes: OnceLock::new(),
        }
    }

    pub fn encoding_rules(&self) -> Arc<RouteEncodingRules> {
        self.rules
            .get_or_init(|| match self.read_rules() {
                Ok(rules) => Arc::new(rules),
                Err(e) => {
                    tracing::error!(section = %self.name, error = %e, "failed to read route rules");
                    Arc::new(RouteEncodingRules::new())
                }
            })
            .clone()
    }

    fn read_rules(&self) -> ObfResult<RouteEncodingRules> {
        let mut input = CodedInput::new(&self.data);
        input.seek(self.offset)?;
        let old_limit = input.push_limit(self.length)?;
        let mut rules = RouteEncodingRules::new();
        let mut next_id = 1u32;
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                INDEX_RULES => {
                    let old = input.enter_message()?;
                    let mut rule = RouteTypeRule {
                        id: next_id,
                        tag: String::new(),
                        value: String::new(),
                    };
                    loop {
                        let t = input.read_tag()?;
                        match tag_field(t) {
                            0 => break,
                            RULE_TAG => rule.tag = input.read_string()?.to_string(),
                            RULE_VALUE => rule.value = input.read_string()?.to_string(),
                            RULE_ID => rule.id = input.read_varint32()?,
                            _ => input.skip_field(t)?,
                        }
                    }
                    input.pop_limit(old);
                    next_id = rule.id + 1;
                    rules.add_rule(rule);
                }
                // 数据块区域在规则之后，读到即可停止
                INDEX_BLOCKS => break,
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);
        tracing::debug!(section = %self.name, rules = rules.len(), "route rules loaded");
        Ok(rules)
    }

    fn boxes(&self, kind: RouteTreeKind) -> &[TreeNode] {
        let (cell, field) = match kind {
            RouteTreeKind::Detailed => (&self.root_boxes, INDEX_ROOT_BOXES),
            RouteTreeKind::Basemap => (&self.basemap_boxes, INDEX_BASEMAP_BOXES),
        };
        cell.get_or_init(|| match self.read_root_boxes(field) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::error!(section = %self.name, error = %e, "failed to read route root boxes");
                Vec::new()
            }
        })
    }

    fn read_root_boxes(&self, wanted: u32) -> ObfResult<Vec<TreeNode>> {
        let mut input = CodedInput::new(&self.data);
        input.seek(self.offset)?;
        let old_limit = input.push_limit(self.length)?;
        let mut walk = TreeWalk::headers_only();
        let mut boxes = Vec::new();
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                f if f == wanted => {
                    if let Some(node) = read_tree_node(&mut input, &AreaI::default(), &mut walk)? {
                        boxes.push(node);
                    }
                }
                INDEX_BLOCKS => break,
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);
        Ok(boxes)
    }

    pub fn bbox31(&self) -> Option<AreaI> {
        self.boxes(RouteTreeKind::Detailed)
            .iter()
            .map(|n| n.bbox31)
            .reduce(|a, b| a.union(&b))
    }

    /// 读取与查询框相交的路网边
    pub fn load_route_objects(
        &self,
        area31: &AreaI,
        kind: RouteTreeKind,
        controller: Option<&dyn QueryController>,
    ) -> ObfResult<(Vec<RouteDataObject>, QueryStats)> {
        let rules = self.encoding_rules();
        let mut input = CodedInput::new(&self.data);
        let mut walk = TreeWalk::search(*area31, controller);
        for root in self.boxes(kind) {
            if !root.bbox31.intersects(area31) {
                continue;
            }
            if let Err(e) = descend_from_root(&mut input, root, &AreaI::default(), &mut walk) {
                tracing::warn!(section = %self.name, error = %e, "failed to read route subtree");
            }
        }
        let leaves = walk.take_sorted_leaves();
        let mut stats = walk.stats;
        let mut objects = Vec::new();
        for leaf in &leaves {
            if is_aborted(controller) {
                break;
            }
            match self.read_block(&mut input, leaf, area31, &rules, &mut stats) {
                Ok(mut block) => objects.append(&mut block),
                Err(e) => tracing::warn!(
                    section = %self.name,
                    offset = ?leaf.data_offset,
                    error = %e,
                    "failed to read route data block"
                ),
            }
        }
        Ok((objects, stats))
    }

    fn read_block(
        &self,
        input: &mut CodedInput<'_>,
        node: &TreeNode,
        area31: &AreaI,
        rules: &Arc<RouteEncodingRules>,
        stats: &mut QueryStats,
    ) -> ObfResult<Vec<RouteDataObject>> {
        let Some(data_offset) = node.data_offset else {
            return Ok(Vec::new());
        };
        input.seek(data_offset)?;
        let old_limit = input.enter_message()?;
        stats.blocks_read += 1;

        let mut id_table: Vec<i64> = Vec::new();
        let mut raws: Vec<RawRoute> = Vec::new();
        let mut restrictions: Vec<RawRestriction> = Vec::new();
        let mut strings: Vec<String> = Vec::new();
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                BLOCK_ID_TABLE => {
                    let old = input.enter_message()?;
                    let mut id = 0i64;
                    loop {
                        let t = input.read_tag()?;
                        match tag_field(t) {
                            0 => break,
                            ID_TABLE_ROUTE_ID => {
                                id = id.wrapping_add(input.read_sint64()?);
                                id_table.push(id);
                            }
                            _ => input.skip_field(t)?,
                        }
                    }
                    input.pop_limit(old);
                }
                BLOCK_DATA_OBJECTS => {
                    stats.objects_visited += 1;
                    raws.push(read_route_data(input, &node.bbox31)?);
                }
                BLOCK_RESTRICTIONS => restrictions.push(read_restriction(input)?),
                BLOCK_STRING_TABLE => strings = read_string_table(input)?,
                _ => input.skip_field(tag)?,
            }
        }
        input.pop_limit(old_limit);

        let resolve_id = |index: u32| -> Option<i64> {
            let id = id_table.get(index as usize).copied();
            if id.is_none() {
                tracing::error!(section = %self.name, index, "route id table index out of range");
            }
            id
        };
        let resolve_string = |index: u32| -> String {
            strings.get(index as usize).cloned().unwrap_or_else(|| {
                tracing::error!(section = %self.name, index, "string table index out of range");
                String::new()
            })
        };

        let mut restrictions_by_from: HashMap<u32, Vec<Restriction>> = HashMap::new();
        for r in &restrictions {
            let Some(to) = resolve_id(r.to) else { continue };
            let via = match r.via {
                Some(v) => match resolve_id(v) {
                    Some(id) => Some(id),
                    None => continue,
                },
                None => None,
            };
            restrictions_by_from.entry(r.from).or_default().push(Restriction {
                to,
                via,
                kind: RestrictionKind::from_code(r.kind),
            });
        }

        let mut objects = Vec::with_capacity(raws.len());
        for raw in raws {
            let Some(bbox) = AreaI::from_points(&raw.points31) else {
                continue;
            };
            if !bbox.intersects(area31) {
                continue;
            }
            let Some(id) = resolve_id(raw.route_index) else {
                continue;
            };
            stats.objects_accepted += 1;
            objects.push(RouteDataObject {
                id,
                rules: RouteRulesRef::Section(rules.clone()),
                points31: raw.points31,
                types: raw.types,
                point_types: raw.point_types,
                point_names: raw
                    .point_name_refs
                    .iter()
                    .map(|&(point_index, rule_id, s)| PointName {
                        point_index,
                        rule_id,
                        text: resolve_string(s),
                    })
                    .collect(),
                names: raw
                    .name_refs
                    .iter()
                    .map(|&(rule_id, s)| (rule_id, resolve_string(s)))
                    .collect(),
                restrictions: restrictions_by_from
                    .remove(&raw.route_index)
                    .unwrap_or_default(),
            });
        }
        Ok(objects)
    }
}

fn read_restriction(input: &mut CodedInput<'_>) -> ObfResult<RawRestriction> {
    let old = input.enter_message()?;
    let mut r = RawRestriction::default();
    loop {
        let tag = input.read_tag()?;
        match tag_field(tag) {
            0 => break,
            RESTRICTION_TYPE => r.kind = input.read_varint32()?,
            RESTRICTION_FROM => r.from = input.read_varint32()?,
            RESTRICTION_TO => r.to = input.read_varint32()?,
            RESTRICTION_VIA => r.via = Some(input.read_varint32()?),
            _ => input.skip_field(tag)?,
        }
    }
    input.pop_limit(old);
    Ok(r)
}

fn read_route_data(input: &mut CodedInput<'_>, node_bbox: &AreaI) -> ObfResult<RawRoute> {
    let old_limit = input.enter_message()?;
    let mut raw = RawRoute {
        route_index: 0,
        points31: Vec::new(),
        types: Vec::new(),
        point_types: Vec::new(),
        point_name_refs: Vec::new(),
        name_refs: Vec::new(),
    };
    loop {
        let tag = input.read_tag()?;
        match tag_field(tag) {
            0 => break,
            DATA_POINTS => {
                let old = input.enter_message()?;
                let mut px = node_bbox.left >> ROUTE_COORDINATES_SHIFT;
                let mut py = node_bbox.top >> ROUTE_COORDINATES_SHIFT;
                while !input.at_end() {
                    let x = input.read_sint32()?.wrapping_add(px);
                    let y = input.read_sint32()?.wrapping_add(py);
                    raw.points31.push(PointI::new(
                        x << ROUTE_COORDINATES_SHIFT,
                        y << ROUTE_COORDINATES_SHIFT,
                    ));
                    px = x;
                    py = y;
                }
                input.pop_limit(old);
            }
            DATA_POINT_TYPES => {
                let old = input.enter_message()?;
                while !input.at_end() {
                    let point = input.read_varint32()? as usize;
                    let len = input.read_varint32()? as usize;
                    let inner = input.push_limit(len)?;
                    let mut types = Vec::new();
                    while !input.at_end() {
                        types.push(input.read_varint32()?);
                    }
                    input.pop_limit(inner);
                    if raw.point_types.len() <= point {
                        raw.point_types.resize(point + 1, Vec::new());
                    }
                    raw.point_types[point] = types;
                }
                input.pop_limit(old);
            }
            DATA_POINT_NAMES => {
                let values = input.read_packed_varints()?;
                for triple in values.chunks_exact(3) {
                    raw.point_name_refs
                        .push((triple[0] as usize, triple[1], triple[2]));
                }
            }
            DATA_TYPES => raw.types = input.read_packed_varints()?,
            DATA_ROUTE_ID => raw.route_index = input.read_varint32()?,
            DATA_STRING_NAMES => {
                let values = input.read_packed_varints()?;
                raw.name_refs = values
                    .chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect();
            }
            _ => input.skip_field(tag)?,
        }
    }
    input.pop_limit(old_limit);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obf_file::ObfFile;
    use crate::test_support::{ObfBuilder, TestRoute};

    fn sample_file() -> ObfFile {
        let mut builder = ObfBuilder::new();
        builder.route_section(
            "roads",
            AreaI::new(0, 0, 1 << 16, 1 << 16),
            vec![
                TestRoute::new(1001, &[("highway", "primary"), ("oneway", "yes")], &[(0, 0), (4096, 0), (8192, 512)])
                    .with_name("name", "Main St")
                    .with_restriction(3, 1002, None),
                TestRoute::new(1002, &[("highway", "residential")], &[(8192, 512), (8192, 8192)])
                    .with_point_type(1, "osmand_ele_asc", "4"),
            ],
        );
        ObfFile::from_bytes("roads.road.obf", builder.build()).unwrap()
    }

    #[test]
    fn test_reads_routes_with_restrictions() {
        let file = sample_file();
        let section = &file.route_sections[0];
        assert_eq!(section.name, "roads");
        let (routes, stats) = section
            .load_route_objects(&AreaI::new(0, 0, 1 << 16, 1 << 16), RouteTreeKind::Detailed, None)
            .unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(stats.blocks_read, 1);

        let main = routes.iter().find(|r| r.id == 1001).unwrap();
        assert_eq!(main.points31[1], PointI::new(4096, 0));
        assert_eq!(main.name(), Some("Main St"));
        assert_eq!(main.oneway(), 1);
        assert_eq!(
            main.restrictions,
            vec![Restriction {
                to: 1002,
                via: None,
                kind: RestrictionKind::NoUTurn
            }]
        );

        let side = routes.iter().find(|r| r.id == 1002).unwrap();
        assert_eq!(side.point_types.len(), 2);
        assert!(side.restrictions.is_empty());
    }

    #[test]
    fn test_route_query_outside_returns_nothing() {
        let file = sample_file();
        let (routes, stats) = file.route_sections[0]
            .load_route_objects(
                &AreaI::new(1 << 20, 1 << 20, (1 << 20) + 10, (1 << 20) + 10),
                RouteTreeKind::Detailed,
                None,
            )
            .unwrap();
        assert!(routes.is_empty());
        assert_eq!(stats.blocks_read, 0);
    }

    #[test]
    fn test_basemap_boxes_are_separate() {
        let file = sample_file();
        let (routes, _) = file.route_sections[0]
            .load_route_objects(&AreaI::new(0, 0, 1 << 16, 1 << 16), RouteTreeKind::Basemap, None)
            .unwrap();
        assert!(routes.is_empty());
    }
}
