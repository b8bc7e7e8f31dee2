//! 地图对象与解码规则字典
//!
//! - `MapEncodingRules`: 分区级 tag/value 字典，按小整数 id 索引 (0 保留)
//! - `MapObject`: 解码后的地理实体 (外环、内环、类型、名称、包围盒)
//!
//! 对象只读、以 `Arc` 共享：跨瓦片边界的对象由共享缓存按 id 引用计数。

use crate::area::{AreaI, PointI};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// 对象标识，在所属分区内唯一
///
/// id > 0 的对象可以跨结果集按 id 去重；id <= 0 为合成对象 (如海岸线填充)，永不去重。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObfObjectId(pub i64);

impl ObfObjectId {
    /// 合成对象 id (非正数)
    pub const fn synthetic(index: i64) -> Self {
        Self(-index.abs())
    }

    #[inline]
    pub const fn is_deduplicatable(&self) -> bool {
        self.0 > 0
    }
}

// ============================================================================
// 解码规则
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEncodingRule {
    pub id: u32,
    pub tag: String,
    pub value: String,
    pub min_zoom: u32,
    pub rule_type: u32,
}

/// 分区的 tag/value 字典
#[derive(Debug, Clone, Default)]
pub struct MapEncodingRules {
    rules: Vec<Option<MapEncodingRule>>,
    lookup: HashMap<(String, String), u32>,
    pub name_rule: Option<u32>,
    pub ref_rule: Option<u32>,
    /// name:xx 规则 id -> 语言代码
    pub localized_name_rules: HashMap<u32, String>,
    pub natural_coastline: u32,
    pub natural_land: u32,
    pub natural_coastline_broken: u32,
    pub natural_coastline_line: u32,
    pub highway_rules: Vec<u32>,
    pub oneway: Option<u32>,
    pub oneway_reverse: Option<u32>,
    pub tunnel: Option<u32>,
    pub bridge: Option<u32>,
    /// layer=N 规则 id -> N
    pub layer_rules: HashMap<u32, i32>,
}

impl MapEncodingRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// 仅包含合成对象所需规则的字典
    pub fn synthetic() -> Arc<MapEncodingRules> {
        static SYNTHETIC: OnceLock<Arc<MapEncodingRules>> = OnceLock::new();
        SYNTHETIC
            .get_or_init(|| {
                let mut rules = MapEncodingRules::new();
                rules.finalize();
                Arc::new(rules)
            })
            .clone()
    }

    pub fn add_rule(&mut self, rule: MapEncodingRule) {
        let id = rule.id as usize;
        if self.rules.len() <= id {
            self.rules.resize(id + 1, None);
        }
        self.lookup
            .insert((rule.tag.clone(), rule.value.clone()), rule.id);
        self.rules[id] = Some(rule);
    }

    fn next_id(&self) -> u32 {
        self.rules.len().max(1) as u32
    }

    /// 查找或追加规则
    pub fn ensure_rule(&mut self, tag: &str, value: &str) -> u32 {
        if let Some(&id) = self.lookup.get(&(tag.to_string(), value.to_string())) {
            return id;
        }
        let id = self.next_id();
        self.add_rule(MapEncodingRule {
            id,
            tag: tag.to_string(),
            value: value.to_string(),
            min_zoom: 0,
            rule_type: 0,
        });
        id
    }

    /// 字典读取完毕后解析特殊规则，并补齐缺失的合成规则
    pub fn finalize(&mut self) {
        self.localized_name_rules.clear();
        self.highway_rules.clear();
        self.layer_rules.clear();
        let snapshot: Vec<MapEncodingRule> = self.rules.iter().flatten().cloned().collect();
        for rule in &snapshot {
            match (rule.tag.as_str(), rule.value.as_str()) {
                ("name", _) => self.name_rule = Some(rule.id),
                ("ref", _) => self.ref_rule = Some(rule.id),
                ("oneway", "yes") | ("oneway", "1") | ("oneway", "true") => {
                    self.oneway = Some(rule.id)
                }
                ("oneway", "-1") | ("oneway", "reverse") => self.oneway_reverse = Some(rule.id),
                ("tunnel", v) if v != "no" => self.tunnel = Some(rule.id),
                ("bridge", v) if v != "no" => self.bridge = Some(rule.id),
                ("layer", v) => {
                    if let Ok(layer) = v.parse::<i32>() {
                        self.layer_rules.insert(rule.id, layer);
                    }
                }
                ("highway", _) => self.highway_rules.push(rule.id),
                (tag, _) => {
                    if let Some(lang) = tag.strip_prefix("name:") {
                        self.localized_name_rules.insert(rule.id, lang.to_string());
                    }
                }
            }
        }
        self.natural_coastline = self.ensure_rule("natural", "coastline");
        self.natural_land = self.ensure_rule("natural", "land");
        self.natural_coastline_broken = self.ensure_rule("natural", "coastline_broken");
        self.natural_coastline_line = self.ensure_rule("natural", "coastline_line");
    }

    #[inline]
    pub fn rule(&self, id: u32) -> Option<&MapEncodingRule> {
        self.rules.get(id as usize).and_then(|r| r.as_ref())
    }

    pub fn find(&self, tag: &str, value: &str) -> Option<u32> {
        self.lookup.get(&(tag.to_string(), value.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_caption_rule(&self, id: u32) -> bool {
        self.rule(id).map(|r| r.value.is_empty()).unwrap_or(false)
    }
}

// ============================================================================
// 地图对象
// ============================================================================

/// 对象来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MapObjectOrigin {
    Detailed,
    Basemap,
    /// 从仅含路网的文件转换而来
    RoadOnly,
    /// 海岸线多边形化 / 底色填充生成
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct MapObject {
    pub id: ObfObjectId,
    pub origin: MapObjectOrigin,
    pub encoding: Arc<MapEncodingRules>,
    pub points31: Vec<PointI>,
    pub inner_polygons31: Vec<Vec<PointI>>,
    pub label31: Option<PointI>,
    pub type_ids: Vec<u32>,
    pub additional_type_ids: Vec<u32>,
    /// (规则 id, 文本)，保持声明顺序
    pub captions: Vec<(u32, String)>,
    pub bbox31: AreaI,
    /// 以面坐标 (areaCoordinates) 编码
    pub is_area: bool,
}

impl MapObject {
    pub fn new(
        id: ObfObjectId,
        origin: MapObjectOrigin,
        encoding: Arc<MapEncodingRules>,
        points31: Vec<PointI>,
        type_ids: Vec<u32>,
    ) -> Self {
        let bbox31 = AreaI::from_points(&points31).unwrap_or_default();
        Self {
            id,
            origin,
            encoding,
            points31,
            inner_polygons31: Vec::new(),
            label31: None,
            type_ids,
            additional_type_ids: Vec::new(),
            captions: Vec::new(),
            bbox31,
            is_area: false,
        }
    }

    /// 合成对象 (填充 / 海岸线)
    pub fn synthetic(index: i64, points31: Vec<PointI>, type_id: u32, is_area: bool) -> Self {
        let mut object = MapObject::new(
            ObfObjectId::synthetic(index),
            MapObjectOrigin::Synthetic,
            MapEncodingRules::synthetic(),
            points31,
            vec![type_id],
        );
        object.is_area = is_area;
        object
    }

    pub fn type_rule(&self, index: usize) -> Option<&MapEncodingRule> {
        self.type_ids
            .get(index)
            .and_then(|&id| self.encoding.rule(id))
    }

    pub fn contains_type(&self, tag: &str, value: &str) -> bool {
        self.type_ids
            .iter()
            .filter_map(|&id| self.encoding.rule(id))
            .any(|r| r.tag == tag && r.value == value)
    }

    pub fn contains_type_id(&self, id: u32) -> bool {
        self.type_ids.contains(&id)
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.type_ids
            .iter()
            .chain(self.additional_type_ids.iter())
            .filter_map(|&id| self.encoding.rule(id))
            .any(|r| r.tag == tag)
    }

    /// 附加类型中是否存在 tag=value
    pub fn contains_additional(&self, tag: &str, value: &str) -> bool {
        self.additional_type_ids
            .iter()
            .filter_map(|&id| self.encoding.rule(id))
            .any(|r| r.tag == tag && r.value == value)
    }

    pub fn is_coastline(&self) -> bool {
        self.contains_type_id(self.encoding.natural_coastline)
    }

    /// 外环 (以及可选的内环) 是否首尾闭合
    pub fn is_closed_figure(&self, check_inner: bool) -> bool {
        let closed = |ring: &[PointI]| ring.len() > 2 && ring.first() == ring.last();
        if !closed(&self.points31) {
            return false;
        }
        !check_inner || self.inner_polygons31.iter().all(|r| closed(r))
    }

    /// 简化图层：显式 layer 优先，其次隧道 -1 / 桥梁 +1
    pub fn simple_layer(&self) -> i32 {
        let enc = &self.encoding;
        for id in self.type_ids.iter().chain(self.additional_type_ids.iter()) {
            if let Some(&layer) = enc.layer_rules.get(id) {
                return layer.signum();
            }
            if Some(*id) == enc.tunnel {
                return -1;
            }
            if Some(*id) == enc.bridge {
                return 1;
            }
        }
        0
    }

    /// 按 tag 取名称文本
    pub fn caption(&self, tag: &str) -> Option<&str> {
        self.captions.iter().find_map(|(id, text)| {
            self.encoding
                .rule(*id)
                .filter(|r| r.tag == tag)
                .map(|_| text.as_str())
        })
    }

    /// (tag, 文本) 按声明顺序
    pub fn captions_in_order(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.captions.iter().filter_map(|(id, text)| {
            self.encoding
                .rule(*id)
                .map(|r| (r.tag.as_str(), text.as_str()))
        })
    }

    pub fn has_captions(&self) -> bool {
        !self.captions.is_empty()
    }
}
