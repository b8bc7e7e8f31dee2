//! 渲染样式
//!
//! 样式由五个规则集 (点 / 线 / 面 / 文字 / 排序) 和若干命名渲染属性组成。
//! 规则集内按 (tag, value) 建索引；每个键对应一个合成分组，组内规则按声明顺序
//! 做 if/else 匹配。
//!
//! 属性以 `PropertyId` 标识：内置属性的编号固定 (见 `props`)，
//! 样式参数 (如 `nightMode`) 追加在内置属性之后。
//!
//! 样式可以用 `StyleBuilder` 编程构建，也可以从 JSON 文档加载：
//!
//! ```text
//! {
//!   "name": "...",
//!   "parameters": [ { "name": "nightMode", "type": "bool", "default": false } ],
//!   "attributes": [ { "name": "defaultColor", "rules": [ { "outputs": { "attrColorValue": "#f1eee8" } } ] } ],
//!   "order":   [ rule, ... ],
//!   "point":   [ ... ], "line": [ ... ], "polygon": [ ... ], "text": [ ... ]
//! }
//!
//! rule = { "tag": "highway", "value": "primary",
//!          "inputs":  { "minzoom": 12 },
//!          "outputs": { "color": "#ffa0a0a0", "strokeWidth": 3.0 },
//!          "switch":  [ rule, ... ],      首个匹配者生效
//!          "apply":   [ rule, ... ],      全部依次生效
//!          "group":   false }
//! ```

use crate::error::{ObfError, ObfResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

// ============================================================================
// 规则集与属性值
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleSet {
    Point = 1,
    Line = 2,
    Polygon = 3,
    Text = 4,
    Order = 5,
}

impl RuleSet {
    pub const ALL: [RuleSet; 5] = [
        RuleSet::Point,
        RuleSet::Line,
        RuleSet::Polygon,
        RuleSet::Text,
        RuleSet::Order,
    ];

    fn index(self) -> usize {
        self as usize - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Int,
    Float,
    Bool,
    String,
    Color,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StyleValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    String(String),
    /// ARGB
    Color(u32),
}

impl StyleValue {
    pub fn default_for(kind: PropertyKind) -> StyleValue {
        match kind {
            PropertyKind::Int => StyleValue::Int(0),
            PropertyKind::Float => StyleValue::Float(0.0),
            PropertyKind::Bool => StyleValue::Bool(false),
            PropertyKind::String => StyleValue::String(String::new()),
            PropertyKind::Color => StyleValue::Color(0),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            StyleValue::Int(v) => Some(*v),
            StyleValue::Float(v) => Some(*v as i32),
            StyleValue::Bool(v) => Some(i32::from(*v)),
            StyleValue::Color(v) => Some(*v as i32),
            StyleValue::String(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            StyleValue::Float(v) => Some(*v),
            StyleValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StyleValue::Bool(v) => Some(*v),
            StyleValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StyleValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<u32> {
        match self {
            StyleValue::Color(v) => Some(*v),
            StyleValue::Int(v) => Some(*v as u32),
            _ => None,
        }
    }

    /// 按类型解析文本形式的值
    pub fn parse(kind: PropertyKind, text: &str) -> Option<StyleValue> {
        let text = text.trim();
        Some(match kind {
            PropertyKind::Int => StyleValue::Int(text.parse().ok()?),
            PropertyKind::Float => StyleValue::Float(text.parse().ok()?),
            PropertyKind::Bool => StyleValue::Bool(match text {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" | "" => false,
                _ => return None,
            }),
            PropertyKind::String => StyleValue::String(text.to_string()),
            PropertyKind::Color => StyleValue::Color(parse_color(text)?),
        })
    }

    fn from_json(kind: PropertyKind, json: &serde_json::Value) -> Option<StyleValue> {
        use serde_json::Value;
        match (kind, json) {
            (_, Value::String(s)) => StyleValue::parse(kind, s),
            (PropertyKind::Int, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(|v| StyleValue::Int(v as i32)),
            (PropertyKind::Float, Value::Number(n)) => n.as_f64().map(|v| StyleValue::Float(v as f32)),
            (PropertyKind::Color, Value::Number(n)) => n.as_u64().map(|v| StyleValue::Color(v as u32)),
            (PropertyKind::Bool, Value::Bool(b)) => Some(StyleValue::Bool(*b)),
            (PropertyKind::Int, Value::Bool(b)) => Some(StyleValue::Int(i32::from(*b))),
            (PropertyKind::String, Value::Number(n)) => Some(StyleValue::String(n.to_string())),
            (PropertyKind::String, Value::Bool(b)) => Some(StyleValue::String(b.to_string())),
            _ => None,
        }
    }
}

/// `#rrggbb` 或 `#aarrggbb`
pub fn parse_color(text: &str) -> Option<u32> {
    let hex = text.strip_prefix('#')?;
    let value = u32::from_str_radix(hex, 16).ok()?;
    match hex.len() {
        6 => Some(0xff00_0000 | value),
        8 => Some(value),
        _ => None,
    }
}

// ============================================================================
// 属性表
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PropertyId(pub u16);

/// 内置属性，编号即下标
const BUILTIN_PROPERTIES: &[(&str, PropertyKind)] = &[
    // 输入
    ("tag", PropertyKind::String),
    ("value", PropertyKind::String),
    ("minzoom", PropertyKind::Int),
    ("maxzoom", PropertyKind::Int),
    ("additional", PropertyKind::String),
    ("layer", PropertyKind::Int),
    ("area", PropertyKind::Bool),
    ("point", PropertyKind::Bool),
    ("cycle", PropertyKind::Bool),
    ("textLength", PropertyKind::Int),
    ("nameTag", PropertyKind::String),
    // 输出
    ("order", PropertyKind::Int),
    ("objectType", PropertyKind::Int),
    ("shadowLevel", PropertyKind::Int),
    ("shadowColor", PropertyKind::Color),
    ("shadowRadius", PropertyKind::Float),
    ("shader", PropertyKind::String),
    ("icon", PropertyKind::String),
    ("icon_1", PropertyKind::String),
    ("icon2", PropertyKind::String),
    ("icon3", PropertyKind::String),
    ("icon4", PropertyKind::String),
    ("icon5", PropertyKind::String),
    ("shield", PropertyKind::String),
    ("iconOrder", PropertyKind::Int),
    ("iconShiftPx", PropertyKind::Float),
    ("iconShiftPy", PropertyKind::Float),
    ("iconVisibleSize", PropertyKind::Float),
    ("intersectionSizeFactor", PropertyKind::Float),
    ("intersectionMargin", PropertyKind::Float),
    ("intersectionSize", PropertyKind::Float),
    ("textSize", PropertyKind::Float),
    ("textColor", PropertyKind::Color),
    ("textHaloRadius", PropertyKind::Float),
    ("textHaloColor", PropertyKind::Color),
    ("textWrapWidth", PropertyKind::Int),
    ("textOrder", PropertyKind::Int),
    ("textMinDistance", PropertyKind::Float),
    ("textOnPath", PropertyKind::Bool),
    ("textBold", PropertyKind::Bool),
    ("textItalic", PropertyKind::Bool),
    ("textDy", PropertyKind::Float),
    ("textShield", PropertyKind::String),
    ("ignorePolygonAsPointArea", PropertyKind::Bool),
    ("disable", PropertyKind::Bool),
    ("onewayArrowsColor", PropertyKind::Color),
    ("attrIntValue", PropertyKind::Int),
    ("attrColorValue", PropertyKind::Color),
    ("attrFloatValue", PropertyKind::Float),
    ("attrBoolValue", PropertyKind::Bool),
    ("attrStringValue", PropertyKind::String),
];

/// 线条分层后缀，对应层 -3..=4
pub const LINE_LAYER_SUFFIXES: [&str; 8] = ["__2", "__1", "_0", "", "_2", "_3", "_4", "_5"];
pub const MIN_LINE_LAYER: i32 = -3;
pub const MAX_LINE_LAYER: i32 = 4;

/// 每层的属性 (顺序与 `LineLayerProperty` 一致)
const LINE_LAYER_PROPERTIES: [(&str, PropertyKind); 4] = [
    ("color", PropertyKind::Color),
    ("strokeWidth", PropertyKind::Float),
    ("cap", PropertyKind::String),
    ("pathEffect", PropertyKind::String),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLayerProperty {
    Color = 0,
    StrokeWidth = 1,
    Cap = 2,
    PathEffect = 3,
}

/// 内置属性编号
pub mod props {
    use super::PropertyId;

    pub const TAG: PropertyId = PropertyId(0);
    pub const VALUE: PropertyId = PropertyId(1);
    pub const MINZOOM: PropertyId = PropertyId(2);
    pub const MAXZOOM: PropertyId = PropertyId(3);
    pub const ADDITIONAL: PropertyId = PropertyId(4);
    pub const LAYER: PropertyId = PropertyId(5);
    pub const AREA: PropertyId = PropertyId(6);
    pub const POINT: PropertyId = PropertyId(7);
    pub const CYCLE: PropertyId = PropertyId(8);
    pub const TEXT_LENGTH: PropertyId = PropertyId(9);
    pub const NAME_TAG: PropertyId = PropertyId(10);

    pub const ORDER: PropertyId = PropertyId(11);
    pub const OBJECT_TYPE: PropertyId = PropertyId(12);
    pub const SHADOW_LEVEL: PropertyId = PropertyId(13);
    pub const SHADOW_COLOR: PropertyId = PropertyId(14);
    pub const SHADOW_RADIUS: PropertyId = PropertyId(15);
    pub const SHADER: PropertyId = PropertyId(16);
    pub const ICON: PropertyId = PropertyId(17);
    pub const ICON_1: PropertyId = PropertyId(18);
    pub const ICON_2: PropertyId = PropertyId(19);
    pub const ICON_3: PropertyId = PropertyId(20);
    pub const ICON_4: PropertyId = PropertyId(21);
    pub const ICON_5: PropertyId = PropertyId(22);
    pub const SHIELD: PropertyId = PropertyId(23);
    pub const ICON_ORDER: PropertyId = PropertyId(24);
    pub const ICON_SHIFT_PX: PropertyId = PropertyId(25);
    pub const ICON_SHIFT_PY: PropertyId = PropertyId(26);
    pub const ICON_VISIBLE_SIZE: PropertyId = PropertyId(27);
    pub const INTERSECTION_SIZE_FACTOR: PropertyId = PropertyId(28);
    pub const INTERSECTION_MARGIN: PropertyId = PropertyId(29);
    pub const INTERSECTION_SIZE: PropertyId = PropertyId(30);
    pub const TEXT_SIZE: PropertyId = PropertyId(31);
    pub const TEXT_COLOR: PropertyId = PropertyId(32);
    pub const TEXT_HALO_RADIUS: PropertyId = PropertyId(33);
    pub const TEXT_HALO_COLOR: PropertyId = PropertyId(34);
    pub const TEXT_WRAP_WIDTH: PropertyId = PropertyId(35);
    pub const TEXT_ORDER: PropertyId = PropertyId(36);
    pub const TEXT_MIN_DISTANCE: PropertyId = PropertyId(37);
    pub const TEXT_ON_PATH: PropertyId = PropertyId(38);
    pub const TEXT_BOLD: PropertyId = PropertyId(39);
    pub const TEXT_ITALIC: PropertyId = PropertyId(40);
    pub const TEXT_DY: PropertyId = PropertyId(41);
    pub const TEXT_SHIELD: PropertyId = PropertyId(42);
    pub const IGNORE_POLYGON_AS_POINT_AREA: PropertyId = PropertyId(43);
    pub const DISABLE: PropertyId = PropertyId(44);
    pub const ONEWAY_ARROWS_COLOR: PropertyId = PropertyId(45);
    pub const ATTR_INT_VALUE: PropertyId = PropertyId(46);
    pub const ATTR_COLOR_VALUE: PropertyId = PropertyId(47);
    pub const ATTR_FLOAT_VALUE: PropertyId = PropertyId(48);
    pub const ATTR_BOOL_VALUE: PropertyId = PropertyId(49);
    pub const ATTR_STRING_VALUE: PropertyId = PropertyId(50);

    /// 分层线条属性的起始编号
    pub const LINE_LAYERS_BASE: u16 = 51;

    /// 主层颜色 (面填充同样使用)
    pub const COLOR: PropertyId = PropertyId(LINE_LAYERS_BASE + 12);
    pub const STROKE_WIDTH: PropertyId = PropertyId(LINE_LAYERS_BASE + 13);
}

/// 分层线条属性编号
pub fn line_layer_property(layer: i32, property: LineLayerProperty) -> PropertyId {
    let layer = layer.clamp(MIN_LINE_LAYER, MAX_LINE_LAYER);
    let slot = ((layer - MIN_LINE_LAYER) * 4) as u16 + property as u16;
    PropertyId(props::LINE_LAYERS_BASE + slot)
}

/// 名称 ↔ 编号 ↔ 类型
#[derive(Debug, Clone)]
pub struct StyleProperties {
    entries: Vec<(String, PropertyKind)>,
    by_name: HashMap<String, PropertyId>,
}

impl Default for StyleProperties {
    fn default() -> Self {
        let mut properties = Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
        };
        for (name, kind) in BUILTIN_PROPERTIES {
            properties.register(name, *kind);
        }
        for suffix in LINE_LAYER_SUFFIXES {
            for (name, kind) in LINE_LAYER_PROPERTIES {
                properties.register(&format!("{}{}", name, suffix), kind);
            }
        }
        properties
    }
}

impl StyleProperties {
    /// 注册属性；同名已存在时返回原编号
    pub fn register(&mut self, name: &str, kind: PropertyKind) -> PropertyId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = PropertyId(self.entries.len() as u16);
        self.entries.push((name.to_string(), kind));
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn id(&self, name: &str) -> Option<PropertyId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: PropertyId) -> Option<&str> {
        self.entries.get(usize::from(id.0)).map(|(n, _)| n.as_str())
    }

    pub fn kind(&self, id: PropertyId) -> PropertyKind {
        self.entries
            .get(usize::from(id.0))
            .map(|(_, k)| *k)
            .unwrap_or(PropertyKind::String)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// 规则树
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleRule {
    pub inputs: Vec<(PropertyId, StyleValue)>,
    pub outputs: Vec<(PropertyId, StyleValue)>,
    /// 分组：自身输出只作为默认值，且必须有子规则匹配才算匹配
    pub is_group: bool,
    /// 依次尝试，首个匹配者生效
    pub if_else_children: Vec<StyleRule>,
    /// 匹配后全部访问
    pub if_children: Vec<StyleRule>,
}

impl StyleRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 tag / value 为输入的规则 (空串表示不限定)
    pub fn for_tag(tag: &str, value: &str) -> Self {
        let mut rule = Self::new();
        if !tag.is_empty() {
            rule.inputs
                .push((props::TAG, StyleValue::String(tag.to_string())));
        }
        if !value.is_empty() {
            rule.inputs
                .push((props::VALUE, StyleValue::String(value.to_string())));
        }
        rule
    }

    pub fn group() -> Self {
        Self {
            is_group: true,
            ..Self::default()
        }
    }

    pub fn input(mut self, id: PropertyId, value: StyleValue) -> Self {
        self.inputs.push((id, value));
        self
    }

    pub fn output(mut self, id: PropertyId, value: StyleValue) -> Self {
        self.outputs.push((id, value));
        self
    }

    pub fn switch(mut self, child: StyleRule) -> Self {
        self.if_else_children.push(child);
        self
    }

    pub fn apply(mut self, child: StyleRule) -> Self {
        self.if_children.push(child);
        self
    }

    fn string_input(&self, id: PropertyId) -> &str {
        self.inputs
            .iter()
            .find(|(i, _)| *i == id)
            .and_then(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// 规则在规则集中的索引键
    pub fn key(&self) -> (String, String) {
        (
            self.string_input(props::TAG).to_string(),
            self.string_input(props::VALUE).to_string(),
        )
    }
}

// ============================================================================
// 样式
// ============================================================================

/// tag → value → 合成分组
pub type RuleIndex = HashMap<String, HashMap<String, StyleRule>>;

#[derive(Debug, Clone)]
pub struct Style {
    pub(crate) name: String,
    pub(crate) properties: StyleProperties,
    pub(crate) rule_sets: [RuleIndex; 5],
    pub(crate) attributes: HashMap<String, StyleRule>,
    /// 样式参数的当前取值
    pub(crate) parameter_values: BTreeMap<PropertyId, StyleValue>,
}

impl Style {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &StyleProperties {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<PropertyId> {
        self.properties.id(name)
    }

    pub fn rules(&self, rule_set: RuleSet) -> &RuleIndex {
        &self.rule_sets[rule_set.index()]
    }

    pub fn rule(&self, rule_set: RuleSet, tag: &str, value: &str) -> Option<&StyleRule> {
        self.rule_sets[rule_set.index()].get(tag)?.get(value)
    }

    pub fn attribute(&self, name: &str) -> Option<&StyleRule> {
        self.attributes.get(name)
    }

    pub fn parameter_values(&self) -> &BTreeMap<PropertyId, StyleValue> {
        &self.parameter_values
    }

    /// 设置样式参数 (必须已声明)
    pub fn set_parameter(&mut self, name: &str, value: StyleValue) -> ObfResult<()> {
        let id = self
            .properties
            .id(name)
            .filter(|id| self.parameter_values.contains_key(id))
            .ok_or_else(|| ObfError::Style(format!("unknown style parameter '{}'", name)))?;
        self.parameter_values.insert(id, value);
        Ok(())
    }

    pub fn from_json(text: &str) -> ObfResult<Style> {
        let definition: StyleDefinition = serde_json::from_str(text)
            .map_err(|e| ObfError::Style(format!("invalid style document: {}", e)))?;
        definition.into_style()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Style> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取样式文件: {:?}", path))?;
        let style = Style::from_json(&text).with_context(|| format!("样式解析失败: {:?}", path))?;
        tracing::info!(style = %style.name, path = ?path, "style loaded");
        Ok(style)
    }
}

/// 编程构建样式
#[derive(Debug)]
pub struct StyleBuilder {
    style: Style,
}

impl StyleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            style: Style {
                name: name.to_string(),
                properties: StyleProperties::default(),
                rule_sets: Default::default(),
                attributes: HashMap::new(),
                parameter_values: BTreeMap::new(),
            },
        }
    }

    /// 声明样式参数，返回其属性编号
    pub fn parameter(&mut self, name: &str, kind: PropertyKind, default: StyleValue) -> PropertyId {
        let id = self.style.properties.register(name, kind);
        self.style.parameter_values.insert(id, default);
        id
    }

    pub fn property(&self, name: &str) -> Option<PropertyId> {
        self.style.properties.id(name)
    }

    /// 加入规则集；同一 (tag, value) 下的规则按加入顺序做 if/else
    pub fn add_rule(&mut self, rule_set: RuleSet, rule: StyleRule) -> &mut Self {
        let (tag, value) = rule.key();
        self.style.rule_sets[rule_set.index()]
            .entry(tag)
            .or_default()
            .entry(value)
            .or_insert_with(StyleRule::group)
            .if_else_children
            .push(rule);
        self
    }

    /// 命名渲染属性；多条规则按顺序做 if/else
    pub fn add_attribute(&mut self, name: &str, rule: StyleRule) -> &mut Self {
        self.style
            .attributes
            .entry(name.to_string())
            .or_insert_with(StyleRule::group)
            .if_else_children
            .push(rule);
        self
    }

    pub fn build(self) -> Style {
        self.style
    }
}

// ============================================================================
// JSON 文档
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StyleDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub order: Vec<RuleDefinition>,
    #[serde(default)]
    pub point: Vec<RuleDefinition>,
    #[serde(default)]
    pub line: Vec<RuleDefinition>,
    #[serde(default)]
    pub polygon: Vec<RuleDefinition>,
    #[serde(default)]
    pub text: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type", default = "default_parameter_kind")]
    pub kind: PropertyKind,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

fn default_parameter_kind() -> PropertyKind {
    PropertyKind::Bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub switch: Vec<RuleDefinition>,
    #[serde(default)]
    pub apply: Vec<RuleDefinition>,
    #[serde(default)]
    pub group: bool,
}

impl StyleDefinition {
    pub fn into_style(self) -> ObfResult<Style> {
        let mut builder = StyleBuilder::new(&self.name);
        for parameter in &self.parameters {
            let default = match &parameter.default {
                Some(json) => StyleValue::from_json(parameter.kind, json).ok_or_else(|| {
                    ObfError::Style(format!(
                        "invalid default {} for parameter '{}'",
                        json, parameter.name
                    ))
                })?,
                None => StyleValue::default_for(parameter.kind),
            };
            builder.parameter(&parameter.name, parameter.kind, default);
        }

        for attribute in &self.attributes {
            for definition in &attribute.rules {
                let rule = definition.to_rule(&builder.style.properties)?;
                builder.add_attribute(&attribute.name, rule);
            }
        }

        let sets = [
            (RuleSet::Order, &self.order),
            (RuleSet::Point, &self.point),
            (RuleSet::Line, &self.line),
            (RuleSet::Polygon, &self.polygon),
            (RuleSet::Text, &self.text),
        ];
        for (rule_set, definitions) in sets {
            for definition in definitions {
                let rule = definition.to_rule(&builder.style.properties)?;
                builder.add_rule(rule_set, rule);
            }
        }
        Ok(builder.build())
    }
}

impl RuleDefinition {
    fn to_rule(&self, properties: &StyleProperties) -> ObfResult<StyleRule> {
        let mut rule = StyleRule::for_tag(
            self.tag.as_deref().unwrap_or(""),
            self.value.as_deref().unwrap_or(""),
        );
        rule.is_group = self.group;
        for (name, json) in &self.inputs {
            rule.inputs.push(convert_property(properties, name, json)?);
        }
        for (name, json) in &self.outputs {
            rule.outputs.push(convert_property(properties, name, json)?);
        }
        for child in &self.switch {
            rule.if_else_children.push(child.to_rule(properties)?);
        }
        for child in &self.apply {
            rule.if_children.push(child.to_rule(properties)?);
        }
        Ok(rule)
    }
}

fn convert_property(
    properties: &StyleProperties,
    name: &str,
    json: &serde_json::Value,
) -> ObfResult<(PropertyId, StyleValue)> {
    let id = properties
        .id(name)
        .ok_or_else(|| ObfError::Style(format!("unknown property '{}'", name)))?;
    let value = StyleValue::from_json(properties.kind(id), json)
        .ok_or_else(|| ObfError::Style(format!("invalid value {} for property '{}'", json, name)))?;
    Ok((id, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TEST_STYLE_JSON;

    #[test]
    fn test_builtin_property_ids_match_names() {
        let properties = StyleProperties::default();
        assert_eq!(properties.id("tag"), Some(props::TAG));
        assert_eq!(properties.id("disable"), Some(props::DISABLE));
        assert_eq!(properties.id("attrStringValue"), Some(props::ATTR_STRING_VALUE));
        assert_eq!(properties.id("color"), Some(props::COLOR));
        assert_eq!(properties.id("strokeWidth"), Some(props::STROKE_WIDTH));
        assert_eq!(
            properties.id("color__2"),
            Some(line_layer_property(-3, LineLayerProperty::Color))
        );
        assert_eq!(
            properties.id("pathEffect_5"),
            Some(line_layer_property(4, LineLayerProperty::PathEffect))
        );
        assert_eq!(properties.kind(props::TEXT_SIZE), PropertyKind::Float);
    }

    #[test]
    fn test_parse_colors() {
        assert_eq!(parse_color("#f1eee8"), Some(0xfff1_eee8));
        assert_eq!(parse_color("#80ff0000"), Some(0x80ff_0000));
        assert_eq!(parse_color("f1eee8"), None);
        assert_eq!(parse_color("#fff"), None);
    }

    #[test]
    fn test_load_test_style() {
        let style = Style::from_json(TEST_STYLE_JSON).unwrap();
        assert_eq!(style.name(), "test");
        let water = style.rule(RuleSet::Order, "natural", "water").unwrap();
        assert!(water.is_group);
        assert_eq!(water.if_else_children.len(), 1);
        assert!(water.if_else_children[0]
            .outputs
            .contains(&(props::ORDER, StyleValue::Int(10))));
        assert!(style.rule(RuleSet::Line, "highway", "").is_some());
        assert!(style.rule(RuleSet::Text, "", "").is_some());
    }

    #[test]
    fn test_unknown_property_is_style_error() {
        let result = Style::from_json(
            r#"{ "order": [ { "tag": "a", "value": "b", "outputs": { "nonsense": 1 } } ] }"#,
        );
        assert!(matches!(result, Err(ObfError::Style(_))));
    }

    #[test]
    fn test_parameters_are_registered() {
        let mut style = Style::from_json(
            r#"{ "parameters": [ { "name": "nightMode", "type": "bool", "default": true } ] }"#,
        )
        .unwrap();
        let id = style.property("nightMode").unwrap();
        assert_eq!(style.parameter_values().get(&id), Some(&StyleValue::Bool(true)));
        style.set_parameter("nightMode", StyleValue::Bool(false)).unwrap();
        assert_eq!(style.parameter_values().get(&id), Some(&StyleValue::Bool(false)));
        assert!(style.set_parameter("order", StyleValue::Int(1)).is_err());
    }
}
