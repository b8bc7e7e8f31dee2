//! 样式求值
//!
//! 给定输入 (tag / value / 缩放级别 / 对象属性 / 样式参数)，在规则集中查找匹配规则
//! 并收集输出属性。查找顺序：(tag, value) → (tag, "") → ("", "")。
//!
//! 规则访问：
//! - 输入全部匹配才继续；minzoom 要求规则值 ≤ 当前级别，maxzoom 要求 ≥ 当前级别
//! - 非分组规则以覆盖方式写入输出
//! - if/else 子规则只取第一个匹配者
//! - 非分组规则，或有子规则匹配的分组规则，视为匹配；此时分组以非覆盖方式写入
//!   输出 (作为默认值)，再访问全部 apply 子规则
//! - 结果中 `disable = true` 视为未匹配

use crate::area::ZoomLevel;
use crate::style::{props, PropertyId, PropertyKind, RuleSet, Style, StyleRule, StyleValue};
use serde::Serialize;
use std::collections::BTreeMap;

/// 求值得到的输出属性
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationResult {
    values: BTreeMap<PropertyId, StyleValue>,
}

impl EvaluationResult {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&mut self, id: PropertyId, value: &StyleValue, override_existing: bool) {
        if override_existing || !self.values.contains_key(&id) {
            self.values.insert(id, value.clone());
        }
    }

    pub fn set(&mut self, id: PropertyId, value: StyleValue) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: PropertyId) -> Option<&StyleValue> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: PropertyId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn int(&self, id: PropertyId) -> Option<i32> {
        self.get(id).and_then(StyleValue::as_int)
    }

    pub fn float(&self, id: PropertyId) -> Option<f32> {
        self.get(id).and_then(StyleValue::as_float)
    }

    pub fn bool(&self, id: PropertyId) -> Option<bool> {
        self.get(id).and_then(StyleValue::as_bool)
    }

    pub fn string(&self, id: PropertyId) -> Option<&str> {
        self.get(id).and_then(StyleValue::as_str).filter(|s| !s.is_empty())
    }

    pub fn color(&self, id: PropertyId) -> Option<u32> {
        self.get(id).and_then(StyleValue::as_color)
    }

    pub fn int_or(&self, id: PropertyId, default: i32) -> i32 {
        self.int(id).unwrap_or(default)
    }

    pub fn float_or(&self, id: PropertyId, default: f32) -> f32 {
        self.float(id).unwrap_or(default)
    }

    pub fn bool_or(&self, id: PropertyId, default: bool) -> bool {
        self.bool(id).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropertyId, &StyleValue)> {
        self.values.iter()
    }
}

/// 一次求值的输入
#[derive(Debug, Clone)]
pub struct StyleEvaluator<'s> {
    style: &'s Style,
    inputs: BTreeMap<PropertyId, StyleValue>,
    /// 对象的附加类型 (tag, value)
    additional: Vec<(String, String)>,
}

impl<'s> StyleEvaluator<'s> {
    pub fn new(style: &'s Style) -> Self {
        Self {
            style,
            inputs: style.parameter_values().clone(),
            additional: Vec::new(),
        }
    }

    pub fn style(&self) -> &'s Style {
        self.style
    }

    pub fn set_input(&mut self, id: PropertyId, value: StyleValue) -> &mut Self {
        self.inputs.insert(id, value);
        self
    }

    pub fn set_string(&mut self, id: PropertyId, value: &str) -> &mut Self {
        self.set_input(id, StyleValue::String(value.to_string()))
    }

    pub fn set_int(&mut self, id: PropertyId, value: i32) -> &mut Self {
        self.set_input(id, StyleValue::Int(value))
    }

    pub fn set_bool(&mut self, id: PropertyId, value: bool) -> &mut Self {
        self.set_input(id, StyleValue::Bool(value))
    }

    pub fn set_zoom(&mut self, zoom: ZoomLevel) -> &mut Self {
        self.set_int(props::MINZOOM, i32::from(zoom));
        self.set_int(props::MAXZOOM, i32::from(zoom))
    }

    pub fn set_tag_value(&mut self, tag: &str, value: &str) -> &mut Self {
        self.set_string(props::TAG, tag);
        self.set_string(props::VALUE, value)
    }

    pub fn set_additional<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> &mut Self {
        self.additional = pairs
            .into_iter()
            .map(|(t, v)| (t.to_string(), v.to_string()))
            .collect();
        self
    }

    /// 在规则集中查找并求值；无匹配或被禁用时返回 None
    pub fn evaluate(&self, rule_set: RuleSet) -> Option<EvaluationResult> {
        let tag = self.string_input(props::TAG);
        let value = self.string_input(props::VALUE);
        let candidates = [(tag, value), (tag, ""), ("", "")];
        for (index, (t, v)) in candidates.iter().enumerate() {
            // tag 为空时后两项重复
            if index > 0 && candidates[..index].contains(&(*t, *v)) {
                continue;
            }
            if let Some(rule) = self.style.rule(rule_set, t, v) {
                if let Some(result) = self.evaluate_rule(rule) {
                    return Some(result);
                }
            }
        }
        None
    }

    /// 求值单条规则
    pub fn evaluate_rule(&self, rule: &StyleRule) -> Option<EvaluationResult> {
        let mut result = EvaluationResult::new();
        if !self.visit_rule(rule, &mut result) {
            return None;
        }
        if result.bool(props::DISABLE) == Some(true) {
            return None;
        }
        Some(result)
    }

    /// 求值命名渲染属性
    pub fn evaluate_attribute(&self, name: &str) -> Option<EvaluationResult> {
        let rule = self.style.attribute(name)?;
        self.evaluate_rule(rule)
    }

    pub fn attribute_int(&self, name: &str) -> Option<i32> {
        self.evaluate_attribute(name)?.int(props::ATTR_INT_VALUE)
    }

    pub fn attribute_float(&self, name: &str) -> Option<f32> {
        self.evaluate_attribute(name)?.float(props::ATTR_FLOAT_VALUE)
    }

    pub fn attribute_bool(&self, name: &str) -> Option<bool> {
        self.evaluate_attribute(name)?.bool(props::ATTR_BOOL_VALUE)
    }

    pub fn attribute_color(&self, name: &str) -> Option<u32> {
        self.evaluate_attribute(name)?.color(props::ATTR_COLOR_VALUE)
    }

    fn visit_rule(&self, rule: &StyleRule, result: &mut EvaluationResult) -> bool {
        if !rule
            .inputs
            .iter()
            .all(|(id, value)| self.input_matches(*id, value))
        {
            return false;
        }
        if !rule.is_group {
            for (id, value) in &rule.outputs {
                result.store(*id, value, true);
            }
        }
        let matched = rule
            .if_else_children
            .iter()
            .any(|child| self.visit_rule(child, result));
        let fit = matched || !rule.is_group;
        if fit {
            if rule.is_group {
                for (id, value) in &rule.outputs {
                    result.store(*id, value, false);
                }
            }
            for child in &rule.if_children {
                self.visit_rule(child, result);
            }
        }
        fit
    }

    fn input_matches(&self, id: PropertyId, rule_value: &StyleValue) -> bool {
        match id {
            props::MINZOOM => match (rule_value.as_int(), self.int_input(props::MINZOOM)) {
                (Some(min), zoom) => min <= zoom,
                (None, _) => false,
            },
            props::MAXZOOM => match (rule_value.as_int(), self.int_input(props::MAXZOOM)) {
                (Some(max), zoom) => max >= zoom,
                (None, _) => false,
            },
            props::ADDITIONAL => match rule_value.as_str() {
                Some(expected) => {
                    let (tag, value) = expected.split_once('=').unwrap_or((expected, ""));
                    self.additional
                        .iter()
                        .any(|(t, v)| t == tag && (value.is_empty() || v == value))
                }
                None => false,
            },
            _ => match self.inputs.get(&id) {
                Some(current) => current == rule_value,
                None => {
                    let kind: PropertyKind = self.style.properties().kind(id);
                    StyleValue::default_for(kind) == *rule_value
                }
            },
        }
    }

    fn string_input(&self, id: PropertyId) -> &str {
        self.inputs
            .get(&id)
            .and_then(StyleValue::as_str)
            .unwrap_or("")
    }

    fn int_input(&self, id: PropertyId) -> i32 {
        self.inputs.get(&id).and_then(StyleValue::as_int).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{line_layer_property, LineLayerProperty, StyleBuilder};
    use crate::test_support::TEST_STYLE_JSON;

    fn evaluate(style: &Style, rule_set: RuleSet, tag: &str, value: &str, zoom: ZoomLevel) -> Option<EvaluationResult> {
        let mut evaluator = StyleEvaluator::new(style);
        evaluator.set_tag_value(tag, value).set_zoom(zoom);
        evaluator.evaluate(rule_set)
    }

    #[test]
    fn test_search_falls_back_to_tag_only_and_default() {
        let style = Style::from_json(TEST_STYLE_JSON).unwrap();
        let road = evaluate(&style, RuleSet::Order, "highway", "residential", 16).unwrap();
        assert_eq!(road.int(props::ORDER), Some(20));
        assert_eq!(road.int(props::OBJECT_TYPE), Some(2));

        let text = evaluate(&style, RuleSet::Text, "amenity", "cafe", 16).unwrap();
        assert_eq!(text.float(props::TEXT_SIZE), Some(12.0));

        assert!(evaluate(&style, RuleSet::Order, "building", "yes", 16).is_none());
    }

    #[test]
    fn test_zoom_bounds() {
        let mut builder = StyleBuilder::new("zoom");
        builder.add_rule(
            RuleSet::Line,
            StyleRule::for_tag("highway", "primary")
                .input(props::MINZOOM, StyleValue::Int(10))
                .input(props::MAXZOOM, StyleValue::Int(14))
                .output(props::STROKE_WIDTH, StyleValue::Float(3.0)),
        );
        let style = builder.build();
        assert!(evaluate(&style, RuleSet::Line, "highway", "primary", 9).is_none());
        assert!(evaluate(&style, RuleSet::Line, "highway", "primary", 10).is_some());
        assert!(evaluate(&style, RuleSet::Line, "highway", "primary", 14).is_some());
        assert!(evaluate(&style, RuleSet::Line, "highway", "primary", 15).is_none());
    }

    #[test]
    fn test_switch_takes_first_match_and_apply_takes_all() {
        let casing = line_layer_property(-1, LineLayerProperty::Color);
        let mut builder = StyleBuilder::new("switch");
        builder.add_rule(
            RuleSet::Line,
            StyleRule::for_tag("highway", "primary")
                .output(props::STROKE_WIDTH, StyleValue::Float(1.0))
                .switch(
                    StyleRule::new()
                        .input(props::MINZOOM, StyleValue::Int(15))
                        .output(props::STROKE_WIDTH, StyleValue::Float(6.0)),
                )
                .switch(
                    StyleRule::new()
                        .input(props::MINZOOM, StyleValue::Int(12))
                        .output(props::STROKE_WIDTH, StyleValue::Float(4.0)),
                )
                .apply(StyleRule::new().output(casing, StyleValue::Color(0xff00_0000)))
                .apply(StyleRule::new().output(props::COLOR, StyleValue::Color(0xffff_ffff))),
        );
        let style = builder.build();

        let high = evaluate(&style, RuleSet::Line, "highway", "primary", 16).unwrap();
        assert_eq!(high.float(props::STROKE_WIDTH), Some(6.0));
        assert_eq!(high.color(casing), Some(0xff00_0000));
        assert_eq!(high.color(props::COLOR), Some(0xffff_ffff));

        let mid = evaluate(&style, RuleSet::Line, "highway", "primary", 13).unwrap();
        assert_eq!(mid.float(props::STROKE_WIDTH), Some(4.0));

        // 没有子规则匹配时保留自身输出
        let low = evaluate(&style, RuleSet::Line, "highway", "primary", 8).unwrap();
        assert_eq!(low.float(props::STROKE_WIDTH), Some(1.0));
    }

    #[test]
    fn test_group_requires_matching_child() {
        let mut builder = StyleBuilder::new("group");
        let mut group = StyleRule::group()
            .output(props::COLOR, StyleValue::Color(1))
            .switch(
                StyleRule::for_tag("landuse", "forest")
                    .output(props::COLOR, StyleValue::Color(2)),
            );
        group.inputs.push((props::MINZOOM, StyleValue::Int(5)));
        builder.add_rule(RuleSet::Polygon, group);
        let style = builder.build();

        // 分组输出不覆盖子规则的值
        let forest = evaluate(&style, RuleSet::Polygon, "landuse", "forest", 12).unwrap();
        assert_eq!(forest.color(props::COLOR), Some(2));
        assert!(evaluate(&style, RuleSet::Polygon, "landuse", "meadow", 12).is_none());
    }

    #[test]
    fn test_disable_output_rejects() {
        let mut builder = StyleBuilder::new("disable");
        builder.add_rule(
            RuleSet::Point,
            StyleRule::for_tag("amenity", "bench")
                .output(props::ICON, StyleValue::String("bench".into()))
                .apply(
                    StyleRule::new()
                        .input(props::MAXZOOM, StyleValue::Int(16))
                        .output(props::DISABLE, StyleValue::Bool(true)),
                ),
        );
        let style = builder.build();
        assert!(evaluate(&style, RuleSet::Point, "amenity", "bench", 15).is_none());
        let result = evaluate(&style, RuleSet::Point, "amenity", "bench", 17).unwrap();
        assert_eq!(result.string(props::ICON), Some("bench"));
    }

    #[test]
    fn test_additional_and_parameter_inputs() {
        let mut builder = StyleBuilder::new("params");
        let night = builder.parameter("nightMode", PropertyKind::Bool, StyleValue::Bool(false));
        builder.add_rule(
            RuleSet::Polygon,
            StyleRule::for_tag("natural", "water")
                .switch(
                    StyleRule::new()
                        .input(night, StyleValue::Bool(true))
                        .output(props::COLOR, StyleValue::Color(0xff00_0020)),
                )
                .switch(
                    StyleRule::new()
                        .input(props::ADDITIONAL, StyleValue::String("intermittent=yes".into()))
                        .output(props::COLOR, StyleValue::Color(0xff80_80ff)),
                )
                .switch(StyleRule::new().output(props::COLOR, StyleValue::Color(0xff00_00ff))),
        );
        let mut style = builder.build();

        let plain = evaluate(&style, RuleSet::Polygon, "natural", "water", 12).unwrap();
        assert_eq!(plain.color(props::COLOR), Some(0xff00_00ff));

        let mut evaluator = StyleEvaluator::new(&style);
        evaluator
            .set_tag_value("natural", "water")
            .set_zoom(12)
            .set_additional([("intermittent", "yes")]);
        let intermittent = evaluator.evaluate(RuleSet::Polygon).unwrap();
        assert_eq!(intermittent.color(props::COLOR), Some(0xff80_80ff));

        style.set_parameter("nightMode", StyleValue::Bool(true)).unwrap();
        let dark = evaluate(&style, RuleSet::Polygon, "natural", "water", 12).unwrap();
        assert_eq!(dark.color(props::COLOR), Some(0xff00_0020));
    }

    #[test]
    fn test_render_attributes() {
        let style = Style::from_json(
            r##"{
              "attributes": [
                { "name": "defaultColor", "rules": [ { "outputs": { "attrColorValue": "#f1eee8" } } ] },
                { "name": "roadsDensityLimitPerTile", "rules": [
                    { "inputs": { "minzoom": 14 }, "outputs": { "attrIntValue": 0 } },
                    { "outputs": { "attrIntValue": 12 } }
                ] }
              ]
            }"##,
        )
        .unwrap();
        let mut evaluator = StyleEvaluator::new(&style);
        assert_eq!(evaluator.attribute_color("defaultColor"), Some(0xfff1_eee8));
        evaluator.set_zoom(12);
        assert_eq!(evaluator.attribute_int("roadsDensityLimitPerTile"), Some(12));
        evaluator.set_zoom(15);
        assert_eq!(evaluator.attribute_int("roadsDensityLimitPerTile"), Some(0));
        assert_eq!(evaluator.attribute_int("missing"), None);
    }
}
