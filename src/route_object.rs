//! 路网边 (RouteDataObject)
//!
//! 路网分区只做记录提取：点序列、类型规则、转向限制、点级类型与名称。
//! 派生属性 (单行方向、车道数、限速、海拔剖面、条件标签) 在对象上按需计算。
//!
//! 条件标签格式 (`*:conditional`)：
//!
//! ```text
//! maxspeed:conditional = 30 @ (Mo-Fr 07:00-19:00); 50 @ (Sa,Su)
//! ```

use crate::area::{AreaI, PointI};
use crate::map_object::{MapEncodingRule, MapEncodingRules, MapObject, MapObjectOrigin, ObfObjectId};
use crate::projection::distance31_m;
use std::sync::{Arc, OnceLock};

/// 转换为地图对象时作为主类型的 tag
const MAIN_TYPE_TAGS: [&str; 5] = ["highway", "route", "railway", "aeroway", "aerialway"];

const KMH_PER_MPH: f32 = 1.609_344;
const KMH_PER_KNOT: f32 = 1.852;
/// maxspeed=none 的取值
const NO_SPEED_LIMIT_KMH: f32 = 140.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTypeRule {
    pub id: u32,
    pub tag: String,
    pub value: String,
}

impl RouteTypeRule {
    pub fn is_conditional(&self) -> bool {
        self.tag.ends_with(":conditional")
    }
}

/// 路网分区字典
#[derive(Debug, Default)]
pub struct RouteEncodingRules {
    rules: Vec<Option<RouteTypeRule>>,
    map_encoding: OnceLock<Arc<MapEncodingRules>>,
}

impl RouteEncodingRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: RouteTypeRule) {
        let id = rule.id as usize;
        if self.rules.len() <= id {
            self.rules.resize(id + 1, None);
        }
        self.rules[id] = Some(rule);
    }

    #[inline]
    pub fn rule(&self, id: u32) -> Option<&RouteTypeRule> {
        self.rules.get(id as usize).and_then(|r| r.as_ref())
    }

    pub fn find(&self, tag: &str, value: &str) -> Option<u32> {
        self.rules
            .iter()
            .flatten()
            .find(|r| r.tag == tag && r.value == value)
            .map(|r| r.id)
    }

    pub fn len(&self) -> usize {
        self.rules.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 同 id 的地图字典，供路网边转换为地图对象
    pub fn map_encoding(&self) -> Arc<MapEncodingRules> {
        self.map_encoding
            .get_or_init(|| {
                let mut map = MapEncodingRules::new();
                for rule in self.rules.iter().flatten() {
                    map.add_rule(MapEncodingRule {
                        id: rule.id,
                        tag: rule.tag.clone(),
                        value: rule.value.clone(),
                        min_zoom: 0,
                        rule_type: 0,
                    });
                }
                map.finalize();
                Arc::new(map)
            })
            .clone()
    }
}

/// 字典的归属：来自分区 (共享) 或随对象独立持有
#[derive(Debug, Clone)]
pub enum RouteRulesRef {
    Section(Arc<RouteEncodingRules>),
    Detached(Arc<RouteEncodingRules>),
}

impl RouteRulesRef {
    pub fn get(&self) -> &RouteEncodingRules {
        match self {
            RouteRulesRef::Section(rules) | RouteRulesRef::Detached(rules) => rules,
        }
    }

    pub fn shared(&self) -> Arc<RouteEncodingRules> {
        match self {
            RouteRulesRef::Section(rules) | RouteRulesRef::Detached(rules) => rules.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionKind {
    NoRightTurn,
    NoLeftTurn,
    NoUTurn,
    NoStraightOn,
    OnlyRightTurn,
    OnlyLeftTurn,
    OnlyStraightOn,
    Unknown(u32),
}

impl RestrictionKind {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => RestrictionKind::NoRightTurn,
            2 => RestrictionKind::NoLeftTurn,
            3 => RestrictionKind::NoUTurn,
            4 => RestrictionKind::NoStraightOn,
            5 => RestrictionKind::OnlyRightTurn,
            6 => RestrictionKind::OnlyLeftTurn,
            7 => RestrictionKind::OnlyStraightOn,
            other => RestrictionKind::Unknown(other),
        }
    }
}

/// 转向限制 (from 为所属对象)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restriction {
    pub to: i64,
    pub via: Option<i64>,
    pub kind: RestrictionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointName {
    pub point_index: usize,
    pub rule_id: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct RouteDataObject {
    pub id: i64,
    pub rules: RouteRulesRef,
    pub points31: Vec<PointI>,
    pub types: Vec<u32>,
    /// 每个点的附加类型 (可能短于点数)
    pub point_types: Vec<Vec<u32>>,
    pub point_names: Vec<PointName>,
    /// (规则 id, 文本)
    pub names: Vec<(u32, String)>,
    pub restrictions: Vec<Restriction>,
}

impl RouteDataObject {
    pub fn rules(&self) -> &RouteEncodingRules {
        self.rules.get()
    }

    pub fn bbox31(&self) -> Option<AreaI> {
        AreaI::from_points(&self.points31)
    }

    pub fn type_rules(&self) -> impl Iterator<Item = &RouteTypeRule> + '_ {
        let rules = self.rules();
        self.types.iter().filter_map(move |&id| rules.rule(id))
    }

    fn value_of(&self, tag: &str) -> Option<&str> {
        self.type_rules()
            .find(|r| r.tag == tag)
            .map(|r| r.value.as_str())
    }

    /// 1 正向单行，-1 反向单行，0 双向
    pub fn oneway(&self) -> i32 {
        for rule in self.type_rules() {
            match (rule.tag.as_str(), rule.value.as_str()) {
                ("oneway", "yes") | ("oneway", "1") | ("oneway", "true") => return 1,
                ("oneway", "-1") | ("oneway", "reverse") => return -1,
                ("junction", "roundabout") => return 1,
                _ => {}
            }
        }
        0
    }

    pub fn is_roundabout(&self) -> bool {
        self.type_rules()
            .any(|r| r.tag == "junction" && r.value == "roundabout")
    }

    pub fn lanes(&self) -> Option<u32> {
        self.value_of("lanes").and_then(|v| v.trim().parse().ok())
    }

    /// 限速 (km/h)，方向相关的取值优先
    pub fn maximum_speed(&self, forward: bool) -> Option<f32> {
        let directional = if forward {
            "maxspeed:forward"
        } else {
            "maxspeed:backward"
        };
        self.value_of(directional)
            .or_else(|| self.value_of("maxspeed"))
            .and_then(parse_speed)
    }

    /// 在给定时刻生效的条件标签 (去掉 `:conditional` 后缀)
    pub fn conditional_tags(&self, at: &ConditionalTime) -> Vec<(String, String)> {
        self.type_rules()
            .filter(|r| r.is_conditional())
            .filter_map(|r| {
                let base = r.tag.trim_end_matches(":conditional");
                resolve_conditional(&r.value, at).map(|v| (base.to_string(), v))
            })
            .collect()
    }

    /// 在给定时刻的完整标签集合：条件标签覆盖同名基础标签
    pub fn resolve_tags(&self, at: &ConditionalTime) -> Vec<(String, String)> {
        let overrides = self.conditional_tags(at);
        let mut tags: Vec<(String, String)> = self
            .type_rules()
            .filter(|r| !r.is_conditional())
            .map(|r| {
                let value = overrides
                    .iter()
                    .find(|(t, _)| *t == r.tag)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| r.value.clone());
                (r.tag.clone(), value)
            })
            .collect();
        for (tag, value) in overrides {
            if !tags.iter().any(|(t, _)| *t == tag) {
                tags.push((tag, value));
            }
        }
        tags
    }

    /// 海拔剖面：(累计距离 m, 海拔 m)
    ///
    /// 起始海拔来自 `osmand_ele_start`，逐点的升降来自点类型 `osmand_ele_asc` / `osmand_ele_desc`。
    pub fn height_profile(&self) -> Option<Vec<(f64, f64)>> {
        let start: f64 = self.value_of("osmand_ele_start")?.parse().ok()?;
        let rules = self.rules();
        let mut height = start;
        let mut distance = 0.0;
        let mut profile = Vec::with_capacity(self.points31.len());
        profile.push((0.0, start));
        for i in 1..self.points31.len() {
            distance += distance31_m(&self.points31[i - 1], &self.points31[i]);
            if let Some(types) = self.point_types.get(i) {
                for rule in types.iter().filter_map(|&id| rules.rule(id)) {
                    let delta: f64 = rule.value.parse().unwrap_or(0.0);
                    match rule.tag.as_str() {
                        "osmand_ele_asc" => height += delta,
                        "osmand_ele_desc" => height -= delta,
                        _ => {}
                    }
                }
            }
            profile.push((distance, height));
        }
        Some(profile)
    }

    pub fn name(&self) -> Option<&str> {
        let rules = self.rules();
        self.names.iter().find_map(|(id, text)| {
            rules
                .rule(*id)
                .filter(|r| r.tag == "name")
                .map(|_| text.as_str())
        })
    }

    /// 转换为地图对象 (仅含路网的文件)
    pub fn to_map_object(&self) -> MapObject {
        let encoding = self.rules().map_encoding();
        let (mut main, mut additional) = (Vec::new(), Vec::new());
        for rule in self.type_rules() {
            if MAIN_TYPE_TAGS.contains(&rule.tag.as_str()) {
                main.push(rule.id);
            } else {
                additional.push(rule.id);
            }
        }
        let mut object = MapObject::new(
            ObfObjectId(self.id),
            MapObjectOrigin::RoadOnly,
            encoding,
            self.points31.clone(),
            main,
        );
        object.additional_type_ids = additional;
        object.captions = self.names.clone();
        object
    }
}

fn parse_speed(value: &str) -> Option<f32> {
    let value = value.trim();
    if value == "none" {
        return Some(NO_SPEED_LIMIT_KMH);
    }
    let number_end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let number: f32 = value[..number_end].parse().ok()?;
    let unit = value[number_end..].trim();
    match unit {
        "" | "km/h" | "kmh" => Some(number),
        "mph" => Some(number * KMH_PER_MPH),
        "knots" => Some(number * KMH_PER_KNOT),
        _ => None,
    }
}

// ============================================================================
// 条件时间
// ============================================================================

/// 求值时刻：星期 (0 = 周一) + 当天分钟数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalTime {
    pub weekday: u8,
    pub minutes: u16,
}

impl ConditionalTime {
    pub fn new(weekday: u8, hour: u8, minute: u8) -> Self {
        Self {
            weekday: weekday % 7,
            minutes: u16::from(hour) * 60 + u16::from(minute),
        }
    }
}

const WEEKDAYS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];

/// 解析 `value @ (condition); value @ (condition)`，返回第一个生效的取值
pub fn resolve_conditional(conditional: &str, at: &ConditionalTime) -> Option<String> {
    conditional.split(';').find_map(|part| {
        let (value, condition) = part.split_once('@')?;
        let condition = condition.trim().trim_start_matches('(').trim_end_matches(')');
        if condition_matches(condition, at) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

fn condition_matches(condition: &str, at: &ConditionalTime) -> bool {
    let mut day_ok = None;
    let mut time_ok = None;
    for token in condition.split_whitespace() {
        if token.contains(':') {
            let hit = token
                .split(',')
                .filter_map(parse_time_range)
                .any(|(from, to)| {
                    if from <= to {
                        at.minutes >= from && at.minutes < to
                    } else {
                        at.minutes >= from || at.minutes < to
                    }
                });
            time_ok = Some(time_ok.unwrap_or(false) || hit);
        } else {
            match parse_day_mask(token) {
                Some(mask) => {
                    let hit = mask & (1 << at.weekday) != 0;
                    day_ok = Some(day_ok.unwrap_or(false) || hit);
                }
                None => return false,
            }
        }
    }
    if day_ok.is_none() && time_ok.is_none() {
        return false;
    }
    day_ok.unwrap_or(true) && time_ok.unwrap_or(true)
}

fn parse_day(token: &str) -> Option<u8> {
    WEEKDAYS.iter().position(|d| *d == token).map(|i| i as u8)
}

fn parse_day_mask(token: &str) -> Option<u8> {
    let mut mask = 0u8;
    for part in token.split(',') {
        match part.split_once('-') {
            Some((from, to)) => {
                let (from, to) = (parse_day(from)?, parse_day(to)?);
                let mut d = from;
                loop {
                    mask |= 1 << d;
                    if d == to {
                        break;
                    }
                    d = (d + 1) % 7;
                }
            }
            None => mask |= 1 << parse_day(part)?,
        }
    }
    Some(mask)
}

fn parse_time_range(token: &str) -> Option<(u16, u16)> {
    let (from, to) = token.split_once('-')?;
    Some((parse_clock(from)?, parse_clock(to)?))
}

fn parse_clock(token: &str) -> Option<u16> {
    let (h, m) = token.trim().split_once(':')?;
    let (h, m): (u16, u16) = (h.parse().ok()?, m.parse().ok()?);
    (h <= 24 && m < 60).then_some(h * 60 + m)
}
