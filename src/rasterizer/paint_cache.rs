//! 虚线与单行箭头画笔缓存
//!
//! 多个栅格化线程共享同一份缓存，首次填充在互斥锁内完成。
//! 键为 (编码串, 缩放) 的哈希。

use super::canvas::{DashPattern, LineCap, StrokePaint};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// 单行箭头的间隔整体缩放
pub const ARROW_DENSITY: f64 = 1.0;
pub const DEFAULT_ONEWAY_COLOR: u32 = 0xff6c_70d5;

/// 正向箭头：(间隔, 线宽)，由细到粗叠出箭头形状
const ONEWAY_FORWARD: [(&str, f64); 4] = [
    ("0_12_10_152", 1.0),
    ("0_12_9_153", 2.0),
    ("0_18_2_154", 3.0),
    ("0_18_1_155", 4.0),
];

const ONEWAY_REVERSE: [(&str, f64); 4] = [
    ("0_12_10_152", 1.0),
    ("0_13_9_152", 2.0),
    ("0_14_2_158", 3.0),
    ("0_15_1_158", 4.0),
];

/// 解析 "5_5" 形式的虚线串；"a:b" 表示 a 随缩放、b 不随缩放
pub fn parse_dash_pattern(pattern: &str, scale: f64) -> Option<Vec<f64>> {
    let mut intervals = Vec::new();
    for part in pattern.split('_').filter(|p| !p.is_empty()) {
        let value = match part.split_once(':') {
            Some((scaled, fixed)) => {
                scaled.trim().parse::<f64>().ok()? * scale + fixed.trim().parse::<f64>().ok()?
            }
            None => part.trim().parse::<f64>().ok()? * scale,
        };
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        intervals.push(value);
    }
    if intervals.len() % 2 == 1 {
        let copy = intervals.clone();
        intervals.extend(copy);
    }
    (intervals.iter().sum::<f64>() > 0.0).then_some(intervals)
}

fn cache_key(pattern: &str, scale: f64) -> u64 {
    let mut hasher = DefaultHasher::new();
    pattern.hash(&mut hasher);
    scale.to_bits().hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Default)]
pub struct PaintCache {
    dashes: Mutex<HashMap<u64, Option<Arc<DashPattern>>>>,
}

impl PaintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得 (必要时解析) 虚线效果；无效串返回 None 且同样被缓存
    pub fn dash(&self, pattern: &str, scale: f64) -> Option<Arc<DashPattern>> {
        let key = cache_key(pattern, scale);
        let mut dashes = self.dashes.lock().unwrap_or_else(|e| e.into_inner());
        dashes
            .entry(key)
            .or_insert_with(|| {
                let parsed = parse_dash_pattern(pattern, scale);
                if parsed.is_none() {
                    tracing::warn!(pattern, "invalid dash pattern");
                }
                parsed.map(|intervals| Arc::new(DashPattern { intervals, phase: 0.0 }))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.dashes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 单行箭头的 4 支画笔
    pub fn oneway_paints(&self, reverse: bool, color: u32, scale: f64) -> Vec<StrokePaint> {
        let table = if reverse { &ONEWAY_REVERSE } else { &ONEWAY_FORWARD };
        table
            .iter()
            .map(|&(pattern, width)| StrokePaint {
                color,
                width: width * scale,
                cap: LineCap::Butt,
                dash: self.dash(pattern, scale * ARROW_DENSITY),
                blur: 0.0,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dash_pattern() {
        assert_eq!(parse_dash_pattern("5_5", 2.0), Some(vec![10.0, 10.0]));
        assert_eq!(parse_dash_pattern("4:1_2", 1.0), Some(vec![5.0, 2.0]));
        assert_eq!(parse_dash_pattern("3", 1.0), Some(vec![3.0, 3.0]));
        assert_eq!(parse_dash_pattern("0_0", 1.0), None);
        assert_eq!(parse_dash_pattern("a_b", 1.0), None);
    }

    #[test]
    fn test_dash_is_memoized() {
        let cache = PaintCache::new();
        let a = cache.dash("5_5", 1.0).unwrap();
        let b = cache.dash("5_5", 1.0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let _ = cache.dash("5_5", 2.0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_oneway_paints() {
        let cache = PaintCache::new();
        let paints = cache.oneway_paints(false, DEFAULT_ONEWAY_COLOR, 1.0);
        assert_eq!(paints.len(), 4);
        assert!(paints.iter().all(|p| p.dash.is_some()));
        assert_eq!(paints[3].width, 4.0);
    }
}
