//! 文字布局：折行、同名路段合并、沿路径放置

use crate::area::PointI;
use crate::primitives::TextSymbol;
use kurbo::{Point, Rect};
use std::collections::HashMap;

/// 合并同名路段的最大轮数
const MAX_COMBINE_ROUNDS: usize = 20;

/// 按字符数贪心折行；单词本身超长时独占一行
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_len = 0usize;
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if line_len > 0 && line_len + 1 + word_len > max_chars {
            lines.push(std::mem::take(&mut line));
            line_len = 0;
        }
        if line_len > 0 {
            line.push(' ');
            line_len += 1;
        }
        line.push_str(word);
        line_len += word_len;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn distance31(a: &PointI, b: &PointI) -> f64 {
    let dx = f64::from(a.x) - f64::from(b.x);
    let dy = f64::from(a.y) - f64::from(b.y);
    (dx * dx + dy * dy).sqrt()
}

fn path_length31(path: &[PointI]) -> f64 {
    path.windows(2).map(|w| distance31(&w[0], &w[1])).sum()
}

fn direction31(a: &PointI, b: &PointI) -> (f64, f64) {
    (f64::from(b.x) - f64::from(a.x), f64::from(b.y) - f64::from(a.y))
}

/// a 的末端能否接上 b 的起点
fn can_join(a: &[PointI], b: &[PointI], max_gap31: f64) -> bool {
    let (Some(end), Some(start)) = (a.last(), b.first()) else {
        return false;
    };
    if distance31(end, start) > max_gap31 || a.len() < 2 || b.len() < 2 {
        return false;
    }
    let da = direction31(&a[a.len() - 2], &a[a.len() - 1]);
    let db = direction31(&b[0], &b[1]);
    da.0 * db.0 + da.1 * db.1 > 0.0
}

/// 把首尾几乎相接、方向一致的同名路径文字合并成一条
///
/// 按 (文字, 顺序) 分组，每组各自最多合并 `MAX_COMBINE_ROUNDS` 轮。
/// 距离以 31 位坐标给出。合并后的路径不超过 `max_length31`。
pub fn combine_similar_texts(
    texts: Vec<TextSymbol>,
    max_gap31: f64,
    max_length31: f64,
) -> Vec<TextSymbol> {
    let (on_path, mut result): (Vec<TextSymbol>, Vec<TextSymbol>) =
        texts.into_iter().partition(TextSymbol::is_on_path);

    let mut buckets: Vec<Vec<TextSymbol>> = Vec::new();
    let mut bucket_of: HashMap<(String, i32), usize> = HashMap::new();
    for text in on_path {
        let slot = *bucket_of
            .entry((text.text.clone(), text.order))
            .or_insert_with(|| {
                buckets.push(Vec::new());
                buckets.len() - 1
            });
        buckets[slot].push(text);
    }
    for bucket in buckets {
        result.extend(combine_bucket(bucket, max_gap31, max_length31));
    }
    result
}

fn combine_bucket(
    mut texts: Vec<TextSymbol>,
    max_gap31: f64,
    max_length31: f64,
) -> Vec<TextSymbol> {
    for _ in 0..MAX_COMBINE_ROUNDS {
        let mut merged_any = false;
        let mut i = 0;
        while i < texts.len() {
            let candidate = (0..texts.len()).find(|&j| {
                j != i
                    && can_join(&texts[i].path31, &texts[j].path31, max_gap31)
                    && path_length31(&texts[i].path31) + path_length31(&texts[j].path31)
                        <= max_length31
            });
            let Some(j) = candidate else {
                i += 1;
                continue;
            };
            let tail = texts.remove(j);
            if j < i {
                i -= 1;
            }
            // 合并后留在 i，继续尝试接上后续路段
            let head = &mut texts[i];
            let skip = usize::from(head.path31.last() == tail.path31.first());
            head.path31.extend(tail.path31.iter().skip(skip).copied());
            head.location31 = head.path31[head.path31.len() / 2];
            merged_any = true;
        }
        if !merged_any {
            break;
        }
    }
    texts
}

/// 沿路径放置的结果
#[derive(Debug, Clone, PartialEq)]
pub struct PathPlacement {
    /// 文字实际占用的子路径 (已按阅读方向排列)
    pub points: Vec<Point>,
    pub bounds: Rect,
}

/// 在可见部分的中段放置宽 `text_width` 的文字
///
/// 可见路径短于 1.5 倍文字宽度或转角超过 90 度时放弃。
pub fn place_on_path(
    path: &[Point],
    text_width: f64,
    text_height: f64,
    visible: Rect,
) -> Option<PathPlacement> {
    let run = longest_visible_run(path, visible)?;
    let length = polyline_length(&run);
    if length < text_width * 1.5 || text_width <= 0.0 {
        return None;
    }
    let start = (length - text_width) / 2.0;
    let mut points = sub_path(&run, start, start + text_width);
    if points.len() < 2 {
        return None;
    }
    let sharp = points.windows(3).any(|w| {
        let a = w[1] - w[0];
        let b = w[2] - w[1];
        a.dot(b) < 0.0
    });
    if sharp {
        return None;
    }
    // 从右往左的路径翻转，避免文字倒置
    if points[points.len() - 1].x < points[0].x {
        points.reverse();
    }
    let first = points[0];
    let bounds = points
        .iter()
        .fold(Rect::from_points(first, first), |r, p| r.union_pt(*p))
        .inflate(text_height / 2.0, text_height / 2.0);
    Some(PathPlacement { points, bounds })
}

fn polyline_length(path: &[Point]) -> f64 {
    path.windows(2).map(|w| w[0].distance(w[1])).sum()
}

fn longest_visible_run(path: &[Point], visible: Rect) -> Option<Vec<Point>> {
    let mut best: Vec<Point> = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    for p in path {
        if visible.contains(*p) {
            current.push(*p);
        } else {
            if polyline_length(&current) > polyline_length(&best) {
                best = std::mem::take(&mut current);
            }
            current.clear();
        }
    }
    if polyline_length(&current) > polyline_length(&best) {
        best = current;
    }
    (best.len() >= 2).then_some(best)
}

/// 截取 [from, to] 距离区间的子路径
fn sub_path(path: &[Point], from: f64, to: f64) -> Vec<Point> {
    let mut result = Vec::new();
    let mut walked = 0.0;
    for w in path.windows(2) {
        let length = w[0].distance(w[1]);
        let seg_start = walked;
        let seg_end = walked + length;
        walked = seg_end;
        if length <= 0.0 || seg_end < from || seg_start > to {
            continue;
        }
        let t0 = ((from - seg_start) / length).clamp(0.0, 1.0);
        let t1 = ((to - seg_start) / length).clamp(0.0, 1.0);
        let p0 = w[0].lerp(w[1], t0);
        if result.last() != Some(&p0) {
            result.push(p0);
        }
        result.push(w[0].lerp(w[1], t1));
    }
    result
}
