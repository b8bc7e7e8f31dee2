//! 字体选择
//!
//! 注册的字体按顺序尝试：先要求覆盖全部字形且粗斜体匹配，再放宽到只覆盖字形，
//! 最后落到系统回退字体。选择结果按 (字符块集合, 粗体, 斜体) 缓存。

use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

/// 平均字宽占字号的比例
pub const DEFAULT_ADVANCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct FontFace {
    pub name: Arc<str>,
    pub bold: bool,
    pub italic: bool,
    /// 支持的码位区间；为空表示全覆盖
    pub coverage: Vec<RangeInclusive<u32>>,
    pub advance: f64,
}

impl FontFace {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            bold: false,
            italic: false,
            coverage: Vec::new(),
            advance: DEFAULT_ADVANCE,
        }
    }

    pub fn bold(mut self, bold: bool) -> Self {
        self.bold = bold;
        self
    }

    pub fn italic(mut self, italic: bool) -> Self {
        self.italic = italic;
        self
    }

    pub fn covering(mut self, range: RangeInclusive<u32>) -> Self {
        self.coverage.push(range);
        self
    }

    pub fn supports(&self, c: char) -> bool {
        if c.is_whitespace() || self.coverage.is_empty() {
            return true;
        }
        let code = u32::from(c);
        self.coverage.iter().any(|r| r.contains(&code))
    }

    pub fn supports_text(&self, text: &str) -> bool {
        text.chars().all(|c| self.supports(c))
    }

    /// 单行文字宽度 (像素)
    pub fn measure(&self, text: &str, size: f64) -> f64 {
        let bold_factor = if self.bold { 1.1 } else { 1.0 };
        text.chars().count() as f64 * size * self.advance * bold_factor
    }
}

type FontKey = (Vec<u32>, bool, bool);

#[derive(Debug)]
pub struct FontRegistry {
    faces: Vec<Arc<FontFace>>,
    fallback: Arc<FontFace>,
    cache: Mutex<HashMap<FontKey, Arc<FontFace>>>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    /// 仅含系统回退字体
    pub fn new() -> Self {
        Self {
            faces: Vec::new(),
            fallback: Arc::new(FontFace::new("system-fallback")),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 覆盖拉丁、希腊与西里尔字母的常规体和粗体
    pub fn with_default_faces() -> Self {
        let mut registry = Self::new();
        for bold in [false, true] {
            registry.register(
                FontFace::new(if bold { "sans-bold" } else { "sans" })
                    .bold(bold)
                    .covering(0x0000..=0x024F)
                    .covering(0x0370..=0x03FF)
                    .covering(0x0400..=0x04FF)
                    .covering(0x2000..=0x206F),
            );
        }
        registry
    }

    pub fn register(&mut self, face: FontFace) {
        self.faces.push(Arc::new(face));
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn faces(&self) -> &[Arc<FontFace>] {
        &self.faces
    }

    /// 选出能显示全部字形的字体
    pub fn select(&self, text: &str, bold: bool, italic: bool) -> Arc<FontFace> {
        let blocks: BTreeSet<u32> = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| u32::from(c) >> 7)
            .collect();
        let key = (blocks.into_iter().collect::<Vec<_>>(), bold, italic);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(face) = cache.get(&key) {
            return face.clone();
        }

        let exact = self
            .faces
            .iter()
            .find(|f| f.bold == bold && f.italic == italic && f.supports_text(text));
        let face = exact
            .or_else(|| self.faces.iter().find(|f| f.bold == bold && f.supports_text(text)))
            .or_else(|| self.faces.iter().find(|f| f.supports_text(text)))
            .cloned()
            .unwrap_or_else(|| {
                tracing::debug!(text, "no registered font covers text, using fallback");
                self.fallback.clone()
            });
        cache.insert(key, face.clone());
        face
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_prefers_style_match() {
        let registry = FontRegistry::with_default_faces();
        assert_eq!(&*registry.select("Main Street", false, false).name, "sans");
        assert_eq!(&*registry.select("Main Street", true, false).name, "sans-bold");
        // 没有斜体，退到同粗细
        assert_eq!(&*registry.select("Main Street", true, true).name, "sans-bold");
    }

    #[test]
    fn test_select_falls_back_for_uncovered_glyphs() {
        let registry = FontRegistry::with_default_faces();
        assert_eq!(&*registry.select("東京", false, false).name, "system-fallback");
        assert_eq!(&*registry.select("Москва", false, false).name, "sans");
    }

    #[test]
    fn test_measure() {
        let face = FontFace::new("test");
        assert!((face.measure("abcd", 10.0) - 24.0).abs() < 1e-9);
    }
}
