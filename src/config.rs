//! 渲染配置
//!
//! 所有字段都有默认值，JSON 中缺失的字段取默认。样式中定义了同名渲染属性时，
//! 样式的取值优先于这里的后备值。

use crate::area::ZoomLevel;
use crate::language::LanguagePreference;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub tile_size_px: u32,
    /// 设备像素密度
    pub density_factor: f32,
    pub text_scale: f32,
    pub map_scale: f32,

    pub locale_language: String,
    pub language_preference: LanguagePreference,

    /// 此级别及以下总是读取基础图
    pub basemap_zoom: ZoomLevel,
    /// 仅路网文件从此级别起参与渲染
    pub road_only_min_zoom: ZoomLevel,
    /// 此级别起优先使用详细数据中的海岸线
    pub detailed_land_data_zoom: ZoomLevel,
    /// 低于此级别时同 id 对象保留点数更多者
    pub dedup_detail_zoom: ZoomLevel,

    // 样式渲染属性的后备值
    pub polygon_min_size_to_display: f64,
    pub road_density_zoom_tile: i32,
    pub roads_density_limit_per_tile: u32,
    pub shadow_rendering_mode: i32,
    pub default_background_color: u32,

    pub default_text_wrap_chars: usize,

    pub stored_index_path: Option<PathBuf>,
    /// 批量渲染的并发瓦片数
    pub max_parallel_tiles: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tile_size_px: 256,
            density_factor: 1.0,
            text_scale: 1.0,
            map_scale: 1.0,
            locale_language: "en".to_string(),
            language_preference: LanguagePreference::default(),
            basemap_zoom: 11,
            road_only_min_zoom: 11,
            detailed_land_data_zoom: 14,
            dedup_detail_zoom: 13,
            polygon_min_size_to_display: 1.0,
            road_density_zoom_tile: 0,
            roads_density_limit_per_tile: 0,
            shadow_rendering_mode: 0,
            default_background_color: 0xfff1_eee8,
            default_text_wrap_chars: 20,
            stored_index_path: None,
            max_parallel_tiles: 4,
        }
    }
}

impl RenderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<RenderConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {:?}", path))?;
        Self::from_json_str(&text).with_context(|| format!("配置文件格式错误: {:?}", path))
    }

    pub fn from_json_str(text: &str) -> Result<RenderConfig> {
        let config: RenderConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    /// 线宽、图标等尺寸的总缩放
    pub fn scale(&self) -> f32 {
        self.density_factor * self.map_scale
    }

    /// 文字尺寸缩放
    pub fn text_scale_factor(&self) -> f32 {
        self.density_factor * self.text_scale
    }
}
