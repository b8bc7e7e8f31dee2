//! 图标与盾牌位图资源

use super::canvas::{Bitmap, Rgba8};
use dashmap::DashMap;
use std::sync::Arc;

/// 按名称提供位图；缺失时返回 None，调用方降级为不画
pub trait ResourceProvider: Send + Sync {
    fn icon(&self, name: &str) -> Option<Arc<Bitmap>>;
    fn shield(&self, name: &str) -> Option<Arc<Bitmap>>;
}

/// 内存中的资源表
#[derive(Debug, Default)]
pub struct MapResources {
    icons: DashMap<String, Arc<Bitmap>>,
    shields: DashMap<String, Arc<Bitmap>>,
}

impl MapResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_icon(&self, name: &str, bitmap: Bitmap) {
        self.icons.insert(name.to_string(), Arc::new(bitmap));
    }

    pub fn add_shield(&self, name: &str, bitmap: Bitmap) {
        self.shields.insert(name.to_string(), Arc::new(bitmap));
    }

    /// 纯色方块图标，便于测试和占位
    pub fn add_solid_icon(&self, name: &str, size: u32, argb: u32) {
        self.add_icon(name, Bitmap::filled(size, size, Rgba8::from_argb(argb)));
    }

    pub fn icons_len(&self) -> usize {
        self.icons.len()
    }
}

impl ResourceProvider for MapResources {
    fn icon(&self, name: &str) -> Option<Arc<Bitmap>> {
        self.icons.get(name).map(|entry| entry.value().clone())
    }

    fn shield(&self, name: &str) -> Option<Arc<Bitmap>> {
        self.shields.get(name).map(|entry| entry.value().clone())
    }
}
