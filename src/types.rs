//! 公共类型定义
//!
//! 渲染服务对外暴露的统计快照 (DTO)

use serde::Serialize;

/// 各层缓存的占用情况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cached_object_tiles: usize,
    /// 实际读取数据文件的瓦片次数
    pub object_tile_loads: usize,
    pub shared_objects: usize,
    pub materialized_shared_objects: usize,
    pub shared_groups: usize,
    pub shared_groups_built: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub backend: &'static str,
    pub tiles_rendered: u64,
    pub tiles_failed: u64,
    pub tiles_cancelled: u64,
    pub cache: CacheStats,
}
