//! 异步渲染服务
//!
//! 渲染管线本身是同步阻塞的 (读文件、样式求值、栅格化)。服务把每个瓦片放进
//! `spawn_blocking`，并用信号量限制同时渲染的瓦片数。

use crate::area::{TileId, ZoomLevel};
use crate::error::ObfError;
use crate::query::{CancellationFlag, QueryController};
use crate::raster_provider::{RasterizedTile, TileRasterProvider};
use crate::rasterizer::RasterBackend;
use crate::types::{CacheStats, ServiceStats};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Default)]
struct Counters {
    rendered: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

pub struct TileRenderService<B: RasterBackend + 'static> {
    provider: Arc<TileRasterProvider<B>>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl<B: RasterBackend + 'static> Clone for TileRenderService<B> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            permits: Arc::clone(&self.permits),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<B: RasterBackend + 'static> TileRenderService<B> {
    /// 并发数取自配置的 `max_parallel_tiles` (至少 1)
    pub fn new(provider: TileRasterProvider<B>) -> Self {
        let parallel = provider
            .primitives_provider()
            .primitiviser()
            .config()
            .max_parallel_tiles
            .max(1);
        Self {
            provider: Arc::new(provider),
            permits: Arc::new(Semaphore::new(parallel)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn provider(&self) -> &Arc<TileRasterProvider<B>> {
        &self.provider
    }

    pub async fn render_tile(&self, tile_id: TileId, zoom: ZoomLevel) -> Result<RasterizedTile> {
        self.render_tile_with(tile_id, zoom, None).await
    }

    /// 渲染单个瓦片；`cancel` 被触发后渲染尽快以错误结束
    pub async fn render_tile_with(
        &self,
        tile_id: TileId,
        zoom: ZoomLevel,
        cancel: Option<Arc<CancellationFlag>>,
    ) -> Result<RasterizedTile> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("渲染服务已关闭")?;
        let provider = Arc::clone(&self.provider);

        let result = tokio::task::spawn_blocking(move || {
            let controller = cancel.as_deref().map(|flag| flag as &dyn QueryController);
            provider.obtain_data(tile_id, zoom, controller)
        })
        .await
        .context("渲染任务异常退出")?;

        match result {
            Ok(tile) => {
                self.counters.rendered.fetch_add(1, Ordering::Relaxed);
                Ok(tile)
            }
            Err(ObfError::Cancelled) => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                Err(ObfError::Cancelled).with_context(|| format!("瓦片渲染已取消: {:?}@{}", tile_id, zoom))
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?tile_id, zoom, error = %e, "tile render failed");
                Err(e).with_context(|| format!("瓦片渲染失败: {:?}@{}", tile_id, zoom))
            }
        }
    }

    /// 并发渲染一批瓦片，结果按输入顺序返回
    pub async fn render_tiles(
        &self,
        tiles: Vec<(TileId, ZoomLevel)>,
        cancel: Option<Arc<CancellationFlag>>,
    ) -> Vec<(TileId, ZoomLevel, Result<RasterizedTile>)> {
        let mut set = JoinSet::new();
        for (index, (tile_id, zoom)) in tiles.into_iter().enumerate() {
            let service = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = service.render_tile_with(tile_id, zoom, cancel).await;
                (index, tile_id, zoom, result)
            });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => tracing::error!(error = %e, "render task panicked"),
            }
        }
        results.sort_by_key(|(index, ..)| *index);
        results
            .into_iter()
            .map(|(_, tile_id, zoom, result)| (tile_id, zoom, result))
            .collect()
    }

    pub fn stats(&self) -> ServiceStats {
        let primitives = self.provider.primitives_provider();
        let objects = primitives.objects_provider();
        ServiceStats {
            backend: self.provider.backend().name(),
            tiles_rendered: self.counters.rendered.load(Ordering::Relaxed),
            tiles_failed: self.counters.failed.load(Ordering::Relaxed),
            tiles_cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            cache: CacheStats {
                cached_object_tiles: objects.cached_tiles_len(),
                object_tile_loads: objects.tile_load_count(),
                shared_objects: objects.shared_objects_len(),
                materialized_shared_objects: objects.materialized_shared_count(),
                shared_groups: primitives.shared_groups_len(),
                shared_groups_built: primitives.shared_groups_built(),
            },
        }
    }
}
