//! 瓦片栅格化提供者
//!
//! 图元提供者之上的最后一层：取得瓦片图元，在后端分配的画布上栅格化，输出位图。
//! 画布边长为 `tile_size_px * density_factor`。

use crate::area::{TileId, ZoomLevel};
use crate::error::{ObfError, ObfResult};
use crate::primitives::PrimitivisedObjects;
use crate::primitives_provider::PrimitivesProvider;
use crate::query::{is_aborted, MapFoundationType, QueryController};
use crate::rasterizer::{
    Bitmap, RasterBackend, RasterStats, Rasterizer, RasterizerEnvironment, ResourceProvider,
};
use std::sync::Arc;

/// 一个栅格化完成的瓦片
#[derive(Debug, Clone)]
pub struct RasterizedTile {
    pub tile_id: TileId,
    pub zoom: ZoomLevel,
    pub foundation: MapFoundationType,
    pub bitmap: Bitmap,
    pub stats: RasterStats,
}

pub struct TileRasterProvider<B: RasterBackend> {
    primitives: Arc<PrimitivesProvider>,
    backend: B,
    environment: RasterizerEnvironment,
    canvas_size: u32,
}

impl<B: RasterBackend> TileRasterProvider<B> {
    pub fn new(
        primitives: Arc<PrimitivesProvider>,
        backend: B,
        resources: Arc<dyn ResourceProvider>,
    ) -> Self {
        let config = primitives.primitiviser().config();
        let canvas_size = (config.tile_size_px as f32 * config.density_factor).round().max(1.0) as u32;
        let environment = RasterizerEnvironment::new(config, resources);
        Self {
            primitives,
            backend,
            environment,
            canvas_size,
        }
    }

    pub fn primitives_provider(&self) -> &Arc<PrimitivesProvider> {
        &self.primitives
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn environment(&self) -> &RasterizerEnvironment {
        &self.environment
    }

    pub fn canvas_size(&self) -> u32 {
        self.canvas_size
    }

    /// 在新分配的画布上栅格化一组图元
    pub fn render_canvas(
        &self,
        primitives: &PrimitivisedObjects,
    ) -> ObfResult<(B::Canvas, RasterStats)> {
        let mut canvas = self.backend.create_canvas(self.canvas_size, self.canvas_size)?;
        let stats = Rasterizer::new(&self.environment).rasterize(&mut canvas, primitives);
        Ok((canvas, stats))
    }

    pub fn obtain_data(
        &self,
        tile_id: TileId,
        zoom: ZoomLevel,
        controller: Option<&dyn QueryController>,
    ) -> ObfResult<RasterizedTile> {
        let tile = self.primitives.obtain_data(tile_id, zoom, controller)?;
        if is_aborted(controller) {
            return Err(ObfError::Cancelled);
        }
        let (canvas, stats) = self.render_canvas(&tile.primitives)?;
        if is_aborted(controller) {
            return Err(ObfError::Cancelled);
        }
        tracing::debug!(
            ?tile_id,
            zoom,
            backend = self.backend.name(),
            polygons = stats.polygons,
            polylines = stats.polylines,
            texts = stats.texts_drawn,
            "tile rendered"
        );
        Ok(RasterizedTile {
            tile_id,
            zoom,
            foundation: tile.primitives.foundation,
            bitmap: self.backend.finish(canvas),
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::query::CancellationFlag;
    use crate::rasterizer::{MapResources, Rgba8, SoftwareBackend};
    use crate::test_support::sample_primitives_provider;

    const ZOOM: ZoomLevel = 16;

    fn provider(config: RenderConfig, backend: SoftwareBackend) -> TileRasterProvider<SoftwareBackend> {
        TileRasterProvider::new(
            Arc::new(sample_primitives_provider(config)),
            backend,
            Arc::new(MapResources::new()),
        )
    }

    #[test]
    fn test_render_tile_from_obf() {
        let provider = provider(RenderConfig::default(), SoftwareBackend::new());
        let tile = provider.obtain_data(TileId::new(0, 0), ZOOM, None).unwrap();

        assert_eq!(tile.bitmap.width(), 256);
        assert_eq!(tile.bitmap.height(), 256);
        assert_eq!(tile.foundation, MapFoundationType::FullLand);
        // 陆地底色 + 水面
        assert_eq!(tile.stats.polygons, 2);
        assert_eq!(tile.stats.polylines, 1);
        assert_eq!(tile.bitmap.pixel(16, 16), Some(Rgba8::from_argb(0xff00_00ff)));
        assert_eq!(tile.bitmap.pixel(200, 200), Some(Rgba8::from_argb(0xfff0_f0e0)));
        // 道路在 y = 128 处
        assert_eq!(tile.bitmap.pixel(200, 128), Some(Rgba8::from_argb(0xffff_ffff)));
    }

    #[test]
    fn test_density_scales_canvas() {
        let config = RenderConfig {
            density_factor: 2.0,
            ..RenderConfig::default()
        };
        let provider = provider(config, SoftwareBackend::new());
        assert_eq!(provider.canvas_size(), 512);
        let tile = provider.obtain_data(TileId::new(0, 0), ZOOM, None).unwrap();
        assert_eq!(tile.bitmap.width(), 512);
        assert_eq!(tile.bitmap.pixel(32, 32), Some(Rgba8::from_argb(0xff00_00ff)));
    }

    #[test]
    fn test_surface_allocation_failure() {
        let provider = provider(RenderConfig::default(), SoftwareBackend::with_max_pixels(100));
        let result = provider.obtain_data(TileId::new(0, 0), ZOOM, None);
        assert!(matches!(result, Err(ObfError::SurfaceAllocation { .. })));
    }

    #[test]
    fn test_cancelled_render() {
        let provider = provider(RenderConfig::default(), SoftwareBackend::new());
        let flag = CancellationFlag::new();
        flag.abort();
        let result = provider.obtain_data(TileId::new(0, 0), ZOOM, Some(&flag as &dyn QueryController));
        assert!(matches!(result, Err(ObfError::Cancelled)));
    }
}
