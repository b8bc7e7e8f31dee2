//! 瓦片地图对象提供者
//!
//! 每个 (瓦片, 缩放级别) 的对象集合只读取一次 (单飞缓存)。跨越瓦片边界的对象
//! 在同一缩放级别下的所有瓦片间共享同一份实例：
//!
//! 1. 读取过滤器里对跨界对象查询共享表：已存在则直接引用并跳过解码；
//!    正由其他瓦片生产则记下期货；否则做出承诺并解码。
//! 2. 读取结束后兑现自己的承诺，再等待期货。兑现先于等待，不会互相死锁。
//! 3. 被撤销的期货 (生产方取消或未产出该对象) 由本瓦片重新读取。
//!
//! 瓦片 Drop 时释放全部共享引用，并从瓦片缓存中摘除自身。

use crate::area::{AreaI, TileId, ZoomLevel};
use crate::cache::{
    Obtained, PromiseGuard, ReferenceLease, SharedFuture, SharedResourcesContainer,
    SingleFlightCache,
};
use crate::error::{ObfError, ObfResult};
use crate::map_object::{MapObject, ObfObjectId};
use crate::obfs_collection::{MapObjectFilter, ObfDataInterface};
use crate::query::{is_aborted, MapFoundationType, QueryController, QueryStats};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub type TileKey = (TileId, ZoomLevel);
pub type SharedObjectKey = (ObfObjectId, ZoomLevel);

type TileCache = SingleFlightCache<TileKey, MapObjectsTile>;
type SharedObjects = SharedResourcesContainer<SharedObjectKey, MapObject>;

/// 期货被撤销后重新读取的最大轮数
const MAX_RETRY_ROUNDS: usize = 2;

/// 对象可共享：具有真实 id 且包围盒超出瓦片
pub fn is_shareable(tile_bbox31: &AreaI, id: ObfObjectId, object_bbox31: &AreaI) -> bool {
    id.0 > 0 && !tile_bbox31.contains(object_bbox31)
}

/// 一个瓦片的对象集合
pub struct MapObjectsTile {
    pub tile_id: TileId,
    pub zoom: ZoomLevel,
    pub objects: Vec<Arc<MapObject>>,
    pub foundation: MapFoundationType,
    pub stats: QueryStats,
    /// 其中来自共享表的对象数
    pub shared_count: usize,
    pub detailed_data_missing: bool,
    _lease: ReferenceLease<SharedObjectKey, MapObject>,
    cache: Weak<TileCache>,
}

impl MapObjectsTile {
    pub fn bbox31(&self) -> AreaI {
        self.tile_id.bbox31(self.zoom)
    }
}

impl std::fmt::Debug for MapObjectsTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapObjectsTile")
            .field("tile_id", &self.tile_id)
            .field("zoom", &self.zoom)
            .field("objects", &self.objects.len())
            .field("foundation", &self.foundation)
            .field("shared_count", &self.shared_count)
            .finish()
    }
}

impl Drop for MapObjectsTile {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.detach(&(self.tile_id, self.zoom));
        }
    }
}

/// 单轮读取的产出
struct ReadRound {
    objects: Vec<Arc<MapObject>>,
    foundation: MapFoundationType,
    stats: QueryStats,
    detailed_data_missing: bool,
    /// 期货被撤销、需要重新读取的对象
    broken: HashSet<ObfObjectId>,
    shared_count: usize,
}

pub struct MapObjectsProvider {
    data: ObfDataInterface,
    tiles: Arc<TileCache>,
    shared: Arc<SharedObjects>,
    /// 共享对象的实际解码次数
    materialized: AtomicUsize,
}

impl MapObjectsProvider {
    pub fn new(data: ObfDataInterface) -> Self {
        Self {
            data,
            tiles: Arc::new(SingleFlightCache::new()),
            shared: Arc::new(SharedResourcesContainer::new()),
            materialized: AtomicUsize::new(0),
        }
    }

    pub fn data_interface(&self) -> &ObfDataInterface {
        &self.data
    }

    /// 取得瓦片对象；被取消时返回 `ObfError::Cancelled` 且结果不入缓存
    pub fn obtain_data(
        &self,
        tile_id: TileId,
        zoom: ZoomLevel,
        controller: Option<&dyn QueryController>,
    ) -> ObfResult<Arc<MapObjectsTile>> {
        self.tiles
            .obtain(&(tile_id, zoom), || self.load_tile(tile_id, zoom, controller))
    }

    /// 已缓存且仍被持有的瓦片
    pub fn cached(&self, tile_id: TileId, zoom: ZoomLevel) -> Option<Arc<MapObjectsTile>> {
        self.tiles.get(&(tile_id, zoom))
    }

    pub fn tile_load_count(&self) -> usize {
        self.tiles.load_count()
    }

    pub fn materialized_shared_count(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }

    pub fn shared_objects_len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_shared(&self, id: ObfObjectId, zoom: ZoomLevel) -> bool {
        self.shared.contains(&(id, zoom))
    }

    pub fn cached_tiles_len(&self) -> usize {
        self.tiles.len()
    }

    fn load_tile(
        &self,
        tile_id: TileId,
        zoom: ZoomLevel,
        controller: Option<&dyn QueryController>,
    ) -> ObfResult<Arc<MapObjectsTile>> {
        let mut lease = ReferenceLease::new(self.shared.clone());
        let first = self.read_round(tile_id, zoom, None, &mut lease, controller);
        if is_aborted(controller) {
            return Err(ObfError::Cancelled);
        }

        let ReadRound {
            mut objects,
            foundation,
            mut stats,
            detailed_data_missing,
            mut broken,
            mut shared_count,
        } = first;

        let mut round = 0;
        while !broken.is_empty() && round < MAX_RETRY_ROUNDS {
            round += 1;
            tracing::debug!(
                tile_x = tile_id.x,
                tile_y = tile_id.y,
                zoom,
                count = broken.len(),
                "re-reading objects of broken shared promises"
            );
            let retry = self.read_round(tile_id, zoom, Some(&broken), &mut lease, controller);
            if is_aborted(controller) {
                return Err(ObfError::Cancelled);
            }
            stats.merge(&retry.stats);
            shared_count += retry.shared_count;
            objects.extend(retry.objects);
            broken = retry.broken;
        }
        if !broken.is_empty() {
            tracing::warn!(
                tile_x = tile_id.x,
                tile_y = tile_id.y,
                zoom,
                count = broken.len(),
                "shared objects could not be obtained"
            );
        }

        tracing::debug!(
            tile_x = tile_id.x,
            tile_y = tile_id.y,
            zoom,
            objects = objects.len(),
            shared = shared_count,
            "map objects tile ready"
        );
        Ok(Arc::new(MapObjectsTile {
            tile_id,
            zoom,
            objects,
            foundation,
            stats,
            shared_count,
            detailed_data_missing,
            _lease: lease,
            cache: Arc::downgrade(&self.tiles),
        }))
    }

    /// 读取一轮；`only` 非空时只接受其中的对象
    fn read_round(
        &self,
        tile_id: TileId,
        zoom: ZoomLevel,
        only: Option<&HashSet<ObfObjectId>>,
        lease: &mut ReferenceLease<SharedObjectKey, MapObject>,
        controller: Option<&dyn QueryController>,
    ) -> ReadRound {
        let tile_bbox = tile_id.bbox31(zoom);
        let mut decisions: HashMap<ObfObjectId, bool> = HashMap::new();
        let mut referenced: Vec<Arc<MapObject>> = Vec::new();
        let mut futures: Vec<(SharedObjectKey, SharedFuture<MapObject>)> = Vec::new();
        let mut promises = PromiseGuard::new(&self.shared);

        let result = {
            let mut filter = |id: ObfObjectId, bbox31: &AreaI| -> bool {
                if let Some(only) = only {
                    if !only.contains(&id) {
                        return false;
                    }
                }
                if let Some(decided) = decisions.get(&id) {
                    return *decided;
                }
                let accept = if !is_shareable(&tile_bbox, id, bbox31) {
                    true
                } else {
                    let key = (id, zoom);
                    match self.shared.obtain_reference_or_future_or_make_promise(&key) {
                        Obtained::Reference(object) => {
                            lease.push(key);
                            referenced.push(object);
                            false
                        }
                        Obtained::Future(future) => {
                            futures.push((key, future));
                            false
                        }
                        Obtained::Promise => {
                            promises.add(key);
                            self.materialized.fetch_add(1, Ordering::Relaxed);
                            true
                        }
                    }
                };
                decisions.insert(id, accept);
                accept
            };
            self.data.load_map_objects(
                &tile_bbox,
                zoom,
                Some(&mut filter as MapObjectFilter<'_>),
                controller,
            )
        };

        let mut objects = result.objects;
        let mut shared_count = referenced.len();

        if is_aborted(controller) {
            drop(promises);
            // 期货已计入引用数，兑现后交给 lease 释放
            for (key, future) in futures {
                if future.wait().is_some() {
                    lease.push(key);
                }
            }
            return ReadRound {
                objects: Vec::new(),
                foundation: result.foundation,
                stats: result.stats,
                detailed_data_missing: result.detailed_data_missing,
                broken: HashSet::new(),
                shared_count: 0,
            };
        }

        // 先兑现自己的承诺
        for object in objects.iter_mut() {
            let key = (object.id, zoom);
            if promises.is_pending(&key) {
                if let Some(shared) = promises.fulfil(&key, object.clone()) {
                    lease.push(key);
                    shared_count += 1;
                    *object = shared;
                }
            }
        }
        // 未产出的对象 (被合并规则丢弃等)
        drop(promises);

        let mut broken = HashSet::new();
        for (key, future) in futures {
            match future.wait() {
                Some(object) => {
                    lease.push(key);
                    shared_count += 1;
                    objects.push(object);
                }
                None => {
                    broken.insert(key.0);
                }
            }
        }
        objects.extend(referenced);

        ReadRound {
            objects,
            foundation: result.foundation,
            stats: result.stats,
            detailed_data_missing: result.detailed_data_missing,
            broken,
            shared_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obf_file::ObfFile;
    use crate::obfs_collection::{ObfsCollection, ReaderSettings};
    use crate::query::CancellationFlag;
    use crate::test_support::{ObfBuilder, TestBox, TestMapObject};
    use std::sync::Barrier;
    use std::thread;

    const ZOOM: ZoomLevel = 16;
    const WATER_ID: i64 = 10;
    const ROAD_ID: i64 = 20;

    /// 瓦片 (0,0)、(1,0) @16 各宽 32768；道路横跨两者
    fn provider() -> MapObjectsProvider {
        let mut builder = ObfBuilder::new();
        builder.map_section("test", 14, 20).add_box(
            TestBox::leaf(AreaI::new(0, 0, 1 << 16, 1 << 16))
                .with_ocean(false)
                .with_object(TestMapObject::polygon(
                    WATER_ID,
                    &[("natural", "water")],
                    &[(1024, 1024), (4096, 1024), (4096, 4096), (1024, 4096), (1024, 1024)],
                ))
                .with_object(TestMapObject::line(
                    ROAD_ID,
                    &[("highway", "residential")],
                    &[(16384, 16384), (49152, 16384)],
                )),
        );
        let collection = ObfsCollection::new();
        collection.add_file(ObfFile::from_bytes("test.obf", builder.build()).unwrap());
        MapObjectsProvider::new(ObfDataInterface::new(
            Arc::new(collection),
            ReaderSettings::default(),
        ))
    }

    #[test]
    fn test_only_straddling_objects_are_shared() {
        let provider = provider();
        let tile = provider.obtain_data(TileId::new(0, 0), ZOOM, None).unwrap();
        assert_eq!(tile.objects.len(), 2);
        assert_eq!(tile.foundation, MapFoundationType::FullLand);
        assert!(!provider.is_shared(ObfObjectId(WATER_ID), ZOOM));
        assert!(provider.is_shared(ObfObjectId(ROAD_ID), ZOOM));
        assert_eq!(tile.shared_count, 1);
    }

    #[test]
    fn test_concurrent_requests_load_tile_once() {
        let provider = Arc::new(provider());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    provider.obtain_data(TileId::new(0, 0), ZOOM, None).unwrap()
                })
            })
            .collect();
        let tiles: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(provider.tile_load_count(), 1);
        assert!(tiles.iter().all(|t| Arc::ptr_eq(t, &tiles[0])));
    }

    #[test]
    fn test_straddling_object_is_decoded_once() {
        let provider = Arc::new(provider());
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [TileId::new(0, 0), TileId::new(1, 0)]
            .into_iter()
            .map(|tile_id| {
                let provider = provider.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    provider.obtain_data(tile_id, ZOOM, None).unwrap()
                })
            })
            .collect();
        let tiles: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(provider.materialized_shared_count(), 1);

        let road = |tile: &MapObjectsTile| {
            tile.objects
                .iter()
                .find(|o| o.id == ObfObjectId(ROAD_ID))
                .cloned()
                .unwrap()
        };
        assert!(Arc::ptr_eq(&road(&tiles[0]), &road(&tiles[1])));
        // 右侧瓦片不包含水体
        assert_eq!(tiles[1].objects.len(), 1);
    }

    #[test]
    fn test_dropping_tiles_releases_shared_objects() {
        let provider = provider();
        let left = provider.obtain_data(TileId::new(0, 0), ZOOM, None).unwrap();
        let right = provider.obtain_data(TileId::new(1, 0), ZOOM, None).unwrap();
        assert_eq!(provider.shared_objects_len(), 1);
        assert_eq!(provider.cached_tiles_len(), 2);
        drop(left);
        assert_eq!(provider.shared_objects_len(), 1);
        drop(right);
        assert_eq!(provider.shared_objects_len(), 0);
        assert_eq!(provider.cached_tiles_len(), 0);
    }

    #[test]
    fn test_cancelled_load_is_not_cached() {
        let provider = provider();
        let flag = CancellationFlag::new();
        flag.abort();
        let result = provider.obtain_data(TileId::new(0, 0), ZOOM, Some(&flag));
        assert!(matches!(result, Err(ObfError::Cancelled)));
        assert_eq!(provider.shared_objects_len(), 0);
        assert_eq!(provider.cached_tiles_len(), 0);

        let tile = provider.obtain_data(TileId::new(0, 0), ZOOM, None).unwrap();
        assert_eq!(tile.objects.len(), 2);
        assert_eq!(provider.tile_load_count(), 2);
    }

    #[test]
    fn test_shareability_rule() {
        let tile = TileId::new(0, 0).bbox31(ZOOM);
        let inside = AreaI::new(10, 10, 20, 20);
        let outside = AreaI::new(10, 10, 40000, 20);
        assert!(!is_shareable(&tile, ObfObjectId(5), &inside));
        assert!(is_shareable(&tile, ObfObjectId(5), &outside));
        assert!(!is_shareable(&tile, ObfObjectId(-5), &outside));
    }
}
