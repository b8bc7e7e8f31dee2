//! 瓦片图元提供者
//!
//! 在对象提供者之上做图元化。可共享对象 (真实 id 且超出瓦片边界) 的图元组按
//! (对象 id, 缩放级别) 在瓦片间共享：同一跨界对象在相邻瓦片中只求值一次样式。
//! 完全落在瓦片内的对象直接在本瓦片构建。共享协议与对象层相同，
//! 每个承诺在构建完成后立即兑现，期货统一放到最后等待。

use crate::area::{TileId, ZoomLevel};
use crate::cache::{Obtained, PromiseGuard, ReferenceLease, SharedFuture, SharedResourcesContainer};
use crate::error::{ObfError, ObfResult};
use crate::map_object::{MapObject, ObfObjectId};
use crate::map_objects_provider::{is_shareable, MapObjectsProvider, MapObjectsTile};
use crate::primitiviser::{Primitiviser, TileAttributes};
use crate::primitives::{PrimitivesGroup, PrimitivisedObjects, TileContext};
use crate::query::{is_aborted, QueryController};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub type SharedGroupKey = (ObfObjectId, ZoomLevel);
type SharedGroups = SharedResourcesContainer<SharedGroupKey, PrimitivesGroup>;

const OBJECTS_PER_ABORT_CHECK: usize = 64;

/// 一个瓦片的图元化结果，持有所用对象与共享图元组的引用
pub struct PrimitivisedTile {
    pub map_objects: Arc<MapObjectsTile>,
    pub primitives: PrimitivisedObjects,
    _lease: ReferenceLease<SharedGroupKey, PrimitivesGroup>,
}

impl PrimitivisedTile {
    pub fn tile_id(&self) -> TileId {
        self.map_objects.tile_id
    }

    pub fn zoom(&self) -> ZoomLevel {
        self.map_objects.zoom
    }
}

impl std::fmt::Debug for PrimitivisedTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitivisedTile")
            .field("tile_id", &self.map_objects.tile_id)
            .field("zoom", &self.map_objects.zoom)
            .field("polygons", &self.primitives.polygons.len())
            .field("polylines", &self.primitives.polylines.len())
            .field("points", &self.primitives.points.len())
            .finish()
    }
}

pub struct PrimitivesProvider {
    objects: Arc<MapObjectsProvider>,
    primitiviser: Arc<Primitiviser>,
    shared: Arc<SharedGroups>,
    /// 共享图元组的实际构建次数
    built: AtomicUsize,
}

impl PrimitivesProvider {
    pub fn new(objects: Arc<MapObjectsProvider>, primitiviser: Arc<Primitiviser>) -> Self {
        Self {
            objects,
            primitiviser,
            shared: Arc::new(SharedResourcesContainer::new()),
            built: AtomicUsize::new(0),
        }
    }

    pub fn objects_provider(&self) -> &Arc<MapObjectsProvider> {
        &self.objects
    }

    pub fn primitiviser(&self) -> &Arc<Primitiviser> {
        &self.primitiviser
    }

    pub fn shared_groups_len(&self) -> usize {
        self.shared.len()
    }

    pub fn shared_groups_built(&self) -> usize {
        self.built.load(Ordering::Relaxed)
    }

    pub fn obtain_data(
        &self,
        tile_id: TileId,
        zoom: ZoomLevel,
        controller: Option<&dyn QueryController>,
    ) -> ObfResult<PrimitivisedTile> {
        let map_objects = self.objects.obtain_data(tile_id, zoom, controller)?;
        let context = TileContext::new(tile_id, zoom, self.primitiviser.config().tile_size_px);
        let attributes = self.primitiviser.tile_attributes(zoom);
        let prepared =
            self.primitiviser
                .prepare_objects(&context, &map_objects.objects, map_objects.foundation);

        let mut lease = ReferenceLease::new(self.shared.clone());
        let groups = self.collect_groups(&context, &attributes, &prepared, &mut lease, controller)?;
        let primitives =
            self.primitiviser
                .assemble(&context, map_objects.foundation, &attributes, groups);

        tracing::debug!(
            tile = ?tile_id,
            zoom,
            shared = lease.len(),
            "tile primitivised"
        );
        Ok(PrimitivisedTile {
            map_objects,
            primitives,
            _lease: lease,
        })
    }

    fn collect_groups(
        &self,
        context: &TileContext,
        attributes: &TileAttributes,
        objects: &[Arc<MapObject>],
        lease: &mut ReferenceLease<SharedGroupKey, PrimitivesGroup>,
        controller: Option<&dyn QueryController>,
    ) -> ObfResult<Vec<Arc<PrimitivesGroup>>> {
        let build = |object: &Arc<MapObject>| {
            Arc::new(self.primitiviser.build_group(context, object, attributes))
        };
        let mut slots: Vec<Option<Arc<PrimitivesGroup>>> = Vec::with_capacity(objects.len());
        let mut futures: Vec<(usize, SharedGroupKey, SharedFuture<PrimitivesGroup>)> = Vec::new();
        let mut aborted = false;

        for (index, object) in objects.iter().enumerate() {
            if index % OBJECTS_PER_ABORT_CHECK == 0 && is_aborted(controller) {
                aborted = true;
                break;
            }
            if !is_shareable(&context.area31, object.id, &object.bbox31) {
                slots.push(Some(build(object)));
                continue;
            }
            let key = (object.id, context.zoom);
            match self.shared.obtain_reference_or_future_or_make_promise(&key) {
                Obtained::Reference(group) => {
                    lease.push(key);
                    slots.push(Some(group));
                }
                Obtained::Future(future) => {
                    futures.push((index, key, future));
                    slots.push(None);
                }
                Obtained::Promise => {
                    let mut promise = PromiseGuard::new(&self.shared);
                    promise.add(key);
                    let group = build(object);
                    self.built.fetch_add(1, Ordering::Relaxed);
                    let shared = promise.fulfil(&key, group.clone()).unwrap_or(group);
                    lease.push(key);
                    slots.push(Some(shared));
                }
            }
        }

        // 期货计入了引用，取消时也要等待并登记以便释放
        for (index, key, future) in futures {
            match future.wait() {
                Some(group) => {
                    lease.push(key);
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(group);
                    }
                }
                None if !aborted => {
                    if let (Some(slot), Some(object)) = (slots.get_mut(index), objects.get(index)) {
                        *slot = Some(build(object));
                    }
                }
                None => {}
            }
        }

        if aborted {
            return Err(ObfError::Cancelled);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}
