//! 打开文件的集合与统一数据接口
//!
//! 架构设计：
//! - DashMap 按文件 id 存放已打开的文件
//! - R-Tree 存放各分区的包围盒，查询时只访问相交的文件
//! - `ObfDataInterface` 在集合之上组装一次瓦片查询的结果：
//!   详细数据 / 基础图 / 仅路网文件分别读取，按 id 去重后合并

use crate::area::{AreaI, ZoomLevel};
use crate::config::RenderConfig;
use crate::map_object::{MapObject, ObfObjectId};
use crate::map_section::{MapObjectSink, MapQuery};
use crate::obf_file::ObfFile;
use crate::query::{is_aborted, MapFoundationType, OceanStats, QueryController, QueryStats};
use crate::route_section::RouteTreeKind;
use crate::sidecar::StoredIndex;
use anyhow::{Context, Result};
use dashmap::DashMap;
use rstar::{RTree, RTreeObject, AABB};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

pub type ObfFileId = u32;

/// R-Tree 中的分区包围盒
#[derive(Debug, Clone, Copy, PartialEq)]
struct SectionEntry {
    file_id: ObfFileId,
    bbox: AreaI,
}

impl RTreeObject for SectionEntry {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [i64::from(self.bbox.left), i64::from(self.bbox.top)],
            [i64::from(self.bbox.right), i64::from(self.bbox.bottom)],
        )
    }
}

pub struct ObfsCollection {
    files: DashMap<ObfFileId, Arc<ObfFile>>,
    index: RwLock<RTree<SectionEntry>>,
    next_id: AtomicU32,
}

impl Default for ObfsCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ObfsCollection {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            index: RwLock::new(RTree::new()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn add_file(&self, file: ObfFile) -> ObfFileId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entries = section_entries(id, &file);
        if entries.is_empty() {
            tracing::warn!(file = %file.name, "file has no indexed sections");
        }
        {
            let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
            for entry in entries {
                index.insert(entry);
            }
        }
        self.files.insert(id, Arc::new(file));
        id
    }

    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<ObfFileId> {
        let file = ObfFile::open(path)?;
        Ok(self.add_file(file))
    }

    /// 打开目录下全部 .obf 文件 (按文件名排序)
    ///
    /// 传入 sidecar 索引时优先使用其中的结构描述，并把新扫描的文件写回索引。
    /// 单个文件打开失败只记录日志。
    pub fn open_directory(
        &self,
        dir: impl AsRef<Path>,
        mut stored: Option<&mut StoredIndex>,
    ) -> Result<Vec<ObfFileId>> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("无法读取目录: {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("obf"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let info = stored
                .as_deref()
                .and_then(|index| index.find(&name, size))
                .cloned();
            match ObfFile::open_with_index(&path, info.as_ref()) {
                Ok(file) => {
                    if info.is_none() {
                        if let Some(index) = stored.as_deref_mut() {
                            index.update_from(&file);
                        }
                    }
                    ids.push(self.add_file(file));
                }
                Err(e) => tracing::error!(path = ?path, error = %format!("{:#}", e), "failed to open obf file"),
            }
        }
        Ok(ids)
    }

    pub fn remove_file(&self, id: ObfFileId) -> bool {
        if self.files.remove(&id).is_none() {
            return false;
        }
        let entries: Vec<SectionEntry> = self
            .files
            .iter()
            .flat_map(|f| section_entries(*f.key(), f.value()))
            .collect();
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = RTree::bulk_load(entries);
        true
    }

    pub fn file(&self, id: ObfFileId) -> Option<Arc<ObfFile>> {
        self.files.get(&id).map(|f| f.value().clone())
    }

    /// 与区域相交的文件，按 id 升序
    pub fn files_in_area(&self, area: &AreaI) -> Vec<Arc<ObfFile>> {
        let envelope = AABB::from_corners(
            [i64::from(area.left), i64::from(area.top)],
            [i64::from(area.right), i64::from(area.bottom)],
        );
        let mut ids: Vec<ObfFileId> = {
            let index = self.index.read().unwrap_or_else(|e| e.into_inner());
            index
                .locate_in_envelope_intersecting(&envelope)
                .map(|e| e.file_id)
                .collect()
        };
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().filter_map(|id| self.file(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn section_entries(id: ObfFileId, file: &ObfFile) -> Vec<SectionEntry> {
    file.map_sections
        .iter()
        .filter_map(|s| s.bbox31())
        .chain(file.route_sections.iter().filter_map(|s| s.bbox31()))
        .map(|bbox| SectionEntry { file_id: id, bbox })
        .collect()
}

// ============================================================================
// 数据接口
// ============================================================================

/// 一次查询的结果
#[derive(Debug, Default)]
pub struct MapObjectsQueryResult {
    pub objects: Vec<Arc<MapObject>>,
    pub foundation: MapFoundationType,
    pub stats: QueryStats,
    /// 区域内没有任何详细数据
    pub detailed_data_missing: bool,
}

/// 物化之前的筛选回调
pub type MapObjectFilter<'f> = &'f mut dyn FnMut(ObfObjectId, &AreaI) -> bool;

/// 按 id 去重的结果收集器
struct Publisher {
    zoom: ZoomLevel,
    dedup_detail_zoom: ZoomLevel,
    objects: Vec<Arc<MapObject>>,
    by_id: HashMap<ObfObjectId, usize>,
}

impl Publisher {
    fn new(zoom: ZoomLevel, dedup_detail_zoom: ZoomLevel) -> Self {
        Self {
            zoom,
            dedup_detail_zoom,
            objects: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// 同 id 对象：低于细节级别时保留点数更多者，否则保留第一次出现的
    fn publish_unique(&mut self, object: Arc<MapObject>) {
        if !object.id.is_deduplicatable() {
            self.objects.push(object);
            return;
        }
        match self.by_id.get(&object.id) {
            Some(&index) => {
                if self.zoom < self.dedup_detail_zoom
                    && object.points31.len() > self.objects[index].points31.len()
                {
                    self.objects[index] = object;
                }
            }
            None => {
                self.by_id.insert(object.id, self.objects.len());
                self.objects.push(object);
            }
        }
    }
}

struct FilteredSink<'a, 'f> {
    publisher: &'a mut Publisher,
    filter: Option<&'a mut (dyn FnMut(ObfObjectId, &AreaI) -> bool + 'f)>,
}

impl MapObjectSink for FilteredSink<'_, '_> {
    fn accept(&mut self, id: ObfObjectId, bbox31: &AreaI) -> bool {
        match self.filter.as_mut() {
            Some(filter) => filter(id, bbox31),
            None => true,
        }
    }

    fn publish(&mut self, object: Arc<MapObject>) {
        self.publisher.publish_unique(object);
    }
}

/// 读取参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    pub basemap_zoom: ZoomLevel,
    pub road_only_min_zoom: ZoomLevel,
    pub detailed_land_data_zoom: ZoomLevel,
    pub dedup_detail_zoom: ZoomLevel,
}

impl From<&RenderConfig> for ReaderSettings {
    fn from(config: &RenderConfig) -> Self {
        Self {
            basemap_zoom: config.basemap_zoom,
            road_only_min_zoom: config.road_only_min_zoom,
            detailed_land_data_zoom: config.detailed_land_data_zoom,
            dedup_detail_zoom: config.dedup_detail_zoom,
        }
    }
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

#[derive(Clone)]
pub struct ObfDataInterface {
    collection: Arc<ObfsCollection>,
    settings: ReaderSettings,
}

impl ObfDataInterface {
    pub fn new(collection: Arc<ObfsCollection>, settings: ReaderSettings) -> Self {
        Self {
            collection,
            settings,
        }
    }

    pub fn collection(&self) -> &Arc<ObfsCollection> {
        &self.collection
    }

    /// 读取区域内用于渲染的地图对象
    ///
    /// `filter` 在对象解码完成、物化之前调用；返回 false 的对象不进入结果。
    pub fn load_map_objects(
        &self,
        area31: &AreaI,
        zoom: ZoomLevel,
        mut filter: Option<MapObjectFilter<'_>>,
        controller: Option<&dyn QueryController>,
    ) -> MapObjectsQueryResult {
        let settings = &self.settings;
        let files = self.collection.files_in_area(area31);
        let query = MapQuery {
            area31: *area31,
            zoom,
            controller,
        };

        let mut detailed = Publisher::new(zoom, settings.dedup_detail_zoom);
        let mut basemap = Publisher::new(zoom, settings.dedup_detail_zoom);
        let mut roads = Publisher::new(zoom, settings.dedup_detail_zoom);
        let mut detailed_ocean = OceanStats::default();
        let mut basemap_ocean = OceanStats::default();
        let mut stats = QueryStats::default();
        let mut detailed_seen = false;

        for file in &files {
            if is_aborted(controller) {
                break;
            }
            if file.is_road_only() {
                if zoom < settings.road_only_min_zoom {
                    continue;
                }
                for section in &file.route_sections {
                    match section.load_route_objects(area31, RouteTreeKind::Detailed, controller) {
                        Ok((routes, route_stats)) => {
                            stats.merge(&route_stats);
                            for route in routes {
                                let id = ObfObjectId(route.id);
                                let keep = match route.bbox31() {
                                    Some(bbox) => filter.as_mut().map(|f| f(id, &bbox)).unwrap_or(true),
                                    None => false,
                                };
                                if keep {
                                    roads.publish_unique(Arc::new(route.to_map_object()));
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(file = %file.name, error = %e, "failed to read route section")
                        }
                    }
                }
                continue;
            }

            let is_basemap = file.is_basemap();
            for section in &file.map_sections {
                let publisher = if is_basemap { &mut basemap } else { &mut detailed };
                let mut sink = FilteredSink {
                    publisher,
                    filter: filter.as_deref_mut(),
                };
                match section.load_objects(&query, &mut sink) {
                    Ok(result) => {
                        stats.merge(&result.stats);
                        if is_basemap {
                            basemap_ocean.merge(&result.ocean);
                        } else {
                            detailed_ocean.merge(&result.ocean);
                            if result.stats.subtrees_accepted > 0 {
                                detailed_seen = true;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(file = %file.name, section = %section.name, error = %e, "failed to read map section")
                    }
                }
            }
        }

        let include_basemap = zoom <= settings.basemap_zoom
            || !detailed_seen
            || (!roads.objects.is_empty() && zoom < settings.dedup_detail_zoom);

        let detailed_has_coastline = detailed.objects.iter().any(|o| o.is_coastline());
        let use_detailed_coastlines =
            detailed_has_coastline && (zoom >= settings.detailed_land_data_zoom || !include_basemap);

        let mut objects: Vec<Arc<MapObject>> = Vec::with_capacity(
            detailed.objects.len() + basemap.objects.len() + roads.objects.len(),
        );
        let mut seen: HashSet<ObfObjectId> = HashSet::new();
        let mut push = |object: Arc<MapObject>, objects: &mut Vec<Arc<MapObject>>| {
            if !object.id.is_deduplicatable() || seen.insert(object.id) {
                objects.push(object);
            }
        };
        let basemap_has_coastline = basemap.objects.iter().any(|o| o.is_coastline());
        for object in detailed.objects {
            if object.is_coastline() && !use_detailed_coastlines && basemap_has_coastline {
                continue;
            }
            push(object, &mut objects);
        }
        for object in basemap.objects {
            if object.is_coastline() {
                if !use_detailed_coastlines {
                    push(object, &mut objects);
                }
            } else if include_basemap {
                push(object, &mut objects);
            }
        }
        for object in roads.objects {
            push(object, &mut objects);
        }

        let foundation = if detailed_ocean.tiles > 0 {
            detailed_ocean.foundation()
        } else {
            basemap_ocean.foundation()
        };
        tracing::debug!(
            files = files.len(),
            objects = objects.len(),
            subtrees_read = stats.subtrees_read,
            objects_accepted = stats.objects_accepted,
            foundation = ?foundation,
            "map objects loaded"
        );
        MapObjectsQueryResult {
            objects,
            foundation,
            stats,
            detailed_data_missing: !detailed_seen,
        }
    }
}
