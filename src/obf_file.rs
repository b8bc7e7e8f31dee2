//! OBF 文件容器
//!
//! 顶层结构 (OsmAndStructure)：
//!
//! ```text
//! 1  version          必须等于 MAP_VERSION
//! 18 dateCreated
//! 4  transportIndex   ┐
//! 6  mapIndex         │ 各分区均以 4 字节大端长度前缀
//! 7  addressIndex     │
//! 8  poiIndex         │
//! 9  routingIndex     ┘
//! 32 versionConfirm   必须等于 version，缺失视为文件损坏
//! ```
//!
//! 打开时只做结构扫描 (分区名称、偏移、层级边界)，字典与树节点在首次查询时解析。

use crate::area::AreaI;
use crate::error::{ObfError, ObfResult};
use crate::map_object::MapObjectOrigin;
use crate::map_section::MapSection;
use crate::obf_codec::{tag_field, CodedInput};
use crate::route_section::RouteSection;
use crate::sidecar::StoredFileInfo;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// 支持的地图格式版本
pub const MAP_VERSION: u32 = 2;

mod field {
    pub const VERSION: u32 = 1;
    pub const DATE_CREATED: u32 = 18;
    pub const TRANSPORT_INDEX: u32 = 4;
    pub const MAP_INDEX: u32 = 6;
    pub const ADDRESS_INDEX: u32 = 7;
    pub const POI_INDEX: u32 = 8;
    pub const ROUTING_INDEX: u32 = 9;
    pub const VERSION_CONFIRM: u32 = 32;
}

pub(crate) use field::*;

/// 未解析内容的分区种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionKind {
    Transport,
    Address,
    Poi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInfo {
    pub kind: SectionKind,
    pub offset: usize,
    pub length: usize,
}

pub struct ObfFile {
    pub name: String,
    pub file_size: u64,
    pub version: u32,
    pub date_created: i64,
    pub map_sections: Vec<Arc<MapSection>>,
    pub route_sections: Vec<Arc<RouteSection>>,
    pub other_sections: Vec<SectionInfo>,
    data: Arc<[u8]>,
}

impl std::fmt::Debug for ObfFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObfFile")
            .field("name", &self.name)
            .field("file_size", &self.file_size)
            .field("version", &self.version)
            .field("map_sections", &self.map_sections)
            .field("route_sections", &self.route_sections)
            .finish()
    }
}

impl ObfFile {
    /// 从磁盘打开并扫描结构
    pub fn open(path: impl AsRef<Path>) -> Result<ObfFile> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("无法打开 OBF 文件: {:?}", path))?;
        let name = file_name_of(path);
        Self::from_bytes(name, bytes).with_context(|| format!("无法解析 OBF 文件: {:?}", path))
    }

    /// 使用 sidecar 索引中的结构描述打开，跳过结构扫描
    ///
    /// 文件大小与索引记录不一致时回退到完整扫描。
    pub fn open_with_index(path: impl AsRef<Path>, info: Option<&StoredFileInfo>) -> Result<ObfFile> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("无法打开 OBF 文件: {:?}", path))?;
        let name = file_name_of(path);
        match info {
            Some(info) if info.file_size == bytes.len() as u64 && info.name == name => {
                tracing::debug!(file = %name, "structure restored from stored index");
                Ok(Self::from_stored(bytes, info))
            }
            _ => Self::from_bytes(name, bytes)
                .with_context(|| format!("无法解析 OBF 文件: {:?}", path)),
        }
    }

    /// 从内存字节扫描结构
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> ObfResult<ObfFile> {
        let name = name.into();
        let data: Arc<[u8]> = Arc::from(bytes);
        let mut file = ObfFile {
            file_size: data.len() as u64,
            name,
            version: 0,
            date_created: 0,
            map_sections: Vec::new(),
            route_sections: Vec::new(),
            other_sections: Vec::new(),
            data: data.clone(),
        };
        let origin = file.map_origin();
        let mut input = CodedInput::new(&data);
        let mut confirm = None;
        loop {
            let tag = input.read_tag()?;
            match tag_field(tag) {
                0 => break,
                VERSION => {
                    file.version = input.read_varint32()?;
                    if file.version != MAP_VERSION {
                        tracing::error!(
                            file = %file.name,
                            found = file.version,
                            expected = MAP_VERSION,
                            "unsupported map version"
                        );
                        return Err(ObfError::VersionMismatch {
                            found: file.version,
                            expected: MAP_VERSION,
                        });
                    }
                }
                DATE_CREATED => file.date_created = input.read_int64()?,
                MAP_INDEX => {
                    let section = MapSection::read_structure(&data, &mut input, origin)?;
                    file.map_sections.push(Arc::new(section));
                }
                ROUTING_INDEX => {
                    let section = RouteSection::read_structure(&data, &mut input)?;
                    file.route_sections.push(Arc::new(section));
                }
                TRANSPORT_INDEX | ADDRESS_INDEX | POI_INDEX => {
                    let kind = match tag_field(tag) {
                        TRANSPORT_INDEX => SectionKind::Transport,
                        ADDRESS_INDEX => SectionKind::Address,
                        _ => SectionKind::Poi,
                    };
                    let (offset, length, old) = input.enter_fixed32_message()?;
                    input.seek(offset + length)?;
                    input.pop_limit(old);
                    file.other_sections.push(SectionInfo {
                        kind,
                        offset,
                        length,
                    });
                }
                VERSION_CONFIRM => {
                    confirm = Some(input.read_varint32()?);
                    break;
                }
                _ => input.skip_field(tag)?,
            }
        }
        if confirm != Some(file.version) {
            let confirm = confirm.unwrap_or(0);
            tracing::error!(
                file = %file.name,
                version = file.version,
                confirm,
                "corrupted file: version confirmation mismatch"
            );
            return Err(ObfError::VersionConfirmMismatch {
                version: file.version,
                confirm,
            });
        }
        tracing::info!(
            file = %file.name,
            map_sections = file.map_sections.len(),
            route_sections = file.route_sections.len(),
            "obf file opened"
        );
        Ok(file)
    }

    /// 由 sidecar 记录直接构建
    pub fn from_stored(bytes: Vec<u8>, info: &StoredFileInfo) -> ObfFile {
        let data: Arc<[u8]> = Arc::from(bytes);
        let mut file = ObfFile {
            name: info.name.clone(),
            file_size: data.len() as u64,
            version: info.version,
            date_created: info.date_created,
            map_sections: Vec::new(),
            route_sections: Vec::new(),
            other_sections: Vec::new(),
            data: data.clone(),
        };
        let origin = file.map_origin();
        file.map_sections = info
            .map_sections
            .iter()
            .map(|s| {
                Arc::new(MapSection::from_stored(
                    &data,
                    s.name.clone(),
                    s.offset,
                    s.length,
                    origin,
                    &s.levels,
                ))
            })
            .collect();
        file.route_sections = info
            .route_sections
            .iter()
            .map(|s| Arc::new(RouteSection::from_stored(&data, s.name.clone(), s.offset, s.length)))
            .collect();
        file
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    /// 世界基础图 (文件名含 basemap)
    pub fn is_basemap(&self) -> bool {
        self.name.to_ascii_lowercase().contains("basemap")
    }

    /// 仅含路网的文件 (*.road.obf)
    pub fn is_road_only(&self) -> bool {
        self.name.to_ascii_lowercase().ends_with(".road.obf")
    }

    fn map_origin(&self) -> MapObjectOrigin {
        if self.is_basemap() {
            MapObjectOrigin::Basemap
        } else {
            MapObjectOrigin::Detailed
        }
    }

    pub fn bbox31(&self) -> Option<AreaI> {
        self.map_sections
            .iter()
            .filter_map(|s| s.bbox31())
            .chain(self.route_sections.iter().filter_map(|s| s.bbox31()))
            .reduce(|a, b| a.union(&b))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
