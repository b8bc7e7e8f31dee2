//! 结构索引缓存 (sidecar)
//!
//! 把每个文件的分区偏移与层级边界保存为 JSON，下次启动时跳过结构扫描。
//! 以 (文件名, 文件大小) 识别记录，大小变化即视为失效。

use crate::map_section::MapLevelInfo;
use crate::obf_file::ObfFile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 索引格式版本，不一致时整个索引作废
pub const STORED_INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMapSection {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    pub levels: Vec<MapLevelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRouteSection {
    pub name: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileInfo {
    pub name: String,
    pub file_size: u64,
    pub date_created: i64,
    pub version: u32,
    pub map_sections: Vec<StoredMapSection>,
    pub route_sections: Vec<StoredRouteSection>,
}

impl StoredFileInfo {
    pub fn from_file(file: &ObfFile) -> Self {
        Self {
            name: file.name.clone(),
            file_size: file.file_size,
            date_created: file.date_created,
            version: file.version,
            map_sections: file
                .map_sections
                .iter()
                .map(|s| StoredMapSection {
                    name: s.name.clone(),
                    offset: s.offset,
                    length: s.length,
                    levels: s.level_infos(),
                })
                .collect(),
            route_sections: file
                .route_sections
                .iter()
                .map(|s| StoredRouteSection {
                    name: s.name.clone(),
                    offset: s.offset,
                    length: s.length,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIndex {
    pub version: u32,
    pub files: Vec<StoredFileInfo>,
}

impl Default for StoredIndex {
    fn default() -> Self {
        Self {
            version: STORED_INDEX_VERSION,
            files: Vec::new(),
        }
    }
}

impl StoredIndex {
    /// 读取索引；文件不存在或版本不符时返回空索引
    pub fn load(path: impl AsRef<Path>) -> Result<StoredIndex> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(StoredIndex::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取索引文件: {:?}", path))?;
        let index: StoredIndex = serde_json::from_str(&text)
            .with_context(|| format!("索引文件格式错误: {:?}", path))?;
        if index.version != STORED_INDEX_VERSION {
            tracing::warn!(
                found = index.version,
                expected = STORED_INDEX_VERSION,
                "stored index version changed, discarding"
            );
            return Ok(StoredIndex::default());
        }
        Ok(index)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("索引序列化失败")?;
        std::fs::write(path, text).with_context(|| format!("无法写入索引文件: {:?}", path))?;
        Ok(())
    }

    pub fn find(&self, name: &str, file_size: u64) -> Option<&StoredFileInfo> {
        self.files
            .iter()
            .find(|f| f.name == name && f.file_size == file_size)
    }

    /// 插入或替换同名记录
    pub fn upsert(&mut self, info: StoredFileInfo) {
        match self.files.iter_mut().find(|f| f.name == info.name) {
            Some(existing) => *existing = info,
            None => self.files.push(info),
        }
    }

    /// 记录一次完整扫描的结果
    pub fn update_from(&mut self, file: &ObfFile) {
        self.upsert(StoredFileInfo::from_file(file));
    }
}
