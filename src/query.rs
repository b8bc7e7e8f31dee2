//! 查询控制与统计
//!
//! - `QueryController`: 协作式取消标志，长时间遍历每隔若干对象轮询一次
//! - `QueryStats`: 单次查询的读取计数 (子树读取 / 接受、数据块、对象)
//! - `MapFoundationType`: 由空间树节点的 ocean 标志推断的底色类型

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// 协作式取消
pub trait QueryController: Send + Sync {
    fn is_aborted(&self) -> bool;
}

/// 基于原子布尔的取消标志
#[derive(Debug, Default)]
pub struct CancellationFlag {
    aborted: AtomicBool,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self {
            aborted: AtomicBool::new(false),
        }
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

impl QueryController for CancellationFlag {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

#[inline]
pub fn is_aborted(controller: Option<&dyn QueryController>) -> bool {
    controller.map(|c| c.is_aborted()).unwrap_or(false)
}

/// 单次查询的读取计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    /// 解析过包围盒的树节点数
    pub subtrees_read: u32,
    /// 与查询框相交并被接受的树节点数
    pub subtrees_accepted: u32,
    pub blocks_read: u32,
    pub objects_visited: u32,
    pub objects_accepted: u32,
}

impl QueryStats {
    pub fn merge(&mut self, other: &QueryStats) {
        self.subtrees_read += other.subtrees_read;
        self.subtrees_accepted += other.subtrees_accepted;
        self.blocks_read += other.blocks_read;
        self.objects_visited += other.objects_visited;
        self.objects_accepted += other.objects_accepted;
    }
}

/// 瓦片底色类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum MapFoundationType {
    #[default]
    Undefined,
    FullLand,
    FullWater,
    Mixed,
}

/// ocean 标志计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OceanStats {
    /// 带 ocean 标志的叶节点数
    pub tiles: u32,
    /// 其中 ocean = true 的数量
    pub ocean: u32,
}

impl OceanStats {
    pub fn record(&mut self, ocean: bool) {
        self.tiles += 1;
        if ocean {
            self.ocean += 1;
        }
    }

    pub fn merge(&mut self, other: &OceanStats) {
        self.tiles += other.tiles;
        self.ocean += other.ocean;
    }

    pub fn ratio(&self) -> f64 {
        if self.tiles == 0 {
            0.0
        } else {
            f64::from(self.ocean) / f64::from(self.tiles)
        }
    }

    pub fn foundation(&self) -> MapFoundationType {
        match (self.tiles, self.ocean) {
            (0, _) => MapFoundationType::Undefined,
            (t, o) if o == t => MapFoundationType::FullWater,
            (_, 0) => MapFoundationType::FullLand,
            _ => MapFoundationType::Mixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foundation_from_ocean_counts() {
        let mut stats = OceanStats::default();
        assert_eq!(stats.foundation(), MapFoundationType::Undefined);
        stats.record(true);
        assert_eq!(stats.foundation(), MapFoundationType::FullWater);
        stats.record(false);
        assert_eq!(stats.foundation(), MapFoundationType::Mixed);
        assert!((stats.ratio() - 0.5).abs() < f64::EPSILON);

        let mut land = OceanStats::default();
        land.record(false);
        assert_eq!(land.foundation(), MapFoundationType::FullLand);
    }

    #[test]
    fn test_cancellation_flag() {
        let flag = CancellationFlag::new();
        assert!(!is_aborted(Some(&flag)));
        flag.abort();
        assert!(is_aborted(Some(&flag)));
        assert!(!is_aborted(None));
    }
}
