//! OBF Render - OBF 矢量地图渲染管线
//!
//! 从 OBF 二进制瓦片树读取地图对象，经对象 / 图元两级共享缓存，按样式图元化，
//! 最后栅格化为瓦片位图。
//!
//! # 模块结构
//!
//! - `obf_codec`: protobuf 风格的线格式编解码 (varint / zigzag / 长度前缀)
//! - `obf_file`: OBF 容器结构扫描与版本校验
//! - `sidecar`: 分区偏移缓存索引 (跳过重复扫描)
//! - `spatial_tree`: 空间树节点与按包围盒剪枝的遍历
//! - `map_section`: 地图分区：编码规则、对象块、字符串表
//! - `route_section` / `route_object`: 路网分区记录读取
//! - `obfs_collection`: 显式的文件集合与对象查询组装
//! - `cache`: 单飞缓存与引用计数的共享资源表
//! - `map_objects_provider`: 瓦片对象提供者 (跨瓦片对象共享)
//! - `style` / `style_evaluator`: 样式规则树与求值
//! - `coastline`: 海岸线多边形化与底色填充
//! - `primitives` / `primitiviser` / `primitives_provider`: 图元化
//! - `quad_tree`: 符号碰撞检测
//! - `rasterizer`: 栅格化遍序、画布后端、画笔与字体缓存、文字布局
//! - `raster_provider`: 瓦片栅格化提供者
//! - `service`: tokio 异步渲染服务
//! - `area` / `projection`: 31 位坐标几何与墨卡托投影
//! - `language`: 名称语言选择与转写
//! - `config`: 渲染配置
//! - `query`: 取消控制与查询统计
//! - `types`: 统计快照 DTO
//! - `error`: 错误类型

pub mod area;
pub mod cache;
pub mod coastline;
pub mod config;
pub mod error;
pub mod language;
pub mod map_object;
pub mod map_objects_provider;
pub mod map_section;
pub mod obf_codec;
pub mod obf_file;
pub mod obfs_collection;
pub mod primitives;
pub mod primitives_provider;
pub mod primitiviser;
pub mod projection;
pub mod quad_tree;
pub mod query;
pub mod raster_provider;
pub mod rasterizer;
pub mod route_object;
pub mod route_section;
pub mod service;
pub mod sidecar;
pub mod spatial_tree;
pub mod style;
pub mod style_evaluator;
pub mod types;

#[cfg(test)]
mod test_support;

pub use area::{AreaI, PointI, TileId, ZoomLevel};
pub use config::RenderConfig;
pub use error::{ObfError, ObfResult};
pub use raster_provider::{RasterizedTile, TileRasterProvider};
pub use service::TileRenderService;
