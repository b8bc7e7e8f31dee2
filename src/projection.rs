//! 31 位墨卡托投影
//!
//! 将 WGS84 经纬度映射到 2^31 × 2^31 的整数平面 (y 向南)。
//! OBF 文件中的全部坐标都使用这一表示。

use crate::area::{PointI, TileId, ZoomLevel};
use std::f64::consts::PI;

/// 2^31
const WORLD_SIZE31: f64 = 2_147_483_648.0;

/// 墨卡托纬度极限
const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// 平均地球半径（米），用于距离计算
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 经度 -> 31 位 x
#[inline]
pub fn longitude_to_x31(lon: f64) -> i32 {
    let lon = lon.clamp(-180.0, 180.0);
    let x = (lon + 180.0) / 360.0 * WORLD_SIZE31;
    x.clamp(0.0, WORLD_SIZE31 - 1.0) as i32
}

/// 纬度 -> 31 位 y
///
/// y = (1 - ln(tan(lat) + sec(lat)) / π) / 2 × 2^31
#[inline]
pub fn latitude_to_y31(lat: f64) -> i32 {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let lat_rad = lat * PI / 180.0;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * WORLD_SIZE31;
    y.clamp(0.0, WORLD_SIZE31 - 1.0) as i32
}

#[inline]
pub fn x31_to_longitude(x: i32) -> f64 {
    f64::from(x) / WORLD_SIZE31 * 360.0 - 180.0
}

#[inline]
pub fn y31_to_latitude(y: i32) -> f64 {
    let n = PI - 2.0 * PI * f64::from(y) / WORLD_SIZE31;
    (0.5 * (n.exp() - (-n).exp())).atan() * 180.0 / PI
}

pub fn lonlat_to_point31(lon: f64, lat: f64) -> PointI {
    PointI::new(longitude_to_x31(lon), latitude_to_y31(lat))
}

/// 包含给定经纬度的瓦片
pub fn tile_for_location(lon: f64, lat: f64, zoom: ZoomLevel) -> TileId {
    TileId::from_point31(&lonlat_to_point31(lon, lat), zoom)
}

/// 两个 31 位点之间的大圆距离（米）
pub fn distance31_m(a: &PointI, b: &PointI) -> f64 {
    let (lat1, lon1) = (y31_to_latitude(a.y).to_radians(), x31_to_longitude(a.x).to_radians());
    let (lat2, lon2) = (y31_to_latitude(b.y).to_radians(), x31_to_longitude(b.x).to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}
