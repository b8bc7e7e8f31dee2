//! 错误类型
//!
//! - `ObfError`: 协议层 / 样式层 / 栅格层的强类型错误 (thiserror)
//! - 外层入口 (打开文件、加载配置) 统一使用 `anyhow::Result` 附加上下文

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObfError {
    /// 读取越过了当前限制 (长度前缀与实际数据不符)
    #[error("unexpected end of data at offset {offset} (limit {limit})")]
    Truncated { offset: usize, limit: usize },

    #[error("malformed varint at offset {0}")]
    MalformedVarint(usize),

    #[error("invalid wire type {wire_type} for field {field} at offset {offset}")]
    InvalidWireType {
        field: u32,
        wire_type: u32,
        offset: usize,
    },

    #[error("invalid tag 0 at offset {0}")]
    InvalidTag(usize),

    /// 长度前缀超出了外层消息的边界
    #[error("length {length} at offset {offset} overruns limit {limit}")]
    LengthOverrun {
        offset: usize,
        length: usize,
        limit: usize,
    },

    #[error("unsupported map version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    /// versionConfirm 与 version 不一致，视为文件损坏
    #[error("corrupted file: versionConfirm {confirm} does not match version {version}")]
    VersionConfirmMismatch { version: u32, confirm: u32 },

    #[error("invalid string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("style error: {0}")]
    Style(String),

    #[error("failed to allocate {width}x{height} raster surface")]
    SurfaceAllocation { width: u32, height: u32 },

    /// 查询被协作式取消 (不记录为错误日志)
    #[error("query cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ObfResult<T> = std::result::Result<T, ObfError>;
