//! OBF 二进制协议层
//!
//! OBF 容器沿用 protobuf 的线格式，并扩展了一种 4 字节大端长度前缀的字段：
//!
//! ```text
//! tag = (field_number << 3) | wire_type
//!
//! wire_type 0: varint
//! wire_type 1: fixed64 (8 字节)
//! wire_type 2: varint 长度 + payload
//! wire_type 5: fixed32 (4 字节)
//! wire_type 6: [len: u32 BE] + payload   (分区、空间树节点)
//! ```
//!
//! 设计原则：
//! - `CodedInput` 直接借用底层字节切片，字符串零拷贝
//! - 通过 limit 栈约束嵌套消息，越界读取返回 `ObfError::Truncated`
//! - 未知字段按 wire type 跳过，保证向前兼容

use crate::error::{ObfError, ObfResult};

pub mod wire_type {
    pub const VARINT: u32 = 0;
    pub const FIXED64: u32 = 1;
    pub const LENGTH_DELIMITED: u32 = 2;
    pub const START_GROUP: u32 = 3;
    pub const END_GROUP: u32 = 4;
    pub const FIXED32: u32 = 5;
    /// 4 字节大端长度前缀
    pub const FIXED32_LENGTH_DELIMITED: u32 = 6;
}

#[inline]
pub const fn make_tag(field: u32, wire_type: u32) -> u32 {
    (field << 3) | wire_type
}

#[inline]
pub const fn tag_field(tag: u32) -> u32 {
    tag >> 3
}

#[inline]
pub const fn tag_wire_type(tag: u32) -> u32 {
    tag & 7
}

#[inline]
pub const fn decode_zigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

#[inline]
pub const fn encode_zigzag32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline]
pub const fn decode_zigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[inline]
pub const fn encode_zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

// ============================================================================
// 读取端
// ============================================================================

/// 基于字节切片的流式解码器
#[derive(Debug, Clone)]
pub struct CodedInput<'a> {
    data: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> CodedInput<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            limit: data.len(),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn bytes_until_limit(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos >= self.limit
    }

    /// 跳转到绝对偏移 (不得越过当前 limit)
    pub fn seek(&mut self, offset: usize) -> ObfResult<()> {
        if offset > self.limit {
            return Err(ObfError::Truncated {
                offset,
                limit: self.limit,
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// 限制后续读取在 `length` 字节内，返回旧的 limit 供 `pop_limit` 恢复
    pub fn push_limit(&mut self, length: usize) -> ObfResult<usize> {
        let new_limit = self.pos.checked_add(length).ok_or(ObfError::LengthOverrun {
            offset: self.pos,
            length,
            limit: self.limit,
        })?;
        if new_limit > self.limit {
            return Err(ObfError::LengthOverrun {
                offset: self.pos,
                length,
                limit: self.limit,
            });
        }
        let old = self.limit;
        self.limit = new_limit;
        Ok(old)
    }

    pub fn pop_limit(&mut self, old_limit: usize) {
        self.limit = old_limit.min(self.data.len());
    }

    fn read_byte(&mut self) -> ObfResult<u8> {
        if self.pos >= self.limit {
            return Err(ObfError::Truncated {
                offset: self.pos,
                limit: self.limit,
            });
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// 读取字段标签，到达 limit 时返回 0
    pub fn read_tag(&mut self) -> ObfResult<u32> {
        if self.at_end() {
            return Ok(0);
        }
        let offset = self.pos;
        let tag = self.read_varint32()?;
        if tag_field(tag) == 0 {
            return Err(ObfError::InvalidTag(offset));
        }
        Ok(tag)
    }

    pub fn read_varint64(&mut self) -> ObfResult<u64> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.read_byte()?;
            if shift >= 64 {
                return Err(ObfError::MalformedVarint(start));
            }
            result |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// 32 位 varint (高位截断，与 protobuf 行为一致)
    #[inline]
    pub fn read_varint32(&mut self) -> ObfResult<u32> {
        Ok(self.read_varint64()? as u32)
    }

    #[inline]
    pub fn read_int32(&mut self) -> ObfResult<i32> {
        Ok(self.read_varint64()? as i32)
    }

    #[inline]
    pub fn read_int64(&mut self) -> ObfResult<i64> {
        Ok(self.read_varint64()? as i64)
    }

    #[inline]
    pub fn read_sint32(&mut self) -> ObfResult<i32> {
        Ok(decode_zigzag32(self.read_varint32()?))
    }

    #[inline]
    pub fn read_sint64(&mut self) -> ObfResult<i64> {
        Ok(decode_zigzag64(self.read_varint64()?))
    }

    #[inline]
    pub fn read_bool(&mut self) -> ObfResult<bool> {
        Ok(self.read_varint64()? != 0)
    }

    /// 4 字节大端整数 (分区长度、shiftToData)
    pub fn read_fixed32_be(&mut self) -> ObfResult<u32> {
        let bytes = self.read_raw_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_raw_bytes(&mut self, length: usize) -> ObfResult<&'a [u8]> {
        if self.bytes_until_limit() < length {
            return Err(ObfError::Truncated {
                offset: self.pos,
                limit: self.limit,
            });
        }
        let slice = &self.data[self.pos..self.pos + length];
        self.pos += length;
        Ok(slice)
    }

    /// varint 长度前缀的字节串
    pub fn read_bytes(&mut self) -> ObfResult<&'a [u8]> {
        let length = self.read_varint32()? as usize;
        self.read_raw_bytes(length)
    }

    pub fn read_string(&mut self) -> ObfResult<&'a str> {
        let bytes = self.read_bytes()?;
        Ok(std::str::from_utf8(bytes)?)
    }

    /// 按 wire type 跳过当前字段
    pub fn skip_field(&mut self, tag: u32) -> ObfResult<()> {
        match tag_wire_type(tag) {
            wire_type::VARINT => {
                self.read_varint64()?;
            }
            wire_type::FIXED64 => {
                self.read_raw_bytes(8)?;
            }
            wire_type::LENGTH_DELIMITED => {
                let length = self.read_varint32()? as usize;
                self.read_raw_bytes(length)?;
            }
            wire_type::FIXED32 => {
                self.read_raw_bytes(4)?;
            }
            wire_type::FIXED32_LENGTH_DELIMITED => {
                let length = self.read_fixed32_be()? as usize;
                self.read_raw_bytes(length)?;
            }
            wire_type::START_GROUP => loop {
                let inner = self.read_tag()?;
                if inner == 0 {
                    return Err(ObfError::Truncated {
                        offset: self.pos,
                        limit: self.limit,
                    });
                }
                if tag_wire_type(inner) == wire_type::END_GROUP {
                    break;
                }
                self.skip_field(inner)?;
            },
            wt => {
                return Err(ObfError::InvalidWireType {
                    field: tag_field(tag),
                    wire_type: wt,
                    offset: self.pos,
                })
            }
        }
        Ok(())
    }

    /// 读取 varint 长度前缀并压入 limit
    pub fn enter_message(&mut self) -> ObfResult<usize> {
        let length = self.read_varint32()? as usize;
        self.push_limit(length)
    }

    /// 读取 4 字节大端长度前缀并压入 limit，返回 (payload 起始偏移, 长度, 旧 limit)
    pub fn enter_fixed32_message(&mut self) -> ObfResult<(usize, usize, usize)> {
        let length = self.read_fixed32_be()? as usize;
        let start = self.pos;
        let old = self.push_limit(length)?;
        Ok((start, length, old))
    }

    /// 读取 packed 的 varint 数组 (长度前缀 + 连续 varint)
    pub fn read_packed_varints(&mut self) -> ObfResult<Vec<u32>> {
        let old = self.enter_message()?;
        let mut values = Vec::new();
        while !self.at_end() {
            values.push(self.read_varint32()?);
        }
        self.pop_limit(old);
        Ok(values)
    }
}

// ============================================================================
// 写入端
// ============================================================================

/// 编码器，与 `CodedInput` 完全对称
#[derive(Debug, Default, Clone)]
pub struct CodedOutput {
    buffer: Vec<u8>,
}

impl CodedOutput {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_varint64(&mut self, mut value: u64) {
        loop {
            if value < 0x80 {
                self.buffer.push(value as u8);
                return;
            }
            self.buffer.push(((value & 0x7f) as u8) | 0x80);
            value >>= 7;
        }
    }

    #[inline]
    pub fn write_varint32(&mut self, value: u32) {
        self.write_varint64(u64::from(value));
    }

    #[inline]
    pub fn write_sint32(&mut self, value: i32) {
        self.write_varint32(encode_zigzag32(value));
    }

    #[inline]
    pub fn write_sint64(&mut self, value: i64) {
        self.write_varint64(encode_zigzag64(value));
    }

    #[inline]
    pub fn write_tag(&mut self, field: u32, wire_type: u32) {
        self.write_varint32(make_tag(field, wire_type));
    }

    pub fn write_uint32_field(&mut self, field: u32, value: u32) {
        self.write_tag(field, wire_type::VARINT);
        self.write_varint32(value);
    }

    pub fn write_uint64_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, wire_type::VARINT);
        self.write_varint64(value);
    }

    pub fn write_int32_field(&mut self, field: u32, value: i32) {
        self.write_tag(field, wire_type::VARINT);
        self.write_varint64(value as i64 as u64);
    }

    pub fn write_sint32_field(&mut self, field: u32, value: i32) {
        self.write_tag(field, wire_type::VARINT);
        self.write_sint32(value);
    }

    pub fn write_sint64_field(&mut self, field: u32, value: i64) {
        self.write_tag(field, wire_type::VARINT);
        self.write_sint64(value);
    }

    pub fn write_bool_field(&mut self, field: u32, value: bool) {
        self.write_uint32_field(field, u32::from(value));
    }

    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, wire_type::LENGTH_DELIMITED);
        self.write_varint32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_string_field(&mut self, field: u32, value: &str) {
        self.write_bytes_field(field, value.as_bytes());
    }

    pub fn write_packed_varints(&mut self, field: u32, values: &[u32]) {
        let mut inner = CodedOutput::new();
        for &v in values {
            inner.write_varint32(v);
        }
        self.write_bytes_field(field, inner.as_bytes());
    }

    pub fn write_fixed32_be(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// 写入 4 字节大端字段 (wire type 5)
    pub fn write_fixed32_be_field(&mut self, field: u32, value: u32) {
        self.write_tag(field, wire_type::FIXED32);
        self.write_fixed32_be(value);
    }

    /// 回填某个位置的 4 字节大端整数
    pub fn patch_fixed32_be(&mut self, position: usize, value: u32) {
        self.buffer[position..position + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// 开始一个 4 字节长度前缀的嵌套消息，返回长度占位的位置
    pub fn begin_fixed32_message(&mut self, field: u32) -> usize {
        self.write_tag(field, wire_type::FIXED32_LENGTH_DELIMITED);
        let position = self.buffer.len();
        self.write_fixed32_be(0);
        position
    }

    /// 结束嵌套消息并回填长度
    pub fn end_fixed32_message(&mut self, length_position: usize) {
        let length = self.buffer.len() - length_position - 4;
        self.patch_fixed32_be(length_position, length as u32);
    }

    /// 写入 varint 长度前缀的嵌套消息 (不含 tag，用于数据块)
    pub fn write_length_prefixed(&mut self, payload: &[u8]) {
        self.write_varint32(payload.len() as u32);
        self.buffer.extend_from_slice(payload);
    }

    pub fn write_message_field(&mut self, field: u32, payload: &[u8]) {
        self.write_bytes_field(field, payload);
    }
}

// ============================================================================
// 增量编码
// ============================================================================

/// 将相对 `basis` 累积的增量还原为绝对坐标
pub fn undelta(basis: i32, deltas: &[i32]) -> Vec<i32> {
    let mut current = basis;
    deltas
        .iter()
        .map(|&d| {
            current = current.wrapping_add(d);
            current
        })
        .collect()
}

/// `undelta` 的逆运算
pub fn delta(basis: i32, absolute: &[i32]) -> Vec<i32> {
    let mut previous = basis;
    absolute
        .iter()
        .map(|&v| {
            let d = v.wrapping_sub(previous);
            previous = v;
            d
        })
        .collect()
}

/// 解码一串 sint32 增量 varint 为绝对坐标
pub fn decode_delta_varints(basis: i32, bytes: &[u8]) -> ObfResult<Vec<i32>> {
    let mut input = CodedInput::new(bytes);
    let mut deltas = Vec::new();
    while !input.at_end() {
        deltas.push(input.read_sint32()?);
    }
    Ok(undelta(basis, &deltas))
}

/// 将绝对坐标编码为相对 `basis` 的 sint32 增量 varint
pub fn encode_delta_varints(basis: i32, absolute: &[i32]) -> Vec<u8> {
    let mut output = CodedOutput::new();
    for d in delta(basis, absolute) {
        output.write_sint32(d);
    }
    output.into_bytes()
}
