//! KLV (Key-Length-Value) 实体与分词器.
//!
//! 两种实体:
//! - Local set 实体: key 为 BER-OID 编码的本地 tag, 作用域限定在外层集合内
//! - Universal label 实体: key 为 16 字节全局唯一标识 (SMPTE UL)
//!
//! 长度字段一般为 BER 编码:
//! ```text
//! 短格式: 0xxxxxxx                 (0..=127)
//! 长格式: 1nnnnnnn + n 字节大端长度 (n = 1..=4)
//! ```
//!
//! 例外: Vision 元数据集合的外层长度固定为 1 个原始字节 (0..=255), 不走 BER.

use bytes::Bytes;
use log::debug;
use visklv_core::{VisionError, VisionResult};

use crate::metadata::VISION_METADATA_KEY;

/// Universal label key 长度
pub const UNIVERSAL_KEY_SIZE: usize = 16;

/// SMPTE universal label 前缀
pub const UNIVERSAL_LABEL_PREFIX: [u8; 4] = [0x06, 0x0E, 0x2B, 0x34];

/// 读取 BER 长度
///
/// 返回 (长度值, 消耗的字节数).
pub fn read_ber_length(data: &[u8]) -> VisionResult<(usize, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| VisionError::InvalidData("KLV: BER 长度截断".into()))?;
    if first & 0x80 == 0 {
        return Ok((usize::from(first), 1));
    }

    let count = usize::from(first & 0x7F);
    if count == 0 || count > 4 {
        return Err(VisionError::InvalidData(format!(
            "KLV: 不支持的 BER 长度字节数 {count}"
        )));
    }
    if data.len() < 1 + count {
        return Err(VisionError::InvalidData("KLV: BER 长度截断".into()));
    }

    let len = data[1..=count]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
    Ok((len, 1 + count))
}

/// 写入 BER 长度 (尽量使用最短格式)
pub fn write_ber_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u32).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// 长度字段是否为单个原始字节
fn uses_raw_length(key: &[u8; UNIVERSAL_KEY_SIZE]) -> bool {
    *key == VISION_METADATA_KEY
}

/// 按 key 写入 universal label 长度字段
///
/// 单字节长度的 key 在值超过 255 字节时退回 BER 长格式.
pub fn write_universal_length(key: &[u8; UNIVERSAL_KEY_SIZE], len: usize, out: &mut Vec<u8>) {
    match u8::try_from(len) {
        Ok(raw) if uses_raw_length(key) => out.push(raw),
        _ => write_ber_length(len, out),
    }
}

/// 读取 BER-OID 编码的 tag
///
/// 返回 (tag 值, 消耗的字节数).
fn read_ber_oid(data: &[u8]) -> VisionResult<(u32, usize)> {
    let mut value = 0u32;
    for (i, &b) in data.iter().enumerate().take(4) {
        value = (value << 7) | u32::from(b & 0x7F);
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(VisionError::InvalidData("KLV: BER-OID tag 截断或过长".into()))
}

/// 将 tag 编码为 BER-OID
pub fn encode_ber_oid(tag: u32) -> Vec<u8> {
    let mut groups = vec![(tag & 0x7F) as u8];
    let mut rest = tag >> 7;
    while rest != 0 {
        groups.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    groups.reverse();
    groups
}

/// 以 "06-0E-2B-34" 形式格式化字节序列
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Local set 实体
///
/// key 保留原始 BER-OID 字节, 便于无损转发未知 tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSetEntity {
    key: Vec<u8>,
    tag_id: u32,
    value: Vec<u8>,
}

impl LocalSetEntity {
    /// 由 tag 编号和值创建
    pub fn new(tag_id: u32, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: encode_ber_oid(tag_id),
            tag_id,
            value: value.into(),
        }
    }

    /// 原始 key 字节 (BER-OID)
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// 本地 tag 编号
    pub fn tag_id(&self) -> u32 {
        self.tag_id
    }

    /// 值字节
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// 替换值字节, key 不变
    pub fn set_value(&mut self, value: impl Into<Vec<u8>>) {
        self.value = value.into();
    }

    /// 序列化为 key + BER 长度 + value
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.key.len() + 5 + self.value.len());
        out.extend_from_slice(&self.key);
        write_ber_length(self.value.len(), &mut out);
        out.extend_from_slice(&self.value);
        out
    }
}

/// 将 local set 的值区域切分为实体序列 (保持原始顺序)
pub fn parse_local_set(data: &[u8]) -> VisionResult<Vec<LocalSetEntity>> {
    let mut entities = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let (tag_id, key_len) = read_ber_oid(&data[pos..])?;
        let key = data[pos..pos + key_len].to_vec();
        pos += key_len;

        let (len, len_size) = read_ber_length(&data[pos..])?;
        pos += len_size;

        let end = pos
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                VisionError::InvalidData(format!(
                    "KLV: local set 值截断, tag={tag_id}, len={len}, remain={}",
                    data.len() - pos
                ))
            })?;

        entities.push(LocalSetEntity {
            key,
            tag_id,
            value: data[pos..end].to_vec(),
        });
        pos = end;
    }

    Ok(entities)
}

/// Universal label 实体
///
/// 保留完整源字节 (key + 长度 + 值), 校验和需要在源字节上重新计算.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniversalLabelEntity {
    key: [u8; UNIVERSAL_KEY_SIZE],
    value_offset: usize,
    source: Bytes,
}

impl UniversalLabelEntity {
    /// 由 key 与值构造, 长度字段见 [`write_universal_length`]
    pub fn new(key: [u8; UNIVERSAL_KEY_SIZE], value: &[u8]) -> Self {
        let mut source = Vec::with_capacity(UNIVERSAL_KEY_SIZE + 5 + value.len());
        source.extend_from_slice(&key);
        write_universal_length(&key, value.len(), &mut source);
        let value_offset = source.len();
        source.extend_from_slice(value);
        Self {
            key,
            value_offset,
            source: Bytes::from(source),
        }
    }

    /// 从恰好包含一个实体的源字节解析
    pub fn from_source(source: impl Into<Bytes>) -> VisionResult<Self> {
        let source = source.into();
        let (entity, consumed) = Self::parse_one(&source)?;
        if consumed != source.len() {
            return Err(VisionError::InvalidData(format!(
                "KLV: universal label 之后存在 {} 个多余字节",
                source.len() - consumed
            )));
        }
        Ok(entity)
    }

    /// 解析数据起始处的一个实体, 返回 (实体, 消耗字节数)
    fn parse_one(data: &[u8]) -> VisionResult<(Self, usize)> {
        if data.len() < UNIVERSAL_KEY_SIZE + 1 {
            return Err(VisionError::InvalidData(format!(
                "KLV: universal label 截断, len={}",
                data.len()
            )));
        }
        let mut key = [0u8; UNIVERSAL_KEY_SIZE];
        key.copy_from_slice(&data[..UNIVERSAL_KEY_SIZE]);

        let (len, len_size) = if uses_raw_length(&key) {
            (usize::from(data[UNIVERSAL_KEY_SIZE]), 1)
        } else {
            read_ber_length(&data[UNIVERSAL_KEY_SIZE..])?
        };
        let value_offset = UNIVERSAL_KEY_SIZE + len_size;
        let end = value_offset + len;
        if end > data.len() {
            return Err(VisionError::InvalidData(format!(
                "KLV: universal label 值截断, len={len}, remain={}",
                data.len() - value_offset
            )));
        }

        Ok((
            Self {
                key,
                value_offset,
                source: Bytes::copy_from_slice(&data[..end]),
            },
            end,
        ))
    }

    /// 16 字节 key
    pub fn key(&self) -> &[u8; UNIVERSAL_KEY_SIZE] {
        &self.key
    }

    /// key 的十六进制表示 ("06-0E-2B-34-...")
    pub fn key_hex(&self) -> String {
        format_hex(&self.key)
    }

    /// 值字节
    pub fn value(&self) -> &[u8] {
        &self.source[self.value_offset..]
    }

    /// 完整源字节
    pub fn source_data(&self) -> &Bytes {
        &self.source
    }
}

/// 从连续数据 (如 PES 负载) 中切分 universal label 实体
///
/// 遇到非 UL 前缀 (如 0xFF 填充) 时停止.
pub fn parse_universal_labels(data: &[u8]) -> VisionResult<Vec<UniversalLabelEntity>> {
    let mut entities = Vec::new();
    let mut pos = 0usize;

    while data.len() - pos > UNIVERSAL_KEY_SIZE {
        if data[pos..pos + UNIVERSAL_LABEL_PREFIX.len()] != UNIVERSAL_LABEL_PREFIX {
            debug!("KLV: 偏移 {pos} 处不是 universal label, 停止切分");
            break;
        }
        let (entity, consumed) = UniversalLabelEntity::parse_one(&data[pos..])?;
        entities.push(entity);
        pos += consumed;
    }

    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ber长度_短格式与长格式() {
        assert_eq!(read_ber_length(&[0x1E]).unwrap(), (30, 1));
        assert_eq!(read_ber_length(&[0x81, 0xC8]).unwrap(), (200, 2));
        assert_eq!(read_ber_length(&[0x82, 0x01, 0x00]).unwrap(), (256, 3));
        assert!(read_ber_length(&[0x82, 0x01]).is_err());
        assert!(read_ber_length(&[]).is_err());
    }

    #[test]
    fn test_ber长度_写入最短格式() {
        let mut out = Vec::new();
        write_ber_length(127, &mut out);
        write_ber_length(200, &mut out);
        write_ber_length(0x1234, &mut out);
        assert_eq!(out, vec![0x7F, 0x81, 0xC8, 0x82, 0x12, 0x34]);
    }

    #[test]
    fn test_ber_oid_多字节tag() {
        assert_eq!(encode_ber_oid(99), vec![0x63]);
        assert_eq!(encode_ber_oid(200), vec![0x81, 0x48]);
        assert_eq!(read_ber_oid(&[0x81, 0x48]).unwrap(), (200, 2));
    }

    #[test]
    fn test_local_set_切分() {
        let data = [0x03, 0x02, b'h', b'i', 0x63, 0x01, 0x11, 0x01, 0x02, 0x37, 0xE2];
        let entities = parse_local_set(&data).unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].tag_id(), 3);
        assert_eq!(entities[0].value(), b"hi");
        assert_eq!(entities[1].tag_id(), 0x63);
        assert_eq!(entities[2].value(), &[0x37, 0xE2]);
        assert_eq!(entities[1].encode(), vec![0x63, 0x01, 0x11]);
    }

    #[test]
    fn test_local_set_值截断报错() {
        assert!(parse_local_set(&[0x03, 0x05, 0x01]).is_err());
    }

    #[test]
    fn test_universal_label_构造与解析() {
        let key = [
            0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0E, 0x0E, 0x21, 0x03, 0x01, 0x01, 0x00,
            0x00, 0x00,
        ];
        let entity = UniversalLabelEntity::new(key, &[0x01, 0x02, 0x00, 0x00]);
        assert_eq!(entity.source_data().len(), 16 + 1 + 4);
        assert_eq!(entity.key_hex(), "06-0E-2B-34-04-01-01-0E-0E-21-03-01-01-00-00-00");

        let mut stream = entity.source_data().to_vec();
        stream.extend_from_slice(entity.source_data());
        stream.extend_from_slice(&[0xFF; 8]);
        let parsed = parse_universal_labels(&stream).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].value(), &[0x01, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_universal_label_vision长度为单字节() {
        let value = vec![0x55; 200];
        let entity = UniversalLabelEntity::new(VISION_METADATA_KEY, &value);
        assert_eq!(entity.source_data().len(), 16 + 1 + 200);
        assert_eq!(entity.source_data()[16], 200);

        let parsed = UniversalLabelEntity::from_source(entity.source_data().clone()).unwrap();
        assert_eq!(parsed.value(), &value[..]);

        // 其他 key 仍使用 BER 长格式
        let mut other = VISION_METADATA_KEY;
        other[15] = 0x01;
        let entity = UniversalLabelEntity::new(other, &value);
        assert_eq!(&entity.source_data()[16..18], &[0x81, 200]);
        assert_eq!(entity.value(), &value[..]);
    }

    #[test]
    fn test_universal_label_多余字节报错() {
        let entity = UniversalLabelEntity::new([0x06, 0x0E, 0x2B, 0x34, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], &[1]);
        let mut data = entity.source_data().to_vec();
        data.push(0x00);
        assert!(UniversalLabelEntity::from_source(data).is_err());
    }
}
