//! Vision 元数据记录.
//!
//! 一条记录对应一个 universal label 实体, 其值区域为 local set:
//! ```text
//! [16 字节 key][长度][tag 2: 时间戳][tag 3: 事件标识]...[tag 1: 校验和]
//! ```
//!
//! 字段按插入顺序保存为原始 local set 实体, 读取时按需解码,
//! 因此未修改的字段能够逐字节转发.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use visklv_core::crc::bcc16;
use visklv_core::{VisionError, VisionResult};

use crate::decoder::DecoderOptions;
use crate::entity::{LocalSetEntity, UniversalLabelEntity, parse_local_set, write_universal_length};
use crate::fixed_point::{
    AltitudeCodec, AngleCodec, decode_byte, decode_heading, decode_timestamp, decode_utf8,
    encode_heading, encode_timestamp, encode_utf8, format_version, parse_version,
};
use crate::tags::VisionTag;

/// Vision 元数据集合的 universal label key
pub const VISION_METADATA_KEY: [u8; 16] = [
    0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0E, 0x0E, 0x21, 0x03, 0x01, 0x01, 0x00, 0x00, 0x00,
];

/// local set 负载上限 (单字节长度字段)
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// 未经校验的记录的校验和取值
pub const CHECKSUM_UNVERIFIED: i32 = -1;

/// 校验和实体占位: tag 1, 长度 2, 值待回填
const CHECKSUM_PLACEHOLDER: [u8; 4] = [0x01, 0x02, 0x00, 0x00];

/// 计算 universal label 源字节的块校验 (不含末尾 2 字节)
pub fn calculate_checksum(source: &[u8]) -> u16 {
    bcc16(&source[..source.len().saturating_sub(2)])
}

/// Vision 元数据记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionMetadata {
    /// 解码得到的校验和: 非负表示匹配, 负数为计算值取反, -1 表示未校验
    checksum: i32,
    /// 已识别字段, 保持插入顺序, 同一 tag 只出现一次
    fields: Vec<(VisionTag, LocalSetEntity)>,
    /// 已识别实体的原始副本 (按 tag 名称)
    known_entities: BTreeMap<String, LocalSetEntity>,
    /// 未识别实体
    unknown_entities: Vec<LocalSetEntity>,
}

impl Default for VisionMetadata {
    fn default() -> Self {
        Self {
            checksum: CHECKSUM_UNVERIFIED,
            fields: Vec::new(),
            known_entities: BTreeMap::new(),
            unknown_entities: Vec::new(),
        }
    }
}

impl VisionMetadata {
    /// 创建空记录
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 universal label 实体解码
    ///
    /// 字段值格式不符时不报错, 对应读取方法返回 None.
    pub fn decode(entity: &UniversalLabelEntity, options: &DecoderOptions) -> VisionResult<Self> {
        if entity.key() != &VISION_METADATA_KEY {
            return Err(VisionError::InvalidArgument(format!(
                "不是 Vision 元数据实体: key={}",
                entity.key_hex()
            )));
        }

        let mut meta = Self::new();
        for local in parse_local_set(entity.value())? {
            let Some(tag) = VisionTag::from_id(local.tag_id()) else {
                trace!("Vision: 未知 tag {}, len={}", local.tag_id(), local.value().len());
                if options.retain_unknown_entities {
                    meta.unknown_entities.push(local);
                }
                continue;
            };

            if options.retain_known_entities {
                meta.known_entities
                    .insert(tag.name().to_string(), local.clone());
            }

            if tag == VisionTag::Checksum {
                meta.checksum = verify_checksum(entity.source_data(), local.value());
                continue;
            }
            meta.put_entity(tag, local);
        }

        debug!(
            "Vision: 解码 {} 个字段, checksum={}",
            meta.fields.len(),
            meta.checksum
        );
        Ok(meta)
    }

    /// 编码为 universal label 实体
    ///
    /// 字段按插入顺序写出, 末尾附加校验和实体并回填 BCC-16.
    pub fn encode(&self) -> VisionResult<UniversalLabelEntity> {
        let mut payload = Vec::with_capacity(MAX_PAYLOAD_SIZE);
        for (_, entity) in &self.fields {
            payload.extend_from_slice(&entity.encode());
        }
        payload.extend_from_slice(&CHECKSUM_PLACEHOLDER);

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(VisionError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut source = Vec::with_capacity(VISION_METADATA_KEY.len() + 1 + payload.len());
        source.extend_from_slice(&VISION_METADATA_KEY);
        write_universal_length(&VISION_METADATA_KEY, payload.len(), &mut source);
        source.extend_from_slice(&payload);

        let checksum = calculate_checksum(&source);
        let len = source.len();
        BigEndian::write_u16(&mut source[len - 2..], checksum);

        UniversalLabelEntity::from_source(source)
    }

    /// 解码得到的校验和
    pub fn checksum(&self) -> i32 {
        self.checksum
    }

    /// 校验和是否匹配
    pub fn is_checksum_valid(&self) -> bool {
        self.checksum >= 0
    }

    /// 已识别字段 (按插入顺序)
    pub fn fields(&self) -> impl Iterator<Item = (VisionTag, &LocalSetEntity)> {
        self.fields.iter().map(|(tag, entity)| (*tag, entity))
    }

    /// 已识别实体的原始副本 (需启用 retain_known_entities)
    pub fn known_entities(&self) -> &BTreeMap<String, LocalSetEntity> {
        &self.known_entities
    }

    /// 未识别实体 (需启用 retain_unknown_entities)
    pub fn unknown_entities(&self) -> &[LocalSetEntity] {
        &self.unknown_entities
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.value(VisionTag::Timestamp).and_then(decode_timestamp)
    }

    pub fn set_timestamp(&mut self, value: Option<DateTime<Utc>>) {
        self.set_value(
            VisionTag::Timestamp,
            value.map(|t| encode_timestamp(&t).to_vec()),
        );
    }

    pub fn event_id(&self) -> Option<String> {
        self.value(VisionTag::EventId).and_then(decode_utf8)
    }

    pub fn set_event_id(&mut self, value: Option<&str>) {
        self.set_value(VisionTag::EventId, value.and_then(encode_utf8));
    }

    pub fn event_start_time(&self) -> Option<DateTime<Utc>> {
        self.value(VisionTag::EventStartTime)
            .and_then(decode_timestamp)
    }

    pub fn set_event_start_time(&mut self, value: Option<DateTime<Utc>>) {
        self.set_value(
            VisionTag::EventStartTime,
            value.map(|t| encode_timestamp(&t).to_vec()),
        );
    }

    pub fn camera_name(&self) -> Option<String> {
        self.value(VisionTag::CameraName).and_then(decode_utf8)
    }

    pub fn set_camera_name(&mut self, value: Option<&str>) {
        self.set_value(VisionTag::CameraName, value.and_then(encode_utf8));
    }

    /// 相机朝向 (度)
    pub fn camera_direction(&self) -> Option<f64> {
        self.value(VisionTag::CameraDirection)
            .and_then(decode_heading)
    }

    pub fn set_camera_direction(&mut self, value: Option<f64>) {
        self.set_value(
            VisionTag::CameraDirection,
            value.map(|v| encode_heading(v).to_vec()),
        );
    }

    /// 相机纬度 (度)
    pub fn camera_lat(&self) -> Option<f64> {
        self.value(VisionTag::CameraLat)
            .and_then(|v| AngleCodec::LATITUDE.decode(v))
    }

    /// 超出 ±90 度的输入按补码回绕, 仅记录警告
    pub fn set_camera_lat(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| !AngleCodec::LATITUDE.accepts(*v)) {
            warn!("Vision: 相机纬度 {v} 超出 ±90 度, 编码后将回绕");
        }
        self.set_value(
            VisionTag::CameraLat,
            value.map(|v| AngleCodec::LATITUDE.encode(v).to_vec()),
        );
    }

    /// 相机经度 (度)
    pub fn camera_long(&self) -> Option<f64> {
        self.value(VisionTag::CameraLong)
            .and_then(|v| AngleCodec::LONGITUDE.decode(v))
    }

    /// 超出 ±180 度的输入按补码回绕, 仅记录警告
    pub fn set_camera_long(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| !AngleCodec::LONGITUDE.accepts(*v)) {
            warn!("Vision: 相机经度 {v} 超出 ±180 度, 编码后将回绕");
        }
        self.set_value(
            VisionTag::CameraLong,
            value.map(|v| AngleCodec::LONGITUDE.encode(v).to_vec()),
        );
    }

    /// 相机海拔 (米)
    pub fn camera_height(&self) -> Option<f64> {
        self.value(VisionTag::CameraHeight)
            .and_then(|v| AltitudeCodec::DEFAULT.decode(v))
    }

    pub fn set_camera_height(&mut self, value: Option<f64>) {
        self.set_value(
            VisionTag::CameraHeight,
            value.map(|v| AltitudeCodec::DEFAULT.encode(v).to_vec()),
        );
    }

    pub fn battery_remaining(&self) -> Option<u8> {
        self.value(VisionTag::BatteryRemaining)
            .and_then(decode_byte)
    }

    pub fn set_battery_remaining(&mut self, value: Option<u8>) {
        self.set_value(VisionTag::BatteryRemaining, value.map(|v| vec![v]));
    }

    pub fn storage_remaining(&self) -> Option<u8> {
        self.value(VisionTag::StorageRemaining)
            .and_then(decode_byte)
    }

    pub fn set_storage_remaining(&mut self, value: Option<u8>) {
        self.set_value(VisionTag::StorageRemaining, value.map(|v| vec![v]));
    }

    /// 版本字符串, 如 "CINVIS.17"
    pub fn vision_ver_num(&self) -> Option<String> {
        self.value(VisionTag::VisionVerNum)
            .and_then(decode_byte)
            .map(format_version)
    }

    /// 设置版本号, 接受 "CINVIS.17" 或 "17"
    pub fn set_vision_ver_num(&mut self, value: Option<&str>) -> VisionResult<()> {
        let encoded = value.map(parse_version).transpose()?;
        self.set_value(VisionTag::VisionVerNum, encoded.map(|v| vec![v]));
        Ok(())
    }

    fn value(&self, tag: VisionTag) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, entity)| entity.value())
    }

    /// 设置字段值: None 或空值移除字段, 已存在的字段原位替换
    fn set_value(&mut self, tag: VisionTag, value: Option<Vec<u8>>) {
        match value.filter(|v| !v.is_empty()) {
            Some(value) => self.put_entity(tag, LocalSetEntity::new(u32::from(tag.id()), value)),
            None => self.fields.retain(|(t, _)| *t != tag),
        }
    }

    fn put_entity(&mut self, tag: VisionTag, entity: LocalSetEntity) {
        match self.fields.iter_mut().find(|(t, _)| *t == tag) {
            Some(slot) => slot.1 = entity,
            None => self.fields.push((tag, entity)),
        }
    }
}

/// 比较内嵌校验和与重新计算的值
fn verify_checksum(source: &[u8], embedded: &[u8]) -> i32 {
    let calculated = calculate_checksum(source);
    let stored = (embedded.len() == 2).then(|| BigEndian::read_u16(embedded));
    if stored == Some(calculated) {
        i32::from(calculated)
    } else {
        debug!(
            "Vision: 校验和不匹配, stored={stored:?}, calculated={calculated:#06X}"
        );
        -i32::from(calculated)
    }
}
