//! 元数据解码器工厂.
//!
//! 从一组 universal label 实体中挑出 Vision 元数据集合并解码,
//! 其它 key 的实体静默跳过.

use log::{debug, warn};
use visklv_core::VisionResult;

use crate::entity::{UniversalLabelEntity, parse_universal_labels};
use crate::metadata::{VISION_METADATA_KEY, VisionMetadata};

/// 解码选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// 保留已识别实体的原始副本
    pub retain_known_entities: bool,
    /// 保留未识别实体
    pub retain_unknown_entities: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            retain_known_entities: false,
            retain_unknown_entities: true,
        }
    }
}

/// Vision 元数据解码器
#[derive(Debug, Default)]
pub struct VisionMetadataDecoder {
    options: DecoderOptions,
    decoded: u64,
    checksum_failures: u64,
}

impl VisionMetadataDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            options,
            decoded: 0,
            checksum_failures: 0,
        }
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    /// 是否为 Vision 元数据实体
    pub fn is_vision_entity(entity: &UniversalLabelEntity) -> bool {
        entity.key() == &VISION_METADATA_KEY
    }

    /// 解码单个实体, 不是 Vision 元数据时返回 None
    pub fn decode_entity(
        &mut self,
        entity: &UniversalLabelEntity,
    ) -> Option<VisionResult<VisionMetadata>> {
        if !Self::is_vision_entity(entity) {
            debug!("KLV: 跳过非 Vision 实体 {}", entity.key_hex());
            return None;
        }

        let result = VisionMetadata::decode(entity, &self.options);
        if let Ok(meta) = &result {
            self.decoded += 1;
            if !meta.is_checksum_valid() {
                self.checksum_failures += 1;
                warn!("Vision: 记录校验和不匹配 (checksum={})", meta.checksum());
            }
        }
        Some(result)
    }

    /// 惰性解码实体序列, 保持输入顺序
    pub fn decode_entities<'a, I>(
        &'a mut self,
        entities: I,
    ) -> impl Iterator<Item = VisionResult<VisionMetadata>> + 'a
    where
        I: IntoIterator<Item = &'a UniversalLabelEntity>,
        I::IntoIter: 'a,
    {
        entities
            .into_iter()
            .filter_map(move |entity| self.decode_entity(entity))
    }

    /// 切分原始 KLV 字节流并解码其中所有 Vision 记录
    pub fn decode_stream(&mut self, data: &[u8]) -> VisionResult<Vec<VisionMetadata>> {
        let entities = parse_universal_labels(data)?;
        self.decode_entities(&entities).collect()
    }

    /// 已成功解码的记录数
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    /// 校验和不匹配的记录数
    pub fn checksum_failure_count(&self) -> u64 {
        self.checksum_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vision_entity(event_id: &str) -> UniversalLabelEntity {
        let mut meta = VisionMetadata::new();
        meta.set_event_id(Some(event_id));
        meta.encode().unwrap()
    }

    #[test]
    fn test_工厂_跳过其它key() {
        let mut other_key = VISION_METADATA_KEY;
        other_key[15] = 0x01;
        let entities = vec![
            vision_entity("a"),
            UniversalLabelEntity::new(other_key, &[0x01, 0x02]),
            vision_entity("b"),
        ];

        let mut decoder = VisionMetadataDecoder::new(DecoderOptions::default());
        let decoded: Vec<_> = decoder
            .decode_entities(&entities)
            .collect::<VisionResult<_>>()
            .unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].event_id().as_deref(), Some("a"));
        assert_eq!(decoded[1].event_id().as_deref(), Some("b"));
        assert_eq!(decoder.decoded_count(), 2);
    }

    #[test]
    fn test_工厂_空输入() {
        let entities: Vec<UniversalLabelEntity> = Vec::new();
        let mut decoder = VisionMetadataDecoder::default();
        assert_eq!(decoder.decode_entities(&entities).count(), 0);
    }

    #[test]
    fn test_工厂_字节流解码与校验失败计数() {
        let mut stream = vision_entity("ok").source_data().to_vec();
        let mut broken = vision_entity("bad").source_data().to_vec();
        let last = broken.len() - 1;
        broken[last] ^= 0xFF;
        stream.extend_from_slice(&broken);

        let mut decoder = VisionMetadataDecoder::new(DecoderOptions::default());
        let records = decoder.decode_stream(&stream).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_checksum_valid());
        assert!(!records[1].is_checksum_valid());
        assert_eq!(decoder.checksum_failure_count(), 1);
    }
}
