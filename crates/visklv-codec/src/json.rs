//! Vision 元数据的 JSON 表示.
//!
//! 字段名使用 camelCase, 值为 None 的字段不输出.
//! `checksum`/`knownTags`/`unknownTags` 只在输出时有意义, 读取时忽略.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use visklv_core::{VisionError, VisionResult};

use crate::entity::{LocalSetEntity, format_hex};
use crate::metadata::{CHECKSUM_UNVERIFIED, VisionMetadata};

/// 单个 local set 实体的 JSON 表示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityJson {
    pub tag_id: u32,
    /// 值的十六进制表示
    pub value: String,
}

impl From<&LocalSetEntity> for EntityJson {
    fn from(entity: &LocalSetEntity) -> Self {
        Self {
            tag_id: entity.tag_id(),
            value: format_hex(entity.value()),
        }
    }
}

/// Vision 元数据的 JSON 形态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisionMetadataJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_direction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_long: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_remaining: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_remaining: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_ver_num: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub known_tags: BTreeMap<String, EntityJson>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_tags: Vec<EntityJson>,
}

impl From<VisionMetadata> for VisionMetadataJson {
    fn from(meta: VisionMetadata) -> Self {
        Self {
            checksum: (meta.checksum() != CHECKSUM_UNVERIFIED).then_some(meta.checksum()),
            timestamp: meta.timestamp(),
            event_id: meta.event_id(),
            event_start_time: meta.event_start_time(),
            camera_name: meta.camera_name(),
            camera_direction: meta.camera_direction(),
            camera_lat: meta.camera_lat(),
            camera_long: meta.camera_long(),
            camera_height: meta.camera_height(),
            battery_remaining: meta.battery_remaining(),
            storage_remaining: meta.storage_remaining(),
            vision_ver_num: meta.vision_ver_num(),
            known_tags: meta
                .known_entities()
                .iter()
                .map(|(name, entity)| (name.clone(), EntityJson::from(entity)))
                .collect(),
            unknown_tags: meta.unknown_entities().iter().map(EntityJson::from).collect(),
        }
    }
}

impl TryFrom<VisionMetadataJson> for VisionMetadata {
    type Error = VisionError;

    fn try_from(json: VisionMetadataJson) -> VisionResult<Self> {
        let mut meta = VisionMetadata::new();
        meta.set_timestamp(json.timestamp);
        meta.set_event_id(json.event_id.as_deref());
        meta.set_event_start_time(json.event_start_time);
        meta.set_camera_name(json.camera_name.as_deref());
        meta.set_camera_direction(json.camera_direction);
        meta.set_camera_lat(json.camera_lat);
        meta.set_camera_long(json.camera_long);
        meta.set_camera_height(json.camera_height);
        meta.set_battery_remaining(json.battery_remaining);
        meta.set_storage_remaining(json.storage_remaining);
        meta.set_vision_ver_num(json.vision_ver_num.as_deref())?;
        Ok(meta)
    }
}

impl Serialize for VisionMetadata {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VisionMetadataJson::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VisionMetadata {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = VisionMetadataJson::deserialize(deserializer)?;
        VisionMetadata::try_from(json).map_err(serde::de::Error::custom)
    }
}

/// 从 JSON 数组读取记录列表
pub fn read_metadata_list<R: Read>(reader: R) -> VisionResult<Vec<VisionMetadata>> {
    serde_json::from_reader(reader).map_err(|e| VisionError::Json(e.to_string()))
}

/// 将单条记录序列化为 JSON 字符串
pub fn to_json_string(meta: &VisionMetadata, pretty: bool) -> VisionResult<String> {
    let result = if pretty {
        serde_json::to_string_pretty(meta)
    } else {
        serde_json::to_string(meta)
    };
    result.map_err(|e| VisionError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderOptions;
    use chrono::TimeZone;

    #[test]
    fn test_json_camel_case且省略空字段() {
        let mut meta = VisionMetadata::new();
        meta.set_event_id(Some("UnitTesting"));
        meta.set_battery_remaining(Some(50));
        let json = to_json_string(&meta, false).unwrap();
        assert_eq!(json, r#"{"eventId":"UnitTesting","batteryRemaining":50}"#);
    }

    #[test]
    fn test_json_读取记录列表() {
        let text = r#"[
            {"timestamp":"2023-01-09T17:23:11Z","eventId":"e1","cameraLat":51.5,"visionVerNum":"CINVIS.3"},
            {"eventId":"e2","checksum":1234,"unknownTags":[]}
        ]"#;
        let list = read_metadata_list(text.as_bytes()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(
            list[0].timestamp(),
            Some(Utc.with_ymd_and_hms(2023, 1, 9, 17, 23, 11).unwrap())
        );
        assert_eq!(list[0].vision_ver_num().as_deref(), Some("CINVIS.3"));
        assert_eq!(list[1].checksum(), CHECKSUM_UNVERIFIED);
    }

    #[test]
    fn test_json_版本号格式错误() {
        let text = r#"[{"visionVerNum":"CINVIS.999"}]"#;
        assert!(matches!(
            read_metadata_list(text.as_bytes()),
            Err(VisionError::Json(_))
        ));
    }

    #[test]
    fn test_json_输出校验和与未知实体() {
        let mut meta = VisionMetadata::new();
        meta.set_event_id(Some("x"));
        let entity = meta.encode().unwrap();
        let decoded = VisionMetadata::decode(
            &entity,
            &DecoderOptions {
                retain_known_entities: true,
                retain_unknown_entities: true,
            },
        )
        .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&to_json_string(&decoded, true).unwrap()).unwrap();
        assert_eq!(value["checksum"].as_i64(), Some(i64::from(decoded.checksum())));
        assert_eq!(value["knownTags"]["EventId"]["tagId"].as_u64(), Some(3));
        assert!(value.get("unknownTags").is_none());
    }
}
