//! Vision 元数据记录集成测试: JSON -> 编码 -> 实体流 -> 解码

use chrono::{TimeZone, Utc};
use visklv::codec::entity::parse_universal_labels;
use visklv::codec::json::{read_metadata_list, to_json_string};
use visklv::codec::{DecoderOptions, UniversalLabelEntity, VisionMetadata, VisionMetadataDecoder};

/// 样本记录: Timestamp + EventId("UnitTesting") + VisionVerNum(17) + Checksum
const SAMPLE: [u8; 47] = [
    0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0E, 0x0E, 0x21, 0x03, 0x01, 0x01, 0x00, 0x00, 0x00,
    0x1E, 0x02, 0x08, 0x00, 0x05, 0xF1, 0xD8, 0x05, 0x7F, 0x1D, 0xC0, 0x03, 0x0B, 0x55, 0x6E, 0x69,
    0x74, 0x54, 0x65, 0x73, 0x74, 0x69, 0x6E, 0x67, 0x63, 0x01, 0x11, 0x01, 0x02, 0x37, 0xE2,
];

/// 非 Vision 的 universal label 实体
fn foreign_entity() -> Vec<u8> {
    let mut key = [0u8; 16];
    key[..4].copy_from_slice(&[0x06, 0x0E, 0x2B, 0x34]);
    key[4..].copy_from_slice(&[0x02, 0x0B, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x01, 0x01, 0, 0, 0]);
    UniversalLabelEntity::new(key, &[0x01, 0x02, 0xAB, 0xCD])
        .source_data()
        .to_vec()
}

#[test]
fn test_实体流_挑出vision记录() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&SAMPLE);
    stream.extend_from_slice(&foreign_entity());
    stream.extend_from_slice(&SAMPLE);
    // 尾部填充
    stream.extend_from_slice(&[0xFF; 12]);

    assert_eq!(parse_universal_labels(&stream).unwrap().len(), 3);

    let mut decoder = VisionMetadataDecoder::new(DecoderOptions::default());
    let records = decoder.decode_stream(&stream).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(decoder.decoded_count(), 2);
    assert_eq!(decoder.checksum_failure_count(), 0);

    let meta = &records[0];
    assert_eq!(meta.checksum(), 0x37E2);
    assert!(meta.is_checksum_valid());
    assert_eq!(meta.event_id().as_deref(), Some("UnitTesting"));
    assert_eq!(meta.vision_ver_num().as_deref(), Some("CINVIS.17"));
    assert_eq!(
        meta.timestamp(),
        Some(Utc.with_ymd_and_hms(2023, 1, 9, 17, 23, 11).unwrap())
    );
}

#[test]
fn test_实体流_校验和损坏计数() {
    let mut corrupted = SAMPLE;
    corrupted[30] ^= 0x01;
    let mut decoder = VisionMetadataDecoder::new(DecoderOptions::default());
    let records = decoder.decode_stream(&corrupted).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].checksum() < 0);
    assert!(!records[0].is_checksum_valid());
    assert_eq!(decoder.checksum_failure_count(), 1);
}

#[test]
fn test_json记录_编码后解码一致() {
    let json = r#"[
        {
            "timestamp": "2024-03-01T08:30:00.250Z",
            "eventId": "gate-open",
            "eventStartTime": "2024-03-01T08:29:58Z",
            "cameraName": "north-gate",
            "cameraDirection": 270.5,
            "cameraLat": 39.9042,
            "cameraLong": 116.4074,
            "cameraHeight": 43.5,
            "batteryRemaining": 87,
            "storageRemaining": 12,
            "visionVerNum": "CINVIS.17"
        },
        { "eventId": "minimal" }
    ]"#;
    let records = read_metadata_list(json.as_bytes()).unwrap();
    assert_eq!(records.len(), 2);

    let mut stream = Vec::new();
    for record in &records {
        stream.extend_from_slice(record.encode().unwrap().source_data());
    }

    let mut decoder = VisionMetadataDecoder::new(DecoderOptions::default());
    let decoded = decoder.decode_stream(&stream).unwrap();
    assert_eq!(decoded.len(), 2);

    let first = &decoded[0];
    assert!(first.is_checksum_valid());
    assert_eq!(first.event_id().as_deref(), Some("gate-open"));
    assert_eq!(first.camera_name().as_deref(), Some("north-gate"));
    assert_eq!(first.battery_remaining(), Some(87));
    assert_eq!(first.storage_remaining(), Some(12));
    assert_eq!(first.vision_ver_num().as_deref(), Some("CINVIS.17"));
    assert_eq!(
        first.timestamp(),
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap() + chrono::Duration::milliseconds(250))
    );
    assert!((first.camera_lat().unwrap() - 39.9042).abs() < 1e-6);
    assert!((first.camera_long().unwrap() - 116.4074).abs() < 1e-6);
    assert!((first.camera_height().unwrap() - 43.5).abs() < 0.2);
    assert!((first.camera_direction().unwrap() - 270.5).abs() < 0.01);

    let second = &decoded[1];
    assert_eq!(second.event_id().as_deref(), Some("minimal"));
    assert!(second.camera_name().is_none());
}

#[test]
fn test_json输出_含校验和与未知标签() {
    let mut data = SAMPLE.to_vec();
    // 追加未知标签 0x50 并重写长度与校验和
    let checksum_at = data.len() - 4;
    data.splice(checksum_at..checksum_at, [0x50, 0x01, 0x2A]);
    data[16] += 3;
    let bcc = visklv::codec::metadata::calculate_checksum(&data);
    let n = data.len();
    data[n - 2..].copy_from_slice(&bcc.to_be_bytes());

    let options = DecoderOptions {
        retain_known_entities: true,
        retain_unknown_entities: true,
    };
    let mut decoder = VisionMetadataDecoder::new(options);
    let meta: VisionMetadata = decoder.decode_stream(&data).unwrap().remove(0);
    assert!(meta.is_checksum_valid());
    assert_eq!(meta.unknown_entities().len(), 1);

    let value: serde_json::Value =
        serde_json::from_str(&to_json_string(&meta, false).unwrap()).unwrap();
    assert_eq!(value["checksum"], i64::from(bcc));
    assert_eq!(value["eventId"], "UnitTesting");
    assert_eq!(value["unknownTags"][0]["tagId"], 0x50);
    assert_eq!(value["knownTags"]["EventId"]["tagId"], 3);
}
