//! visklv 性能基准测试.
//!
//! 覆盖校验和、元数据编解码与 SEI 时间戳提取路径.

use chrono::{TimeZone, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use visklv::codec::sei::{build_timestamp_sei, find_frame_timestamps};
use visklv::codec::timestamp::DEFAULT_LOCK;
use visklv::codec::{
    DecoderOptions, FrameTimestamp, TimestampKind, VideoCodec, VisionMetadata,
    VisionMetadataDecoder,
};
use visklv::core::crc::{bcc16, crc32_mpeg2};

/// 填满常用字段的记录
fn make_record() -> VisionMetadata {
    let mut meta = VisionMetadata::new();
    meta.set_timestamp(Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()));
    meta.set_event_id(Some("bench-event"));
    meta.set_event_start_time(Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    meta.set_camera_name(Some("north-gate"));
    meta.set_camera_direction(Some(270.5));
    meta.set_camera_lat(Some(39.9042));
    meta.set_camera_long(Some(116.4074));
    meta.set_camera_height(Some(43.5));
    meta.set_battery_remaining(Some(87));
    meta.set_storage_remaining(Some(12));
    meta.set_vision_ver_num(Some("CINVIS.17")).unwrap();
    meta
}

fn bench_checksums(c: &mut Criterion) {
    let data: Vec<u8> = (0..=255u8).collect();
    c.bench_function("bcc16_256", |b| b.iter(|| bcc16(black_box(&data))));
    c.bench_function("crc32_mpeg2_256", |b| b.iter(|| crc32_mpeg2(black_box(&data))));
}

fn bench_metadata(c: &mut Criterion) {
    let record = make_record();
    c.bench_function("vision_metadata_encode", |b| {
        b.iter(|| black_box(&record).encode().unwrap())
    });

    let mut stream = Vec::new();
    for _ in 0..16 {
        stream.extend_from_slice(record.encode().unwrap().source_data());
    }
    c.bench_function("vision_metadata_decode_16", |b| {
        b.iter(|| {
            let mut decoder = VisionMetadataDecoder::new(DecoderOptions::default());
            decoder.decode_stream(black_box(&stream)).unwrap()
        })
    });
}

fn bench_sei(c: &mut Criterion) {
    let ts = FrameTimestamp::new(TimestampKind::Microsecond, 1_660_330_617_961_234, DEFAULT_LOCK)
        .unwrap();
    let mut au = vec![0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];
    au.extend_from_slice(&build_timestamp_sei(&ts, VideoCodec::H264));
    au.extend_from_slice(&[0x00, 0x00, 0x01, 0x65]);
    au.extend(std::iter::repeat_n(0xA5u8, 4096));

    c.bench_function("sei_find_frame_timestamps_4k", |b| {
        b.iter(|| find_frame_timestamps(black_box(&au), VideoCodec::H264))
    });
}

criterion_group!(benches, bench_checksums, bench_metadata, bench_sei);
criterion_main!(benches);
