//! visklv-dump - Vision KLV 导出工具
//!
//! 解复用 MPEG-TS, 解码 KLV 流中的 Vision 元数据记录以及视频 SEI 中的
//! 帧时间戳, 以 JSON 输出.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process;

use chrono::{DateTime, Utc};
use clap::Parser;
use log::warn;
use serde::Serialize;

use visklv_codec::sei::find_frame_timestamps;
use visklv_codec::{
    DecoderOptions, TimestampKind, VisionMetadata, VisionMetadataDecoder, VisionMetadataJson,
};
use visklv_core::VisionResult;
use visklv_format::muxer::read_packet;
use visklv_format::{DemuxEvent, KlvTsDemuxer};

#[derive(Parser, Debug)]
#[command(name = "visklv-dump", version, about = "导出 TS 中的 Vision KLV 元数据与帧时间戳")]
struct Cli {
    /// 输入 TS 文件
    input: PathBuf,

    /// 输出目录, 写入 {文件名}.json; 未指定时输出到 stdout
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// 每条记录一行的摘要输出
    #[arg(long)]
    summary: bool,

    /// 保留已知标签的原始实体
    #[arg(long)]
    keep_known: bool,

    /// 丢弃未知标签
    #[arg(long)]
    drop_unknown: bool,

    /// 不提取视频帧时间戳
    #[arg(long)]
    no_timestamps: bool,

    /// 紧凑 JSON
    #[arg(long)]
    compact: bool,
}

// ============================================================
// JSON 输出结构体
// ============================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DumpOutput {
    records: Vec<RecordEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    timestamps: Vec<TimestampEntry>,
    checksum_failures: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordEntry {
    pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pts: Option<u64>,
    metadata: VisionMetadataJson,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimestampEntry {
    pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pts: Option<u64>,
    kind: TimestampKind,
    lock: u8,
    value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<DateTime<Utc>>,
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let file = match File::open(&cli.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("错误: 无法打开文件 '{}': {e}", cli.input.display());
            process::exit(1);
        }
    };

    let options = DecoderOptions {
        retain_known_entities: cli.keep_known,
        retain_unknown_entities: !cli.drop_unknown,
    };
    let output = match dump(BufReader::new(file), options, !cli.no_timestamps) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("错误: 解析 '{}' 失败: {e}", cli.input.display());
            process::exit(1);
        }
    };

    let text = if cli.summary {
        output
            .records
            .iter()
            .map(summary_line)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        let result = if cli.compact {
            serde_json::to_string(&output)
        } else {
            serde_json::to_string_pretty(&output)
        };
        match result {
            Ok(s) => s,
            Err(e) => {
                eprintln!("错误: JSON 序列化失败: {e}");
                process::exit(1);
            }
        }
    };

    match &cli.output_dir {
        Some(dir) => {
            let path = output_path(dir, &cli.input, cli.summary);
            if let Err(e) = std::fs::write(&path, text + "\n") {
                eprintln!("错误: 无法写入 '{}': {e}", path.display());
                process::exit(1);
            }
            eprintln!(
                "{} 条记录, {} 个帧时间戳 -> {}",
                output.records.len(),
                output.timestamps.len(),
                path.display()
            );
        }
        None => println!("{text}"),
    }
}

/// 解复用并解码整个输入
fn dump<R: Read>(
    mut reader: R,
    options: DecoderOptions,
    with_timestamps: bool,
) -> VisionResult<DumpOutput> {
    let mut demuxer = KlvTsDemuxer::new();
    let mut decoder = VisionMetadataDecoder::new(options);
    let mut output = DumpOutput {
        records: Vec::new(),
        timestamps: Vec::new(),
        checksum_failures: 0,
    };

    while let Some(packet) = read_packet(&mut reader)? {
        demuxer.push_packet(&packet)?;
        drain_events(&mut demuxer, &mut decoder, with_timestamps, &mut output);
    }
    demuxer.flush();
    drain_events(&mut demuxer, &mut decoder, with_timestamps, &mut output);

    output.checksum_failures = decoder.checksum_failure_count();
    Ok(output)
}

fn drain_events(
    demuxer: &mut KlvTsDemuxer,
    decoder: &mut VisionMetadataDecoder,
    with_timestamps: bool,
    output: &mut DumpOutput,
) {
    while let Some(event) = demuxer.next_event() {
        match event {
            DemuxEvent::Klv { pid, pts, entities } => {
                for result in decoder.decode_entities(&entities) {
                    match result {
                        Ok(meta) => output.records.push(record_entry(pid, pts, meta)),
                        Err(e) => warn!("PID={pid:#06X} 记录解码失败: {e}"),
                    }
                }
            }
            DemuxEvent::Video {
                pid,
                codec,
                pts,
                data,
            } => {
                if !with_timestamps {
                    continue;
                }
                for ts in find_frame_timestamps(&data, codec) {
                    output.timestamps.push(TimestampEntry {
                        pid,
                        pts,
                        kind: ts.kind(),
                        lock: ts.lock(),
                        value: ts.value(),
                        time: ts.datetime(),
                    });
                }
            }
        }
    }
}

fn summary_line(entry: &RecordEntry) -> String {
    let meta = &entry.metadata;
    let checksum = match meta.checksum {
        Some(c) if c >= 0 => "ok",
        Some(_) => "BAD",
        None => "-",
    };
    format!(
        "pid={:#06X} pts={} checksum={} event={} camera={} time={}",
        entry.pid,
        entry.pts.map_or_else(|| "-".to_string(), |p| p.to_string()),
        checksum,
        meta.event_id.as_deref().unwrap_or("-"),
        meta.camera_name.as_deref().unwrap_or("-"),
        meta.timestamp
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
    )
}

fn output_path(dir: &Path, input: &Path, summary: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".into(), |s| s.to_string_lossy().into_owned());
    let ext = if summary { "txt" } else { "json" };
    dir.join(format!("{stem}.{ext}"))
}

fn record_entry(pid: u16, pts: Option<u64>, meta: VisionMetadata) -> RecordEntry {
    RecordEntry {
        pid,
        pts,
        metadata: VisionMetadataJson::from(meta),
    }
}
