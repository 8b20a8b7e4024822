//! visklv-mux - Vision KLV 注入工具
//!
//! 读取 JSON 数组形式的 Vision 元数据记录, 在已有 MPEG-TS 的默认节目中
//! 追加一条异步 KLV 数据流, 按 PCR 节拍用 KLV 包替换空包.

mod logging;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{ArgAction, Parser};
use log::info;

use visklv_codec::json::read_metadata_list;
use visklv_format::{KlvMuxOptions, KlvPidMuxer, MuxStats, stamp_records};

#[derive(Parser, Debug)]
#[command(name = "visklv-mux", version, about = "为 MPEG-TS 注入 Vision KLV 元数据")]
struct Cli {
    /// 输入视频 TS 文件
    #[arg(short = 'v', long = "video")]
    video: PathBuf,

    /// KLV 记录 JSON 文件 (记录数组)
    #[arg(short = 'k', long = "klv")]
    klv: PathBuf,

    /// KLV 流 PID (十进制或 0x 前缀十六进制)
    #[arg(short = 'a', long = "pid", value_parser = parse_pid)]
    pid: u16,

    /// 输出 TS 文件
    #[arg(short = 'f', long = "output")]
    output: PathBuf,

    /// 相邻记录的注入间隔 (毫秒)
    #[arg(long = "interval-ms", default_value_t = 100)]
    interval_ms: u64,

    /// 待输出 KLV 包的缓冲上限
    #[arg(long = "buffer", default_value_t = 1000)]
    buffer_capacity: usize,

    /// 覆盖已存在的输出文件
    #[arg(short = 'y')]
    overwrite: bool,

    /// 控制台只输出错误
    #[arg(short, long)]
    silent: bool,

    /// 日志文件详细程度 (--verbose / --verbose --verbose)
    #[arg(long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn parse_pid(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    }
    .map_err(|e| format!("无效的 PID '{s}': {e}"))?;
    if value == 0 || value >= 0x1FFF {
        return Err(format!("PID {value:#06X} 超出可用范围 (0x0001..0x1FFE)"));
    }
    Ok(value)
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init("visklv-mux", cli.verbose, cli.silent) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }

    if cli.output.exists() && !cli.overwrite {
        eprintln!(
            "错误: 输出文件已存在 '{}', 使用 -y 覆盖",
            cli.output.display()
        );
        process::exit(1);
    }

    match run(&cli) {
        Ok(stats) => {
            if !cli.silent {
                eprintln!(
                    "完成: {} 包, 注入 {} 条记录 ({} 个 KLV 包)",
                    stats.packets, stats.records_scheduled, stats.klv_packets
                );
            }
        }
        Err(e) => {
            eprintln!("错误: {e:#}");
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<MuxStats> {
    let mut records = load_records(&cli.klv)?;
    stamp_records(&mut records, Utc::now())?;
    info!(
        "输入: {}, KLV: {} ({} 条), PID={:#06X}",
        cli.video.display(),
        cli.klv.display(),
        records.len(),
        cli.pid
    );

    let options = KlvMuxOptions {
        interval_ms: cli.interval_ms,
        buffer_capacity: cli.buffer_capacity,
        ..KlvMuxOptions::new(cli.pid)
    };
    mux_file(&cli.video, &cli.output, options, records)
}

fn load_records(path: &Path) -> anyhow::Result<Vec<visklv_codec::VisionMetadata>> {
    let file =
        File::open(path).with_context(|| format!("无法打开 KLV 文件 '{}'", path.display()))?;
    let records = read_metadata_list(BufReader::new(file))
        .with_context(|| format!("无法解析 KLV 文件 '{}'", path.display()))?;
    if records.is_empty() {
        bail!("KLV 文件 '{}' 中没有记录", path.display());
    }
    Ok(records)
}

fn mux_file(
    input: &Path,
    output: &Path,
    options: KlvMuxOptions,
    records: Vec<visklv_codec::VisionMetadata>,
) -> anyhow::Result<MuxStats> {
    let mut reader = BufReader::new(
        File::open(input).with_context(|| format!("无法打开输入文件 '{}'", input.display()))?,
    );
    let mut writer = BufWriter::new(
        File::create(output)
            .with_context(|| format!("无法创建输出文件 '{}'", output.display()))?,
    );
    let mut muxer = KlvPidMuxer::new(options, records)?;
    let stats = muxer.mux(&mut reader, &mut writer)?;
    Ok(stats)
}
