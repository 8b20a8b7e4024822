//! KLV PID 复用器.
//!
//! 对已有的 MPEG-TS 做两遍处理:
//! 1. 扫描: 找到默认节目的 PMT, 确认补丁后仍能容纳在单个包中
//! 2. 复用: 回到开头逐包输出; PMT 包追加 KLV 流描述,
//!    按 PCR 节拍生成 KLV 包并替换空包
//!
//! 输入中的空包带宽决定了可注入的 KLV 数据量, 输出包数与输入一致.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use visklv_codec::VisionMetadata;
use visklv_core::{VisionError, VisionResult};

use crate::packet::{
    AdaptationField, PID_NULL, PID_PAT, TS_PACKET_SIZE, TS_SYNC_BYTE, TsHeader, payload_offset,
};
use crate::patch::patch_pmt_packet;
use crate::pes::PES_START_CODE;
use crate::psi::{
    Descriptor, EsInfo, KLVA_FORMAT_IDENTIFIER, ProgramMapTable, PsiTracker,
    STREAM_TYPE_PRIVATE_PES, section_offset,
};
use crate::scheduler::{ClockSample, KlvInjectionScheduler};

/// 注入记录的版本号
pub const INJECTED_VERSION: &str = "17";

/// 复用参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlvMuxOptions {
    /// KLV 流 PID
    pub klv_pid: u16,
    /// 相邻两条记录的间隔
    pub interval_ms: u64,
    /// 待输出 KLV 包的缓冲上限
    pub buffer_capacity: usize,
    /// PMT 中声明的 stream_type
    pub stream_type: u8,
    /// 注册描述符的 format_identifier
    pub format_identifier: [u8; 4],
}

impl KlvMuxOptions {
    pub fn new(klv_pid: u16) -> Self {
        Self {
            klv_pid,
            interval_ms: 100,
            buffer_capacity: 1000,
            stream_type: STREAM_TYPE_PRIVATE_PES,
            format_identifier: KLVA_FORMAT_IDENTIFIER,
        }
    }

    /// 补丁插入的 ES 条目
    pub fn es_info(&self) -> EsInfo {
        EsInfo {
            stream_type: self.stream_type,
            elementary_pid: self.klv_pid,
            descriptors: vec![Descriptor::Registration {
                format_identifier: self.format_identifier,
            }],
        }
    }

    fn validate(&self) -> VisionResult<()> {
        if self.klv_pid == PID_PAT || self.klv_pid >= PID_NULL {
            return Err(VisionError::InvalidArgument(format!(
                "KLV PID {:#06X} 不可用",
                self.klv_pid
            )));
        }
        if self.interval_ms == 0 {
            return Err(VisionError::InvalidArgument("注入间隔不能为 0".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(VisionError::InvalidArgument("缓冲区容量不能为 0".into()));
        }
        Ok(())
    }
}

/// 复用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// 输出包数
    pub packets: u64,
    /// 补丁的 PMT 包数
    pub pmt_patched: u64,
    /// 到期调度的记录数
    pub records_scheduled: u64,
    /// 替换空包输出的 KLV 包数
    pub klv_packets: u64,
}

/// 为注入准备记录: 设置版本号与事件开始时间
pub fn stamp_records(records: &mut [VisionMetadata], now: DateTime<Utc>) -> VisionResult<()> {
    for record in records {
        record.set_vision_ver_num(Some(INJECTED_VERSION))?;
        record.set_event_start_time(Some(now));
    }
    Ok(())
}

/// 从输入读取一个完整 TS 包
///
/// 流结束返回 None, 末尾不足一个包的残余数据被丢弃.
pub fn read_packet<R: Read>(reader: &mut R) -> VisionResult<Option<[u8; TS_PACKET_SIZE]>> {
    let mut pkt = [0u8; TS_PACKET_SIZE];
    let mut filled = 0usize;
    while filled < TS_PACKET_SIZE {
        match reader.read(&mut pkt[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(None),
        TS_PACKET_SIZE if pkt[0] == TS_SYNC_BYTE => Ok(Some(pkt)),
        TS_PACKET_SIZE => Err(VisionError::InvalidData(format!(
            "TS: 同步字节不匹配 ({:#04X})",
            pkt[0]
        ))),
        partial => {
            warn!("TS: 丢弃末尾不完整的包 ({partial} 字节)");
            Ok(None)
        }
    }
}

/// KLV PID 复用器
#[derive(Debug)]
pub struct KlvPidMuxer {
    options: KlvMuxOptions,
    es_info: Vec<u8>,
    tracker: PsiTracker,
    pmt: Option<ProgramMapTable>,
    scheduler: KlvInjectionScheduler,
    stats: MuxStats,
}

impl KlvPidMuxer {
    pub fn new(options: KlvMuxOptions, records: Vec<VisionMetadata>) -> VisionResult<Self> {
        options.validate()?;
        let es_info = options.es_info().to_bytes();
        let scheduler = KlvInjectionScheduler::new(
            options.klv_pid,
            options.interval_ms,
            options.buffer_capacity,
            records,
        );
        Ok(Self {
            options,
            es_info,
            tracker: PsiTracker::new(),
            pmt: None,
            scheduler,
            stats: MuxStats::default(),
        })
    }

    pub fn options(&self) -> &KlvMuxOptions {
        &self.options
    }

    /// 补丁前的 PMT (扫描完成后可用)
    pub fn program_table(&self) -> Option<&ProgramMapTable> {
        self.pmt.as_ref()
    }

    pub fn scheduler(&self) -> &KlvInjectionScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> MuxStats {
        self.stats
    }

    /// 第一遍: 扫描默认节目的 PMT
    ///
    /// 读到结尾仍未找到时返回 NoProgramTable.
    pub fn scan<R: Read>(&mut self, reader: &mut R) -> VisionResult<&ProgramMapTable> {
        let mut scanned = 0u64;
        while let Some(pkt) = read_packet(reader)? {
            scanned += 1;
            if !self.tracker.push_packet(&pkt)? {
                continue;
            }
            let Some(pmt) = self.tracker.pmt() else {
                continue;
            };
            self.check_program_table(pmt)?;
            info!(
                "TS 扫描: 第 {scanned} 包找到 PMT (PID={:#06X}, program={}, PCR_PID={:#06X})",
                pmt.pid, pmt.program_number, pmt.pcr_pid
            );
            self.pmt = Some(pmt.clone());
            return self.pmt.as_ref().ok_or(VisionError::NoProgramTable);
        }
        Err(VisionError::NoProgramTable)
    }

    fn check_program_table(&self, pmt: &ProgramMapTable) -> VisionResult<()> {
        if pmt.find_stream(self.options.klv_pid).is_some() || pmt.pid == self.options.klv_pid {
            return Err(VisionError::InvalidArgument(format!(
                "KLV PID {:#06X} 已被节目占用",
                self.options.klv_pid
            )));
        }
        // 4 字节 TS 包头 + pointer_field
        let available = TS_PACKET_SIZE - 5;
        let needed = 3 + pmt.section_length + self.es_info.len();
        if needed > available {
            return Err(VisionError::SectionTooLarge {
                size: needed,
                max: available,
            });
        }
        Ok(())
    }

    /// 第二遍: 处理一个包
    ///
    /// 包会被原地修改 (PMT 补丁或 KLV 替换空包).
    /// 首个 PMT 包补丁成功后调度器才进入 Armed.
    pub fn process_packet(&mut self, packet: &mut [u8; TS_PACKET_SIZE]) -> VisionResult<()> {
        let (pmt_pid, pcr_pid) = self
            .pmt
            .as_ref()
            .map(|p| (p.pid, p.pcr_pid))
            .ok_or(VisionError::NoProgramTable)?;
        let header = TsHeader::parse(&packet[..])?;

        if header.pid == pmt_pid && header.pusi {
            if !self.pmt_declares_klv(&packet[..]) {
                patch_pmt_packet(&mut packet[..], &self.es_info)?;
                self.stats.pmt_patched += 1;
            }
            self.scheduler.arm();
        }

        if header.pid == pcr_pid {
            if let Some(af) = AdaptationField::parse(&packet[..], &header) {
                if let Some(pcr) = af.pcr {
                    self.scheduler.observe_clock(ClockSample {
                        pcr,
                        discontinuity: af.discontinuity,
                    });
                }
            }
        }

        if header.pusi && starts_pes(&packet[..], &header) && self.scheduler.poll()? {
            self.stats.records_scheduled += 1;
        }

        if self.scheduler.substitute(packet) {
            self.stats.klv_packets += 1;
        }
        self.stats.packets += 1;
        Ok(())
    }

    /// 该 PMT 包是否已声明 KLV PID
    fn pmt_declares_klv(&self, packet: &[u8]) -> bool {
        let Ok(header) = TsHeader::parse(packet) else {
            return false;
        };
        section_offset(packet, &header)
            .and_then(|off| ProgramMapTable::parse(header.pid, &packet[off..]).ok())
            .is_some_and(|pmt| pmt.find_stream(self.options.klv_pid).is_some())
    }

    /// 完整的两遍复用
    pub fn mux<R: Read + Seek, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
    ) -> VisionResult<MuxStats> {
        self.scan(reader)?;
        reader.seek(SeekFrom::Start(0))?;

        for packet in self.packets(reader) {
            writer.write_all(&packet?)?;
        }
        writer.flush()?;

        info!(
            "KLV 复用完成: {} 包, PMT 补丁 {} 次, 调度记录 {} 条, KLV 包 {} 个, 丢弃 {} 个",
            self.stats.packets,
            self.stats.pmt_patched,
            self.stats.records_scheduled,
            self.stats.klv_packets,
            self.scheduler.dropped_packets()
        );
        Ok(self.stats)
    }

    /// 拉取式输出: 逐包读取并处理
    ///
    /// 需在 [`scan`](Self::scan) 之后使用, reader 应已回到流开头.
    pub fn packets<'a, R: Read>(&'a mut self, reader: &'a mut R) -> MuxedPackets<'a, R> {
        MuxedPackets {
            muxer: self,
            reader,
            done: false,
        }
    }
}

fn starts_pes(packet: &[u8], header: &TsHeader) -> bool {
    payload_offset(packet, header)
        .and_then(|off| packet.get(off..off + PES_START_CODE.len()))
        .is_some_and(|prefix| prefix == PES_START_CODE)
}

/// 复用输出迭代器
pub struct MuxedPackets<'a, R> {
    muxer: &'a mut KlvPidMuxer,
    reader: &'a mut R,
    done: bool,
}

impl<R: Read> Iterator for MuxedPackets<'_, R> {
    type Item = VisionResult<[u8; TS_PACKET_SIZE]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = read_packet(self.reader).and_then(|pkt| match pkt {
            Some(mut pkt) => self.muxer.process_packet(&mut pkt).map(|()| Some(pkt)),
            None => Ok(None),
        });
        match result {
            Ok(Some(pkt)) => Some(Ok(pkt)),
            Ok(None) => {
                debug!("KLV 复用: 输入结束");
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
