//! KLV / 视频 PES 解复用.
//!
//! 跟踪默认节目的 PMT, 把 KLV 流与 H.264/H.265 视频流的 PES 重组出来.
//! KLV 流输出切分后的 universal label 实体, 视频流输出访问单元原始数据.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use log::{debug, trace};
use visklv_codec::entity::{UniversalLabelEntity, parse_universal_labels};
use visklv_codec::sei::VideoCodec;
use visklv_core::{VisionError, VisionResult};

use crate::packet::{PID_NULL, TsHeader, payload_offset};
use crate::pes::parse_pes;
use crate::psi::{EsInfo, PsiTracker, STREAM_TYPE_H264, STREAM_TYPE_H265};

/// 解复用事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// 一个 KLV PES 中的全部实体
    Klv {
        pid: u16,
        pts: Option<u64>,
        entities: Vec<UniversalLabelEntity>,
    },
    /// 一个视频访问单元 (Annex B)
    Video {
        pid: u16,
        codec: VideoCodec,
        pts: Option<u64>,
        data: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EsKind {
    Klv,
    Video(VideoCodec),
}

impl EsKind {
    fn classify(es: &EsInfo) -> Option<Self> {
        if es.is_klv() {
            return Some(Self::Klv);
        }
        match es.stream_type {
            STREAM_TYPE_H264 => Some(Self::Video(VideoCodec::H264)),
            STREAM_TYPE_H265 => Some(Self::Video(VideoCodec::H265)),
            _ => None,
        }
    }
}

/// PES 重组缓冲区
#[derive(Debug)]
struct PesBuffer {
    kind: EsKind,
    data: Vec<u8>,
}

/// KLV TS 解复用器
#[derive(Debug, Default)]
pub struct KlvTsDemuxer {
    tracker: PsiTracker,
    buffers: HashMap<u16, PesBuffer>,
    events: VecDeque<DemuxEvent>,
    packets: u64,
}

impl KlvTsDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已处理的包数
    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    /// 当前跟踪的 KLV PID 列表
    pub fn klv_pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.kind == EsKind::Klv)
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// 处理一个 TS 包
    pub fn push_packet(&mut self, pkt: &[u8]) -> VisionResult<()> {
        self.packets += 1;
        let header = TsHeader::parse(pkt)?;
        if header.pid == PID_NULL || header.transport_error {
            return Ok(());
        }

        match self.tracker.push_packet(pkt) {
            Ok(true) => self.register_streams(),
            Ok(false) => {}
            Err(VisionError::UnsupportedFragmentedTable) => {
                debug!("TS: 跳过跨包的 PMT (PID={:#06X})", header.pid);
            }
            Err(e) => return Err(e),
        }

        if !self.buffers.contains_key(&header.pid) {
            return Ok(());
        }
        let Some(offset) = payload_offset(pkt, &header) else {
            return Ok(());
        };

        if header.pusi {
            // Payload Unit Start: 先 flush 旧数据, 再开始新 PES
            self.flush_pid(header.pid);
        }
        if let Some(buf) = self.buffers.get_mut(&header.pid) {
            if header.pusi || !buf.data.is_empty() {
                buf.data.extend_from_slice(&pkt[offset..]);
            }
        }
        Ok(())
    }

    /// 输入结束, 刷新全部未完成的 PES
    pub fn flush(&mut self) {
        let mut pids: Vec<u16> = self.buffers.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            self.flush_pid(pid);
        }
    }

    /// 取出下一个事件
    pub fn next_event(&mut self) -> Option<DemuxEvent> {
        self.events.pop_front()
    }

    fn register_streams(&mut self) {
        let Some(pmt) = self.tracker.pmt() else {
            return;
        };
        for es in &pmt.streams {
            let Some(kind) = EsKind::classify(es) else {
                continue;
            };
            self.buffers.entry(es.elementary_pid).or_insert_with(|| {
                debug!("TS: 跟踪 PID={:#06X} ({kind:?})", es.elementary_pid);
                PesBuffer {
                    kind,
                    data: Vec::new(),
                }
            });
        }
    }

    fn flush_pid(&mut self, pid: u16) {
        let Some(buf) = self.buffers.get_mut(&pid) else {
            return;
        };
        if buf.data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut buf.data);
        let kind = buf.kind;

        let Some(pes) = parse_pes(&data) else {
            trace!("TS: PID={pid:#06X} 丢弃无效 PES ({} 字节)", data.len());
            return;
        };

        match kind {
            EsKind::Klv => match parse_universal_labels(pes.payload) {
                Ok(entities) => self.events.push_back(DemuxEvent::Klv {
                    pid,
                    pts: pes.pts,
                    entities,
                }),
                Err(e) => debug!("TS: PID={pid:#06X} KLV 负载无法切分, {e}"),
            },
            EsKind::Video(codec) => self.events.push_back(DemuxEvent::Video {
                pid,
                codec,
                pts: pes.pts,
                data: Bytes::copy_from_slice(pes.payload),
            }),
        }
    }
}
