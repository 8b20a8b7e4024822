//! PSI (Program Specific Information) 表解析.
//!
//! - PAT: program_number -> PMT PID
//! - PMT: 节目的 PCR PID 与基本流列表
//!
//! 只处理完整容纳在单个 TS 包中的 section.

use log::{debug, warn};
use visklv_core::crc::crc32_mpeg2;
use visklv_core::{VisionError, VisionResult};

use crate::packet::{PID_PAT, TsHeader, payload_offset};

/// PAT table_id
pub const TABLE_ID_PAT: u8 = 0x00;
/// PMT table_id
pub const TABLE_ID_PMT: u8 = 0x02;

/// PES 私有数据
pub const STREAM_TYPE_PRIVATE_PES: u8 = 0x06;
/// PES 承载的元数据
pub const STREAM_TYPE_METADATA_PES: u8 = 0x15;
/// H.264 视频
pub const STREAM_TYPE_H264: u8 = 0x1B;
/// H.265 视频
pub const STREAM_TYPE_H265: u8 = 0x24;

/// registration_descriptor tag
pub const DESCRIPTOR_TAG_REGISTRATION: u8 = 0x05;

/// KLV 的 format_identifier
pub const KLVA_FORMAT_IDENTIFIER: [u8; 4] = *b"KLVA";

/// section 头部长度 (table_id + section_length)
const SECTION_HEADER_SIZE: usize = 3;
/// CRC32 长度
const CRC_SIZE: usize = 4;

/// 描述符
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Registration { format_identifier: [u8; 4] },
    Other { tag: u8, data: Vec<u8> },
}

impl Descriptor {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Registration { .. } => DESCRIPTOR_TAG_REGISTRATION,
            Self::Other { tag, .. } => *tag,
        }
    }

    /// 序列化为 tag + length + data
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Registration { format_identifier } => {
                let mut out = vec![DESCRIPTOR_TAG_REGISTRATION, 4];
                out.extend_from_slice(format_identifier);
                out
            }
            Self::Other { tag, data } => {
                let mut out = vec![*tag, data.len() as u8];
                out.extend_from_slice(data);
                out
            }
        }
    }

    /// 解析描述符循环, 截断的末尾描述符被丢弃
    pub fn parse_loop(mut data: &[u8]) -> Vec<Self> {
        let mut descriptors = Vec::new();
        while data.len() >= 2 {
            let tag = data[0];
            let len = usize::from(data[1]);
            if 2 + len > data.len() {
                debug!("PSI: 描述符截断, tag={tag:#04X}");
                break;
            }
            let body = &data[2..2 + len];
            descriptors.push(if tag == DESCRIPTOR_TAG_REGISTRATION && len >= 4 {
                let mut format_identifier = [0u8; 4];
                format_identifier.copy_from_slice(&body[..4]);
                Self::Registration { format_identifier }
            } else {
                Self::Other {
                    tag,
                    data: body.to_vec(),
                }
            });
            data = &data[2 + len..];
        }
        descriptors
    }
}

/// PMT 中的一条基本流描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl EsInfo {
    /// KLV 数据流: stream_type 0x06 + "KLVA" 注册描述符
    pub fn klv(pid: u16) -> Self {
        Self {
            stream_type: STREAM_TYPE_PRIVATE_PES,
            elementary_pid: pid,
            descriptors: vec![Descriptor::Registration {
                format_identifier: KLVA_FORMAT_IDENTIFIER,
            }],
        }
    }

    /// 注册描述符中的 format_identifier
    pub fn registration(&self) -> Option<[u8; 4]> {
        self.descriptors.iter().find_map(|d| match d {
            Descriptor::Registration { format_identifier } => Some(*format_identifier),
            Descriptor::Other { .. } => None,
        })
    }

    /// 是否为 KLV 数据流
    pub fn is_klv(&self) -> bool {
        match self.stream_type {
            STREAM_TYPE_METADATA_PES => true,
            STREAM_TYPE_PRIVATE_PES => self.registration() == Some(KLVA_FORMAT_IDENTIFIER),
            _ => false,
        }
    }

    /// 序列化为 PMT ES 循环条目
    pub fn to_bytes(&self) -> Vec<u8> {
        let descriptors: Vec<u8> = self.descriptors.iter().flat_map(|d| d.to_bytes()).collect();
        let mut out = Vec::with_capacity(5 + descriptors.len());
        out.push(self.stream_type);
        out.push(0xE0 | ((self.elementary_pid >> 8) as u8 & 0x1F));
        out.push(self.elementary_pid as u8);
        out.push(0xF0 | ((descriptors.len() >> 8) as u8 & 0x0F));
        out.push(descriptors.len() as u8);
        out.extend_from_slice(&descriptors);
        out
    }
}

/// 读取 section_length (12 位)
pub fn section_length(section: &[u8]) -> Option<usize> {
    (section.len() >= SECTION_HEADER_SIZE)
        .then(|| usize::from(u16::from(section[1] & 0x0F) << 8 | u16::from(section[2])))
}

/// 校验 section 并返回 CRC 之前的内容区
fn section_body<'a>(section: &'a [u8], table_id: u8, name: &str) -> VisionResult<&'a [u8]> {
    let len = section_length(section)
        .ok_or_else(|| VisionError::InvalidData(format!("{name}: section 截断")))?;
    if section[0] != table_id {
        return Err(VisionError::InvalidData(format!(
            "{name}: table_id 不匹配 ({:#04X})",
            section[0]
        )));
    }
    let total = SECTION_HEADER_SIZE + len;
    if total > section.len() || len < 5 + CRC_SIZE {
        return Err(VisionError::InvalidData(format!(
            "{name}: section_length={len} 超出可用数据 {}",
            section.len()
        )));
    }
    if crc32_mpeg2(&section[..total]) != 0 {
        warn!("{name}: CRC32 校验失败");
    }
    Ok(&section[..total - CRC_SIZE])
}

/// 解析 PAT section, 返回 (program_number, PID) 列表
pub fn parse_pat(section: &[u8]) -> VisionResult<Vec<(u16, u16)>> {
    let body = section_body(section, TABLE_ID_PAT, "PAT")?;
    Ok(body[8..]
        .chunks_exact(4)
        .map(|chunk| {
            let program_number = u16::from(chunk[0]) << 8 | u16::from(chunk[1]);
            let pid = (u16::from(chunk[2] & 0x1F) << 8) | u16::from(chunk[3]);
            (program_number, pid)
        })
        .collect())
}

/// PMT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramMapTable {
    /// PMT 所在 PID
    pub pid: u16,
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub section_length: usize,
    pub program_info: Vec<Descriptor>,
    pub streams: Vec<EsInfo>,
}

impl ProgramMapTable {
    /// 解析 PMT section (从 table_id 开始)
    pub fn parse(pid: u16, section: &[u8]) -> VisionResult<Self> {
        let body = section_body(section, TABLE_ID_PMT, "PMT")?;
        if body.len() < 12 {
            return Err(VisionError::InvalidData("PMT: section 过短".into()));
        }

        let program_number = u16::from(body[3]) << 8 | u16::from(body[4]);
        let version = (body[5] >> 1) & 0x1F;
        let pcr_pid = (u16::from(body[8] & 0x1F) << 8) | u16::from(body[9]);
        let prog_info_len = usize::from(u16::from(body[10] & 0x0F) << 8 | u16::from(body[11]));
        let mut pos = 12 + prog_info_len;
        if pos > body.len() {
            return Err(VisionError::InvalidData(
                "PMT: program_info_length 超出 section".into(),
            ));
        }
        let program_info = Descriptor::parse_loop(&body[12..pos]);

        let mut streams = Vec::new();
        while pos + 5 <= body.len() {
            let stream_type = body[pos];
            let elementary_pid = (u16::from(body[pos + 1] & 0x1F) << 8) | u16::from(body[pos + 2]);
            let es_info_len =
                usize::from(u16::from(body[pos + 3] & 0x0F) << 8 | u16::from(body[pos + 4]));
            let desc_end = (pos + 5 + es_info_len).min(body.len());

            debug!("TS PMT: stream_type=0x{stream_type:02X} PID={elementary_pid:#06X}");
            streams.push(EsInfo {
                stream_type,
                elementary_pid,
                descriptors: Descriptor::parse_loop(&body[pos + 5..desc_end]),
            });
            pos += 5 + es_info_len;
        }

        Ok(Self {
            pid,
            program_number,
            version,
            pcr_pid,
            section_length: section_length(section).unwrap_or_default(),
            program_info,
            streams,
        })
    }

    /// 按 PID 查找基本流
    pub fn find_stream(&self, pid: u16) -> Option<&EsInfo> {
        self.streams.iter().find(|s| s.elementary_pid == pid)
    }
}

/// 定位 PSI 包中 section 起始偏移 (跳过 pointer_field)
///
/// 仅对 PUSI 包有意义, 其它包返回 None.
pub fn section_offset(pkt: &[u8], header: &TsHeader) -> Option<usize> {
    if !header.pusi {
        return None;
    }
    let payload = payload_offset(pkt, header)?;
    let pointer = usize::from(pkt[payload]);
    let offset = payload + 1 + pointer;
    (offset < pkt.len()).then_some(offset)
}

/// PSI 跟踪器
///
/// 默认节目为 PAT 中第一个 program_number 非零的节目.
#[derive(Debug, Default)]
pub struct PsiTracker {
    pmt_pid: Option<u16>,
    pmt: Option<ProgramMapTable>,
}

impl PsiTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认节目的 PMT PID
    pub fn pmt_pid(&self) -> Option<u16> {
        self.pmt_pid
    }

    /// 最近一次解析到的 PMT
    pub fn pmt(&self) -> Option<&ProgramMapTable> {
        self.pmt.as_ref()
    }

    /// 处理一个 TS 包, PMT 首次出现或版本变化时返回 true
    ///
    /// PMT section 超出当前包时返回 UnsupportedFragmentedTable.
    pub fn push_packet(&mut self, pkt: &[u8]) -> VisionResult<bool> {
        let header = TsHeader::parse(pkt)?;
        let is_pat = header.pid == PID_PAT;
        let is_pmt = self.pmt_pid == Some(header.pid);
        if !is_pat && !is_pmt {
            return Ok(false);
        }
        let Some(offset) = section_offset(pkt, &header) else {
            return Ok(false);
        };
        let section = &pkt[offset..];

        if is_pat {
            match parse_pat(section) {
                Ok(programs) => {
                    if let Some(&(program, pid)) = programs.iter().find(|(p, _)| *p != 0) {
                        if self.pmt_pid != Some(pid) {
                            debug!("TS PAT: program={program} PMT_PID={pid:#06X}");
                            self.pmt_pid = Some(pid);
                            self.pmt = None;
                        }
                    }
                }
                Err(e) => debug!("TS PAT: 忽略无法解析的 section, {e}"),
            }
            return Ok(false);
        }

        let declared = section_length(section).unwrap_or_default();
        if SECTION_HEADER_SIZE + declared > section.len() {
            return Err(VisionError::UnsupportedFragmentedTable);
        }
        let pmt = ProgramMapTable::parse(header.pid, section)?;
        let changed = self
            .pmt
            .as_ref()
            .is_none_or(|old| old.version != pmt.version || old.streams != pmt.streams);
        if changed {
            debug!(
                "TS PMT: program={} version={} streams={}",
                pmt.program_number,
                pmt.version,
                pmt.streams.len()
            );
            self.pmt = Some(pmt);
        }
        Ok(changed)
    }
}
