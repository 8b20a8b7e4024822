//! SEI 中帧时间戳的提取与插入.
//!
//! # Annex B 格式
//!
//! NAL 单元以起始码 `00 00 01` 或 `00 00 00 01` 分隔.
//!
//! # SEI NAL
//! ```text
//! H.264: NAL 头 1 字节, type = 6
//! H.265: NAL 头 2 字节, type = 39 (prefix SEI)
//! sei_message: payload_type (ff 编码) | payload_size (ff 编码) | payload
//! ```
//!
//! 帧时间戳携带在 user_data_unregistered (payload_type = 5) 中, 长度固定 28 字节.

use log::debug;
use visklv_core::{VisionError, VisionResult};

use crate::timestamp::{FRAME_TIMESTAMP_SIZE, FrameTimestamp};

/// user_data_unregistered 负载类型
pub const SEI_USER_DATA_UNREGISTERED: u32 = 5;

/// H.264 SEI NAL 类型
const H264_NAL_SEI: u8 = 6;

/// H.265 prefix SEI NAL 类型
const H265_NAL_PREFIX_SEI: u8 = 39;

/// 视频编码标准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// NAL 头长度
    pub fn nal_header_size(self) -> usize {
        match self {
            Self::H264 => 1,
            Self::H265 => 2,
        }
    }

    /// 是否为 SEI NAL
    pub fn is_sei(self, nal: &[u8]) -> bool {
        match (self, nal) {
            (Self::H264, [first, ..]) => first & 0x1F == H264_NAL_SEI,
            (Self::H265, [first, _, ..]) => (first >> 1) & 0x3F == H265_NAL_PREFIX_SEI,
            _ => false,
        }
    }

    /// SEI NAL 头字节
    fn sei_header(self) -> &'static [u8] {
        match self {
            Self::H264 => &[H264_NAL_SEI],
            // forbidden=0, type=39, layer_id=0, temporal_id_plus1=1
            Self::H265 => &[H265_NAL_PREFIX_SEI << 1, 0x01],
        }
    }
}

/// SEI 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: u32,
    pub payload: Vec<u8>,
}

/// 按 Annex B 起始码切分 NAL 单元 (不含起始码)
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let starts = find_nal_starts(data);
    let mut nals = Vec::with_capacity(starts.len());

    for (i, &(_, nal_start)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(data.len(), |&(code_pos, _)| code_pos);

        // 去除尾部的 0 字节 (trailing zeros)
        let mut nal_end = end;
        while nal_end > nal_start && data[nal_end - 1] == 0x00 {
            nal_end -= 1;
        }
        if nal_end > nal_start {
            nals.push(&data[nal_start..nal_end]);
        }
    }

    nals
}

/// 查找起始码, 返回 (起始码位置, NAL 数据位置)
fn find_nal_starts(data: &[u8]) -> Vec<(usize, usize)> {
    let mut positions = Vec::new();
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                positions.push((i, i + 3));
                i += 3;
                continue;
            } else if i + 3 < data.len() && data[i + 2] == 0x00 && data[i + 3] == 0x01 {
                positions.push((i, i + 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    positions
}

/// 移除 emulation prevention 字节 (00 00 03 -> 00 00)
pub fn nal_to_rbsp(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut zeros = 0usize;

    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        rbsp.push(byte);
        zeros = if byte == 0x00 { zeros + 1 } else { 0 };
    }

    rbsp
}

/// 插入 emulation prevention 字节 (00 00 0x -> 00 00 03 0x, x <= 3)
pub fn rbsp_to_nal(rbsp: &[u8]) -> Vec<u8> {
    let mut nal = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 1);
    let mut zeros = 0usize;

    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            nal.push(0x03);
            zeros = 0;
        }
        nal.push(byte);
        zeros = if byte == 0x00 { zeros + 1 } else { 0 };
    }

    nal
}

/// 解析 SEI RBSP (不含 NAL 头) 中的全部消息
pub fn parse_sei_rbsp(rbsp: &[u8]) -> VisionResult<Vec<SeiMessage>> {
    let mut messages = Vec::new();
    let mut offset = 0usize;

    while offset < rbsp.len() {
        if is_rbsp_trailing_bits(&rbsp[offset..]) {
            break;
        }

        let payload_type = read_ff_coded_value(rbsp, &mut offset, "payload_type")?;
        let payload_size = read_ff_coded_value(rbsp, &mut offset, "payload_size")? as usize;
        let payload_end = offset.checked_add(payload_size).ok_or_else(|| {
            VisionError::InvalidData(format!("SEI: payload_size 溢出, value={payload_size}"))
        })?;
        if payload_end > rbsp.len() {
            return Err(VisionError::InvalidData(format!(
                "SEI: payload 截断, type={payload_type}, size={payload_size}, remain={}",
                rbsp.len().saturating_sub(offset)
            )));
        }

        messages.push(SeiMessage {
            payload_type,
            payload: rbsp[offset..payload_end].to_vec(),
        });
        offset = payload_end;
    }

    Ok(messages)
}

fn is_rbsp_trailing_bits(rest: &[u8]) -> bool {
    match rest.split_first() {
        None => true,
        Some((first, tail)) => *first == 0x80 && tail.iter().all(|v| *v == 0),
    }
}

fn read_ff_coded_value(data: &[u8], offset: &mut usize, name: &str) -> VisionResult<u32> {
    let mut value = 0u32;
    loop {
        let byte = *data
            .get(*offset)
            .ok_or_else(|| VisionError::InvalidData(format!("SEI: {name} 截断")))?;
        *offset += 1;
        value = value
            .checked_add(u32::from(byte))
            .ok_or_else(|| VisionError::InvalidData(format!("SEI: {name} 溢出")))?;
        if byte != 0xFF {
            break;
        }
    }
    Ok(value)
}

fn write_ff_coded_value(mut value: usize, out: &mut Vec<u8>) {
    while value >= 0xFF {
        out.push(0xFF);
        value -= 0xFF;
    }
    out.push(value as u8);
}

/// 从一个访问单元 (Annex B) 中提取全部帧时间戳
///
/// 损坏的 SEI NAL 会被跳过.
pub fn find_frame_timestamps(access_unit: &[u8], codec: VideoCodec) -> Vec<FrameTimestamp> {
    let mut found = Vec::new();

    for nal in split_annex_b(access_unit) {
        if !codec.is_sei(nal) {
            continue;
        }
        let rbsp = nal_to_rbsp(&nal[codec.nal_header_size()..]);
        let messages = match parse_sei_rbsp(&rbsp) {
            Ok(messages) => messages,
            Err(e) => {
                debug!("SEI: 跳过损坏的 NAL, {e}");
                continue;
            }
        };

        found.extend(
            messages
                .iter()
                .filter(|m| {
                    m.payload_type == SEI_USER_DATA_UNREGISTERED
                        && m.payload.len() == FRAME_TIMESTAMP_SIZE
                })
                .filter_map(|m| FrameTimestamp::parse(&m.payload)),
        );
    }

    found
}

/// 构造携带帧时间戳的 SEI NAL (含 4 字节起始码)
pub fn build_timestamp_sei(timestamp: &FrameTimestamp, codec: VideoCodec) -> Vec<u8> {
    let payload = timestamp.to_bytes();

    let mut rbsp = Vec::with_capacity(payload.len() + 4);
    write_ff_coded_value(SEI_USER_DATA_UNREGISTERED as usize, &mut rbsp);
    write_ff_coded_value(payload.len(), &mut rbsp);
    rbsp.extend_from_slice(&payload);
    rbsp.push(0x80);

    let mut out = vec![0x00, 0x00, 0x00, 0x01];
    out.extend_from_slice(codec.sei_header());
    out.extend_from_slice(&rbsp_to_nal(&rbsp));
    out
}
