//! PES (Packetized Elementary Stream) 封装与解析.
//!
//! ```text
//! 00 00 01 | stream_id | PES_packet_length(16) | [可选头] | 数据
//! 可选头: 10 scrambling(2) prio align copyright original | PTS_DTS(2) ... | header_len | ...
//! ```
//!
//! private_stream_2 (0xBF) 等流没有可选头.

use visklv_core::{VisionError, VisionResult};

/// PES 起始码前缀
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// PES_packet_length 字段上限
pub const MAX_PES_PACKET_LENGTH: usize = 0xFFFF;

/// 本框架使用的 PES stream_id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PesStreamId {
    /// private_stream_1, 带可选头
    PrivateStream1 = 0xBD,
    /// private_stream_2, 无可选头
    PrivateStream2 = 0xBF,
}

/// PES 封装选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PesOptions {
    /// data_alignment_indicator
    pub data_alignment: bool,
    /// 90kHz PTS
    pub pts: Option<u64>,
}

/// 将数据封装为一个 PES 包
pub fn wrap_pes(stream_id: PesStreamId, data: &[u8], options: &PesOptions) -> VisionResult<Vec<u8>> {
    let mut header = Vec::with_capacity(8);
    if stream_id == PesStreamId::PrivateStream1 {
        let flags = if options.data_alignment { 0x84 } else { 0x80 };
        header.push(flags);
        match options.pts {
            Some(pts) => {
                header.push(0x80);
                header.push(5);
                header.extend_from_slice(&encode_timestamp(0x20, pts));
            }
            None => {
                header.push(0x00);
                header.push(0x00);
            }
        }
    }

    let pes_length = header.len() + data.len();
    if pes_length > MAX_PES_PACKET_LENGTH {
        return Err(VisionError::PayloadTooLarge {
            size: pes_length,
            max: MAX_PES_PACKET_LENGTH,
        });
    }

    let mut pes = Vec::with_capacity(6 + pes_length);
    pes.extend_from_slice(&PES_START_CODE);
    pes.push(stream_id as u8);
    pes.extend_from_slice(&(pes_length as u16).to_be_bytes());
    pes.extend_from_slice(&header);
    pes.extend_from_slice(data);
    Ok(pes)
}

/// 解析后的 PES 包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket<'a> {
    pub stream_id: u8,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub payload: &'a [u8],
}

/// 是否为不带可选头的 stream_id
fn has_no_optional_header(stream_id: u8) -> bool {
    matches!(
        stream_id,
        0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF
    )
}

/// 解析 PES 包, 起始码不匹配时返回 None
pub fn parse_pes(data: &[u8]) -> Option<PesPacket<'_>> {
    if data.len() < 6 || data[..3] != PES_START_CODE {
        return None;
    }

    let stream_id = data[3];
    let pes_length = usize::from(u16::from_be_bytes([data[4], data[5]]));
    // 0 表示长度不定 (视频流常见)
    let end = if pes_length == 0 {
        data.len()
    } else {
        (6 + pes_length).min(data.len())
    };

    if has_no_optional_header(stream_id) {
        return Some(PesPacket {
            stream_id,
            pts: None,
            dts: None,
            payload: &data[6..end],
        });
    }

    if data.len() < 9 || (data[6] & 0xC0) != 0x80 {
        return None;
    }
    let pts_dts_flags = (data[7] >> 6) & 0x03;
    let header_len = 9 + usize::from(data[8]);
    if header_len > end {
        return None;
    }

    let pts = (pts_dts_flags >= 2 && header_len >= 14).then(|| decode_timestamp(&data[9..14]));
    let dts = (pts_dts_flags == 3 && header_len >= 19).then(|| decode_timestamp(&data[14..19]));

    Some(PesPacket {
        stream_id,
        pts,
        dts,
        payload: &data[header_len..end],
    })
}

/// 编码 33-bit 时间戳 (5 字节)
///
/// `prefix` 为高 4 位标记, PTS 单独出现时为 0x20.
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    [
        prefix | ((((ts >> 30) as u8) & 0x07) << 1) | 0x01,
        (ts >> 22) as u8,
        ((((ts >> 15) as u8) & 0x7F) << 1) | 0x01,
        (ts >> 7) as u8,
        (((ts as u8) & 0x7F) << 1) | 0x01,
    ]
}

/// 从 5 字节中提取 33-bit 时间戳
pub fn decode_timestamp(data: &[u8]) -> u64 {
    let b0 = u64::from(data[0]);
    let b1 = u64::from(data[1]);
    let b2 = u64::from(data[2]);
    let b3 = u64::from(data[3]);
    let b4 = u64::from(data[4]);

    ((b0 >> 1) & 0x07) << 30 | b1 << 22 | (b2 >> 1) << 15 | b3 << 7 | b4 >> 1
}
