//! MPEG-TS 包头与 adaptation field.
//!
//! ```text
//! sync(8) | TEI(1) PUSI(1) prio(1) PID(13) | scrambling(2) AFC(2) CC(4)
//! ```
//!
//! PCR 位于 adaptation field 中, 6 字节:
//! base(33) reserved(6) extension(9), 值为 base * 300 + extension (27MHz).

use visklv_core::{VisionError, VisionResult};

/// TS 包大小
pub const TS_PACKET_SIZE: usize = 188;
/// TS 同步字节
pub const TS_SYNC_BYTE: u8 = 0x47;
/// TS 包头大小
pub const TS_HEADER_SIZE: usize = 4;
/// 单包最大负载
pub const TS_MAX_PAYLOAD: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
/// PAT PID
pub const PID_PAT: u16 = 0x0000;
/// 空包 PID
pub const PID_NULL: u16 = 0x1FFF;
/// PCR 时钟频率
pub const PCR_CLOCK_HZ: u64 = 27_000_000;

/// TS 包头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error: bool,
    /// Payload Unit Start Indicator
    pub pusi: bool,
    pub pid: u16,
    /// Adaptation Field Control
    pub afc: u8,
    pub continuity_counter: u8,
}

impl TsHeader {
    /// 解析包头, 同步字节不匹配时报错
    pub fn parse(pkt: &[u8]) -> VisionResult<Self> {
        if pkt.len() < TS_HEADER_SIZE {
            return Err(VisionError::InvalidData(format!(
                "TS: 包头截断, len={}",
                pkt.len()
            )));
        }
        if pkt[0] != TS_SYNC_BYTE {
            return Err(VisionError::InvalidData(format!(
                "TS: 同步字节不匹配 ({:#04X})",
                pkt[0]
            )));
        }
        Ok(Self {
            transport_error: pkt[1] & 0x80 != 0,
            pusi: pkt[1] & 0x40 != 0,
            pid: (u16::from(pkt[1] & 0x1F) << 8) | u16::from(pkt[2]),
            afc: (pkt[3] >> 4) & 0x03,
            continuity_counter: pkt[3] & 0x0F,
        })
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.afc & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.afc & 0x01 != 0
    }
}

/// Adaptation field 中本框架关心的字段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub length: u8,
    pub discontinuity: bool,
    pub random_access: bool,
    /// 27MHz PCR
    pub pcr: Option<u64>,
}

impl AdaptationField {
    /// 解析 adaptation field, 不存在时返回 None
    pub fn parse(pkt: &[u8], header: &TsHeader) -> Option<Self> {
        if !header.has_adaptation_field() || pkt.len() <= TS_HEADER_SIZE {
            return None;
        }
        let length = pkt[TS_HEADER_SIZE];
        let mut af = Self {
            length,
            ..Self::default()
        };
        if length == 0 || pkt.len() < TS_HEADER_SIZE + 2 {
            return Some(af);
        }

        let flags = pkt[TS_HEADER_SIZE + 1];
        af.discontinuity = flags & 0x80 != 0;
        af.random_access = flags & 0x40 != 0;

        let pcr_start = TS_HEADER_SIZE + 2;
        if flags & 0x10 != 0 && length >= 7 && pkt.len() >= pcr_start + 6 {
            af.pcr = Some(decode_pcr(&pkt[pcr_start..pcr_start + 6]));
        }
        Some(af)
    }
}

/// 解码 6 字节 PCR 为 27MHz 计数
pub fn decode_pcr(data: &[u8]) -> u64 {
    let base = (u64::from(data[0]) << 25)
        | (u64::from(data[1]) << 17)
        | (u64::from(data[2]) << 9)
        | (u64::from(data[3]) << 1)
        | (u64::from(data[4]) >> 7);
    let extension = (u64::from(data[4] & 0x01) << 8) | u64::from(data[5]);
    base * 300 + extension
}

/// 将 27MHz 计数编码为 6 字节 PCR
pub fn encode_pcr(pcr: u64) -> [u8; 6] {
    let base = (pcr / 300) & 0x1_FFFF_FFFF;
    let extension = pcr % 300;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 0x01) << 7) as u8) | 0x7E | ((extension >> 8) as u8 & 0x01),
        extension as u8,
    ]
}

/// payload 在包内的偏移, 无 payload 时返回 None
pub fn payload_offset(pkt: &[u8], header: &TsHeader) -> Option<usize> {
    if !header.has_payload() {
        return None;
    }
    let mut offset = TS_HEADER_SIZE;
    if header.has_adaptation_field() {
        offset += 1 + usize::from(*pkt.get(TS_HEADER_SIZE)?);
    }
    (offset < pkt.len()).then_some(offset)
}

/// 构造空包
pub fn null_packet() -> [u8; TS_PACKET_SIZE] {
    let mut pkt = [0xFFu8; TS_PACKET_SIZE];
    pkt[0] = TS_SYNC_BYTE;
    pkt[1] = (PID_NULL >> 8) as u8;
    pkt[2] = PID_NULL as u8;
    pkt[3] = 0x10;
    pkt
}

/// 将一个 PES 拆分为 TS 包
///
/// 第一个包置 PUSI, 最后一个包用 adaptation field 填充到 188 字节.
/// 连续性计数器每包加一并按 4 位回绕.
pub fn packetize(pid: u16, cc: &mut u8, pes: &[u8]) -> Vec<[u8; TS_PACKET_SIZE]> {
    let mut packets = Vec::with_capacity(pes.len().div_ceil(TS_MAX_PAYLOAD));
    let mut offset = 0usize;

    while offset < pes.len() {
        let mut packet = [0xFFu8; TS_PACKET_SIZE];
        packet[0] = TS_SYNC_BYTE;
        let pusi = if offset == 0 { 0x40u8 } else { 0x00u8 };
        packet[1] = pusi | ((pid >> 8) as u8 & 0x1F);
        packet[2] = pid as u8;

        let remaining = pes.len() - offset;
        if remaining >= TS_MAX_PAYLOAD {
            // 纯 payload
            packet[3] = 0x10 | (*cc & 0x0F);
            packet[TS_HEADER_SIZE..].copy_from_slice(&pes[offset..offset + TS_MAX_PAYLOAD]);
            offset += TS_MAX_PAYLOAD;
        } else {
            // AFC=11, adaptation field 填充
            let stuff_len = TS_MAX_PAYLOAD - remaining;
            packet[3] = 0x30 | (*cc & 0x0F);
            packet[TS_HEADER_SIZE] = (stuff_len - 1) as u8;
            if stuff_len >= 2 {
                packet[TS_HEADER_SIZE + 1] = 0x00;
            }
            let payload_start = TS_HEADER_SIZE + stuff_len;
            packet[payload_start..].copy_from_slice(&pes[offset..]);
            offset = pes.len();
        }

        *cc = (*cc + 1) & 0x0F;
        packets.push(packet);
    }

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_包头_解析() {
        let pkt = [0x47, 0x41, 0x00, 0x3A];
        let header = TsHeader::parse(&pkt).unwrap();
        assert!(header.pusi);
        assert_eq!(header.pid, 0x100);
        assert!(header.has_adaptation_field());
        assert!(header.has_payload());
        assert_eq!(header.continuity_counter, 0x0A);
    }

    #[test]
    fn test_包头_同步字节错误() {
        assert!(TsHeader::parse(&[0x46, 0x00, 0x00, 0x10]).is_err());
    }

    #[test]
    fn test_pcr_编解码() {
        let pcr = 27_000_000u64 * 3600 + 299;
        assert_eq!(decode_pcr(&encode_pcr(pcr)), pcr);
    }

    #[test]
    fn test_adaptation_field_pcr与不连续标记() {
        let mut pkt = null_packet();
        pkt[1] = 0x01;
        pkt[2] = 0x00;
        pkt[3] = 0x20;
        pkt[4] = 7;
        pkt[5] = 0x90;
        pkt[6..12].copy_from_slice(&encode_pcr(2_700_000));
        let header = TsHeader::parse(&pkt).unwrap();
        let af = AdaptationField::parse(&pkt, &header).unwrap();
        assert_eq!(af.pcr, Some(2_700_000));
        assert!(af.discontinuity);
        assert_eq!(payload_offset(&pkt, &header), None);
    }

    #[test]
    fn test_分包_单包填充() {
        let mut cc = 15;
        let pes = vec![0xABu8; 100];
        let packets = packetize(0x1FF, &mut cc, &pes);
        assert_eq!(packets.len(), 1);
        let header = TsHeader::parse(&packets[0]).unwrap();
        assert!(header.pusi);
        assert_eq!(header.continuity_counter, 15);
        assert_eq!(cc, 0);
        let off = payload_offset(&packets[0], &header).unwrap();
        assert_eq!(&packets[0][off..], &pes[..]);
    }

    #[test]
    fn test_分包_多包与单字节填充() {
        let mut cc = 0;
        let pes: Vec<u8> = (0..(184 + 183)).map(|i| i as u8).collect();
        let packets = packetize(0x1FF, &mut cc, &pes);
        assert_eq!(packets.len(), 2);
        assert_eq!(cc, 2);

        let h2 = TsHeader::parse(&packets[1]).unwrap();
        assert!(!h2.pusi);
        assert_eq!(packets[1][4], 0);
        let off = payload_offset(&packets[1], &h2).unwrap();
        assert_eq!(off, 5);

        let mut joined = packets[0][4..].to_vec();
        joined.extend_from_slice(&packets[1][off..]);
        assert_eq!(joined, pes);
    }
}
