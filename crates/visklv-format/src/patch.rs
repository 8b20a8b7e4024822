//! PMT 原地补丁: 在 ES 循环末尾追加一条基本流描述.
//!
//! ```text
//! 补丁前: ... | ES_n | CRC(4) | FF FF ...
//! 补丁后: ... | ES_n | 新 ES  | CRC'(4) | FF ...
//! ```
//!
//! section_length 高 4 位保留, CRC 在新 section 上重新计算.
//! 修改先写入临时副本, 全部成功后才提交到原包.

use log::debug;
use visklv_core::crc::crc32_mpeg2;
use visklv_core::{VisionError, VisionResult};

use crate::packet::TsHeader;
use crate::psi::{section_length, section_offset};

/// section_length 字段允许的最大值
const MAX_SECTION_LENGTH: usize = 0x3FD;

/// 在包内指定偏移的 section 中插入 ES 条目
///
/// `section_start` 指向 table_id 字节.
pub fn patch_pmt_section(
    packet: &mut [u8],
    section_start: usize,
    insertion: &[u8],
) -> VisionResult<()> {
    let old_len = section_length(packet.get(section_start..).unwrap_or_default())
        .ok_or_else(|| VisionError::InvalidArgument(format!("PMT: section 偏移 {section_start} 越界")))?;
    let old_end = section_start + 3 + old_len;
    if old_end > packet.len() {
        return Err(VisionError::UnsupportedFragmentedTable);
    }
    if old_len < 13 {
        return Err(VisionError::InvalidData(format!(
            "PMT: section_length={old_len} 过短"
        )));
    }

    let new_len = old_len + insertion.len();
    let new_end = section_start + 3 + new_len;
    if new_end > packet.len() || new_len > MAX_SECTION_LENGTH {
        return Err(VisionError::SectionTooLarge {
            size: new_end - section_start,
            max: packet.len() - section_start,
        });
    }

    let mut scratch = packet.to_vec();
    let high = scratch[section_start + 1] & 0xF0;
    scratch[section_start + 1] = high | ((new_len >> 8) as u8 & 0x0F);
    scratch[section_start + 2] = new_len as u8;

    let insert_at = old_end - 4;
    scratch[insert_at..insert_at + insertion.len()].copy_from_slice(insertion);

    let crc_pos = new_end - 4;
    let crc = crc32_mpeg2(&scratch[section_start..crc_pos]);
    scratch[crc_pos..new_end].copy_from_slice(&crc.to_be_bytes());

    packet.copy_from_slice(&scratch);
    debug!("PMT: section_length {old_len} -> {new_len}, CRC={crc:#010X}");
    Ok(())
}

/// 对携带 PMT section 起始的 TS 包打补丁
pub fn patch_pmt_packet(packet: &mut [u8], insertion: &[u8]) -> VisionResult<()> {
    let header = TsHeader::parse(packet)?;
    let section_start =
        section_offset(packet, &header).ok_or(VisionError::UnsupportedFragmentedTable)?;
    patch_pmt_section(packet, section_start, insertion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TS_PACKET_SIZE;
    use crate::psi::tests::build_pmt;
    use crate::psi::{EsInfo, ProgramMapTable, STREAM_TYPE_H264};

    fn video() -> EsInfo {
        EsInfo {
            stream_type: STREAM_TYPE_H264,
            elementary_pid: 0x101,
            descriptors: Vec::new(),
        }
    }

    #[test]
    fn test_补丁_追加klv流并重算crc() {
        let mut pkt = build_pmt(0x100, 0x101, &[video()]);
        let insertion = EsInfo::klv(0x1F0).to_bytes();
        patch_pmt_packet(&mut pkt, &insertion).unwrap();

        let section_len = section_length(&pkt[5..]).unwrap();
        assert_eq!(section_len, 9 + 5 + 4 + insertion.len());
        assert_eq!(pkt[6] & 0xF0, 0xB0);
        assert_eq!(crc32_mpeg2(&pkt[5..5 + 3 + section_len]), 0);

        let pmt = ProgramMapTable::parse(0x100, &pkt[5..]).unwrap();
        assert_eq!(pmt.streams.len(), 2);
        assert!(pmt.streams[1].is_klv());
        assert_eq!(pmt.streams[1].elementary_pid, 0x1F0);
    }

    #[test]
    fn test_补丁_空间不足不修改原包() {
        let streams: Vec<EsInfo> = (0..33)
            .map(|i| EsInfo {
                stream_type: STREAM_TYPE_H264,
                elementary_pid: 0x200 + i,
                descriptors: Vec::new(),
            })
            .collect();
        let mut pkt = build_pmt(0x100, 0x200, &streams);
        let original = pkt;
        let insertion = EsInfo::klv(0x1F0).to_bytes();
        assert!(matches!(
            patch_pmt_packet(&mut pkt, &insertion),
            Err(VisionError::SectionTooLarge { .. })
        ));
        assert_eq!(pkt, original);
    }

    #[test]
    fn test_补丁_非起始包() {
        let mut pkt = build_pmt(0x100, 0x101, &[video()]);
        pkt[1] &= !0x40;
        assert!(patch_pmt_packet(&mut pkt, &[0u8; 11]).is_err());
        assert_eq!(pkt.len(), TS_PACKET_SIZE);
    }
}
