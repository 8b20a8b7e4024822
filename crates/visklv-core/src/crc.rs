//! 校验和计算.
//!
//! - CRC-32/MPEG-2: PSI section (PAT/PMT) 尾部校验
//! - BCC-16: Vision 元数据集合的块校验字符

/// CRC-32/MPEG-2 查找表 (多项式 0x04C11DB7, MSB first, 无反射)
const CRC32_MPEG2_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// 计算 CRC-32/MPEG-2
///
/// PSI section 使用此 CRC (初始值 0xFFFFFFFF, 无最终异或).
/// 对包含 CRC 字段在内的完整 section 计算, 结果应为 0.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = (crc << 8) ^ CRC32_MPEG2_TABLE[((crc >> 24) as u8 ^ byte) as usize];
    }
    crc
}

/// 计算 BCC-16 块校验
///
/// 16 位累加器, 回绕加法. 下标为偶数 (0, 2, 4...) 的字节移入高 8 位,
/// 下标为奇数的字节直接累加到低 8 位.
///
/// 调用方负责排除校验和自身的两个字节.
pub fn bcc16(data: &[u8]) -> u16 {
    let mut bcc: u16 = 0;
    for (i, &byte) in data.iter().enumerate() {
        let term = if (i + 1) % 2 == 1 {
            u16::from(byte) << 8
        } else {
            u16::from(byte)
        };
        bcc = bcc.wrapping_add(term);
    }
    bcc
}
