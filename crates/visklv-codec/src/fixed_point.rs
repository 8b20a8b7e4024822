//! Vision 字段值编解码.
//!
//! 数值字段采用定点表示, 把物理量线性映射到无符号整数空间:
//! - 角度 (经纬度): 4 字节有符号大端, 增量 = range / (2^32 - 1)
//! - 海拔: 2 字节无符号大端, 增量 = range / (2^16 - 1), 带偏移
//! - 朝向: 2 字节无符号大端, 0..360 度
//!
//! 字节与文本字段在值为空时不产生实体.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use visklv_core::{VisionError, VisionResult};

/// 4 字节定点数的码域上限 (2^32 - 1)
pub const ANGLE_CODOMAIN_MAX: f64 = u32::MAX as f64;

/// 2 字节定点数的码域上限 (2^16 - 1)
pub const SHORT_CODOMAIN_MAX: f64 = u16::MAX as f64;

/// 版本字符串前缀
pub const VERSION_IDENT: &str = "CINVIS";

/// 角度定点编解码器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleCodec {
    /// 值域跨度 (度)
    pub range: f64,
}

impl AngleCodec {
    /// 纬度, 有效输入为 [-90, 90] 度
    ///
    /// 超出该范围的输入在 [`encode`](Self::encode) 中按 32 位补码回绕,
    /// 如 120 解码为约 -60. 编码前可用 [`accepts`](Self::accepts) 检查.
    pub const LATITUDE: Self = Self::new(180.0);
    /// 经度, 有效输入为 [-180, 180] 度
    pub const LONGITUDE: Self = Self::new(360.0);

    pub const fn new(range: f64) -> Self {
        Self { range }
    }

    /// 角度是否落在可无损编码的范围 [-range/2, range/2] 内
    pub fn accepts(&self, angle: f64) -> bool {
        angle.is_finite() && angle.abs() <= self.range / 2.0
    }

    /// 每个整数单位代表的角度
    pub fn increment_per_unit(&self) -> f64 {
        self.range / ANGLE_CODOMAIN_MAX
    }

    /// 编码角度
    ///
    /// 向零截断后按二进制补码取低 32 位, 超范围输入会回绕.
    pub fn encode(&self, angle: f64) -> [u8; 4] {
        let units = (angle * (ANGLE_CODOMAIN_MAX / self.range)) as i64;
        let mut out = [0u8; 4];
        BigEndian::write_i32(&mut out, units as i32);
        out
    }

    /// 解码角度, 长度不为 4 时返回 None
    pub fn decode(&self, data: &[u8]) -> Option<f64> {
        if data.len() != 4 {
            return None;
        }
        Some(f64::from(BigEndian::read_i32(data)) * self.increment_per_unit())
    }
}

/// 海拔定点编解码器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltitudeCodec {
    /// 值域跨度 (米)
    pub range: f64,
    /// 值域下限 (米)
    pub offset: f64,
}

impl AltitudeCodec {
    /// 相机海拔: -900..19000 米
    pub const DEFAULT: Self = Self::new(19900.0, -900.0);

    pub const fn new(range: f64, offset: f64) -> Self {
        Self { range, offset }
    }

    /// 编码海拔, 四舍五入到最近的整数单位
    pub fn encode(&self, altitude: f64) -> [u8; 2] {
        let units = ((altitude - self.offset) * (SHORT_CODOMAIN_MAX / self.range)).round() as i64;
        let mut out = [0u8; 2];
        BigEndian::write_u16(&mut out, units as u16);
        out
    }

    /// 解码海拔, 保留 4 位小数; 长度不为 2 时返回 None
    pub fn decode(&self, data: &[u8]) -> Option<f64> {
        if data.len() != 2 {
            return None;
        }
        let raw = f64::from(BigEndian::read_u16(data));
        Some(round_to(raw * (self.range / SHORT_CODOMAIN_MAX) + self.offset, 4))
    }
}

/// 编码相机朝向 (度)
pub fn encode_heading(degrees: f64) -> [u8; 2] {
    let units = (degrees * (SHORT_CODOMAIN_MAX / 360.0)).round() as i64;
    let mut out = [0u8; 2];
    BigEndian::write_u16(&mut out, units as u16);
    out
}

/// 解码相机朝向 (度)
pub fn decode_heading(data: &[u8]) -> Option<f64> {
    if data.len() != 2 {
        return None;
    }
    Some(f64::from(BigEndian::read_u16(data)) / (SHORT_CODOMAIN_MAX / 360.0))
}

/// 单字节字段取值, 空值返回 None
pub fn decode_byte(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

/// 编码 UTF-8 文本, 空字符串不产生实体
pub fn encode_utf8(text: &str) -> Option<Vec<u8>> {
    (!text.is_empty()).then(|| text.as_bytes().to_vec())
}

/// 解码 UTF-8 文本 (非法序列替换为 U+FFFD), 空值返回 None
pub fn decode_utf8(data: &[u8]) -> Option<String> {
    (!data.is_empty()).then(|| String::from_utf8_lossy(data).into_owned())
}

/// 解析版本字符串
///
/// 取最后一个 `.` 之后的十进制数字 (无 `.` 时取整个字符串),
/// 必须是 1 到 3 位且不超过 255, 如 "CINVIS.17" -> 17.
pub fn parse_version(text: &str) -> VisionResult<u8> {
    let digits = text.rfind('.').map_or(text, |pos| &text[pos + 1..]);
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VisionError::InvalidFormat(format!(
            "版本号必须以 1 到 3 位十进制数字结尾: {text:?}"
        )));
    }
    digits
        .parse::<u8>()
        .map_err(|_| VisionError::InvalidFormat(format!("版本号超出 0..=255: {text:?}")))
}

/// 格式化版本字符串, 如 17 -> "CINVIS.17"
pub fn format_version(version: u8) -> String {
    format!("{VERSION_IDENT}.{version}")
}

/// 编码时间戳: 8 字节大端 Unix 微秒
///
/// 纪元之前的时间按 0 处理.
pub fn encode_timestamp(time: &DateTime<Utc>) -> [u8; 8] {
    let micros = time.timestamp_millis().max(0) as u64 * 1000;
    let mut out = [0u8; 8];
    BigEndian::write_u64(&mut out, micros);
    out
}

/// 解码时间戳, 精度截断到毫秒; 不足 8 字节时返回 None
pub fn decode_timestamp(data: &[u8]) -> Option<DateTime<Utc>> {
    if data.len() < 8 {
        return None;
    }
    let micros = BigEndian::read_u64(&data[..8]);
    DateTime::from_timestamp_millis(i64::try_from(micros / 1000).ok()?)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
