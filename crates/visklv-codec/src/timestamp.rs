//! 帧级时间戳 (SEI user data unregistered 负载).
//!
//! 28 字节布局, 数据区避开 H.264/H.265 起始码竞争:
//! ```text
//! [0..16]  key: "CNGYmicrosectime" 或 "CNGYnanosecstime"
//! [16]     lock 字节
//! [17..28] v7 v6 FF v5 v4 FF v3 v2 FF v1 v0   (v7..v0 为 u64 大端字节)
//! ```
//! 每两个数据字节之后插入 0xFF, 负载中不会出现连续的 00 00.

use std::fmt;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use visklv_core::{VisionError, VisionResult};

/// 时间戳负载长度
pub const FRAME_TIMESTAMP_SIZE: usize = 28;

/// 微秒时间戳 key
pub const MICROSECOND_KEY: [u8; 16] = *b"CNGYmicrosectime";

/// 纳秒时间戳 key
pub const NANOSECOND_KEY: [u8; 16] = *b"CNGYnanosecstime";

/// 默认 lock 字节
pub const DEFAULT_LOCK: u8 = 0x1F;

/// lock 字节在负载中的偏移
const LOCK_OFFSET: usize = 16;

/// 数据字节相对 lock 之后的偏移 (高字节在前)
const DATA_OFFSETS: [usize; 8] = [0, 1, 3, 4, 6, 7, 9, 10];

/// 标记字节相对 lock 之后的偏移
const MARKER_OFFSETS: [usize; 3] = [2, 5, 8];

/// 时间戳精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimestampKind {
    Microsecond,
    Nanosecond,
}

impl TimestampKind {
    /// 对应的 16 字节 key
    pub fn key(self) -> &'static [u8; 16] {
        match self {
            Self::Microsecond => &MICROSECOND_KEY,
            Self::Nanosecond => &NANOSECOND_KEY,
        }
    }

    /// 每毫秒的计数单位
    pub fn units_per_millisecond(self) -> u64 {
        match self {
            Self::Microsecond => 1_000,
            Self::Nanosecond => 1_000_000,
        }
    }

    fn from_key(key: &[u8]) -> Option<Self> {
        if key == MICROSECOND_KEY {
            Some(Self::Microsecond)
        } else if key == NANOSECOND_KEY {
            Some(Self::Nanosecond)
        } else {
            None
        }
    }
}

impl fmt::Display for TimestampKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microsecond => write!(f, "Microsecond"),
            Self::Nanosecond => write!(f, "Nanosecond"),
        }
    }
}

/// 纳秒变体未经验证, 需启用 `nanosecond-timestamps` feature
fn ensure_supported(kind: TimestampKind) -> VisionResult<()> {
    match kind {
        TimestampKind::Microsecond => Ok(()),
        TimestampKind::Nanosecond if cfg!(feature = "nanosecond-timestamps") => {
            warn!("帧时间戳: 纳秒精度变体尚未经过验证");
            Ok(())
        }
        TimestampKind::Nanosecond => Err(VisionError::Unsupported(
            "纳秒精度帧时间戳未启用 (feature nanosecond-timestamps)".into(),
        )),
    }
}

/// 墙钟时间换算为计数值 (毫秒精度, 纪元之前按 0 处理)
///
/// 纳秒精度下约 2554 年之后会超出 u64, 返回 InvalidArgument.
fn units_from_datetime(kind: TimestampKind, time: &DateTime<Utc>) -> VisionResult<u64> {
    let millis = time.timestamp_millis().max(0) as u64;
    millis.checked_mul(kind.units_per_millisecond()).ok_or_else(|| {
        VisionError::InvalidArgument(format!("帧时间戳: {time} 超出 {kind} 计数范围"))
    })
}

/// 帧时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameTimestamp {
    kind: TimestampKind,
    lock: u8,
    value: u64,
}

impl FrameTimestamp {
    /// 由计数值构造
    pub fn new(kind: TimestampKind, value: u64, lock: u8) -> VisionResult<Self> {
        ensure_supported(kind)?;
        Ok(Self { kind, lock, value })
    }

    /// 由墙钟时间构造 (毫秒精度, 纪元之前按 0 处理)
    pub fn from_datetime(kind: TimestampKind, time: &DateTime<Utc>) -> VisionResult<Self> {
        ensure_supported(kind)?;
        Ok(Self {
            kind,
            lock: DEFAULT_LOCK,
            value: units_from_datetime(kind, time)?,
        })
    }

    /// 从 28 字节负载解析
    ///
    /// 长度不符或 key 无法识别时返回 None; 未启用的纳秒变体同样返回 None.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != FRAME_TIMESTAMP_SIZE {
            return None;
        }
        let kind = TimestampKind::from_key(&payload[..LOCK_OFFSET])?;
        if let Err(e) = ensure_supported(kind) {
            warn!("帧时间戳: 忽略负载, {e}");
            return None;
        }

        let body = &payload[LOCK_OFFSET + 1..];
        let value = DATA_OFFSETS
            .iter()
            .fold(0u64, |acc, &off| (acc << 8) | u64::from(body[off]));
        Some(Self {
            kind,
            lock: payload[LOCK_OFFSET],
            value,
        })
    }

    pub fn kind(&self) -> TimestampKind {
        self.kind
    }

    pub fn lock(&self) -> u8 {
        self.lock
    }

    /// 计数值 (微秒或纳秒)
    pub fn value(&self) -> u64 {
        self.value
    }

    /// 墙钟时间 (截断到毫秒)
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        let millis = self.value / self.kind.units_per_millisecond();
        DateTime::from_timestamp_millis(i64::try_from(millis).ok()?)
    }

    /// 按墙钟时间重设计数值, 精度与 lock 不变; 溢出时保持原值
    pub fn set_datetime(&mut self, time: &DateTime<Utc>) -> VisionResult<()> {
        self.value = units_from_datetime(self.kind, time)?;
        Ok(())
    }

    /// 序列化为本身精度的 28 字节负载
    pub fn to_bytes(&self) -> [u8; FRAME_TIMESTAMP_SIZE] {
        let mut out = [0u8; FRAME_TIMESTAMP_SIZE];
        out[..LOCK_OFFSET].copy_from_slice(self.kind.key());
        out[LOCK_OFFSET] = self.lock;

        let body = &mut out[LOCK_OFFSET + 1..];
        for (&off, byte) in DATA_OFFSETS.iter().zip(self.value.to_be_bytes()) {
            body[off] = byte;
        }
        for off in MARKER_OFFSETS {
            body[off] = 0xFF;
        }
        out
    }

    /// 序列化为指定精度的负载
    ///
    /// 目前只支持微秒到微秒, 涉及纳秒的转换返回 Unsupported.
    pub fn to_bytes_as(&self, kind: TimestampKind) -> VisionResult<[u8; FRAME_TIMESTAMP_SIZE]> {
        if kind == TimestampKind::Nanosecond || self.kind == TimestampKind::Nanosecond {
            return Err(VisionError::Unsupported(format!(
                "帧时间戳精度转换 {} -> {kind}",
                self.kind
            )));
        }
        Ok(self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: [u8; 28] = [
        b'C', b'N', b'G', b'Y', b'm', b'i', b'c', b'r', b'o', b's', b'e', b'c', b't', b'i', b'm',
        b'e', 0x1F, 0x00, 0x05, 0xFF, 0xE6, 0x0F, 0xFF, 0xD8, 0xB1, 0xFF, 0x7B, 0x12,
    ];

    #[test]
    fn test_帧时间戳_样本逐字节往返() {
        let ts = FrameTimestamp::parse(&SAMPLE).unwrap();
        assert_eq!(ts.kind(), TimestampKind::Microsecond);
        assert_eq!(ts.lock(), 0x1F);
        assert_eq!(ts.value(), 1_660_330_617_961_234);
        assert_eq!(ts.to_bytes(), SAMPLE);
        assert_eq!(ts.to_bytes_as(TimestampKind::Microsecond).unwrap(), SAMPLE);
    }

    #[test]
    fn test_帧时间戳_墙钟时间() {
        let ts = FrameTimestamp::parse(&SAMPLE).unwrap();
        let expected = Utc.with_ymd_and_hms(2022, 8, 12, 18, 56, 57).unwrap()
            + chrono::Duration::milliseconds(961);
        assert_eq!(ts.datetime(), Some(expected));
    }

    #[test]
    fn test_帧时间戳_从墙钟构造() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ts = FrameTimestamp::from_datetime(TimestampKind::Microsecond, &time).unwrap();
        assert_eq!(ts.lock(), DEFAULT_LOCK);
        let parsed = FrameTimestamp::parse(&ts.to_bytes()).unwrap();
        assert_eq!(parsed.datetime(), Some(time));
    }

    #[test]
    fn test_帧时间戳_负载无连续零字节() {
        let ts = FrameTimestamp::new(TimestampKind::Microsecond, 0, DEFAULT_LOCK).unwrap();
        let bytes = ts.to_bytes();
        assert!(bytes.windows(3).all(|w| w != [0, 0, 0]));
        assert_eq!(&bytes[17..], &[0, 0, 0xFF, 0, 0, 0xFF, 0, 0, 0xFF, 0, 0]);
    }

    #[test]
    fn test_帧时间戳_重设墙钟时间() {
        let mut ts = FrameTimestamp::parse(&SAMPLE).unwrap();
        let time = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        ts.set_datetime(&time).unwrap();
        assert_eq!(ts.value(), time.timestamp_millis() as u64 * 1000);
        assert_eq!(ts.lock(), 0x1F);
        assert_eq!(ts.datetime(), Some(time));

        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap();
        ts.set_datetime(&before_epoch).unwrap();
        assert_eq!(ts.value(), 0);
    }

    #[test]
    fn test_帧时间戳_计数值溢出报错() {
        let far = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            units_from_datetime(TimestampKind::Nanosecond, &far),
            Err(VisionError::InvalidArgument(_))
        ));
        assert_eq!(
            units_from_datetime(TimestampKind::Microsecond, &far).unwrap(),
            far.timestamp_millis() as u64 * 1000
        );

        // 微秒精度在 chrono 可表示的范围内不会溢出
        let mut ts = FrameTimestamp::parse(&SAMPLE).unwrap();
        let max = DateTime::<Utc>::MAX_UTC;
        ts.set_datetime(&max).unwrap();
        assert_eq!(
            ts.datetime().map(|t| t.timestamp_millis()),
            Some(max.timestamp_millis())
        );
    }

    #[cfg(feature = "nanosecond-timestamps")]
    #[test]
    fn test_帧时间戳_纳秒溢出保持原值() {
        let far = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            FrameTimestamp::from_datetime(TimestampKind::Nanosecond, &far),
            Err(VisionError::InvalidArgument(_))
        ));

        let mut ts = FrameTimestamp::new(TimestampKind::Nanosecond, 42, DEFAULT_LOCK).unwrap();
        assert!(ts.set_datetime(&far).is_err());
        assert_eq!(ts.value(), 42);
    }

    #[test]
    fn test_帧时间戳_未知key与长度不符() {
        let mut data = SAMPLE;
        data[0] = b'X';
        assert_eq!(FrameTimestamp::parse(&data), None);
        assert_eq!(FrameTimestamp::parse(&SAMPLE[..27]), None);
    }

    #[cfg(not(feature = "nanosecond-timestamps"))]
    #[test]
    fn test_帧时间戳_纳秒变体未启用() {
        assert!(matches!(
            FrameTimestamp::new(TimestampKind::Nanosecond, 1, DEFAULT_LOCK),
            Err(VisionError::Unsupported(_))
        ));
        let mut data = SAMPLE;
        data[..16].copy_from_slice(&NANOSECOND_KEY);
        assert_eq!(FrameTimestamp::parse(&data), None);
    }

    #[test]
    fn test_帧时间戳_纳秒转换不支持() {
        let ts = FrameTimestamp::parse(&SAMPLE).unwrap();
        assert!(matches!(
            ts.to_bytes_as(TimestampKind::Nanosecond),
            Err(VisionError::Unsupported(_))
        ));
    }
}
