//! Vision 元数据集合的本地 tag 表.

use std::fmt;

/// Vision local set tag
///
/// 编号以 BER-OID 形式写入 local set 的 key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum VisionTag {
    /// BCC-16 块校验, 2 字节大端
    Checksum = 1,
    /// 元数据时间戳, 8 字节大端微秒
    Timestamp = 2,
    /// 事件标识, UTF-8
    EventId = 3,
    /// 事件开始时间, 8 字节大端微秒
    EventStartTime = 4,
    /// 相机名称, UTF-8
    CameraName = 5,
    /// 相机朝向, 2 字节大端 (0..360 度)
    CameraDirection = 6,
    /// 相机纬度, 4 字节大端定点数
    CameraLat = 7,
    /// 相机经度, 4 字节大端定点数
    CameraLong = 8,
    /// 相机海拔, 2 字节大端定点数
    CameraHeight = 9,
    /// 剩余电量百分比, 1 字节
    BatteryRemaining = 10,
    /// 剩余存储百分比, 1 字节
    StorageRemaining = 11,
    /// 版本号, 1 字节
    VisionVerNum = 99,
}

impl VisionTag {
    /// 所有已定义的 tag (按编号排序)
    pub const ALL: [VisionTag; 12] = [
        VisionTag::Checksum,
        VisionTag::Timestamp,
        VisionTag::EventId,
        VisionTag::EventStartTime,
        VisionTag::CameraName,
        VisionTag::CameraDirection,
        VisionTag::CameraLat,
        VisionTag::CameraLong,
        VisionTag::CameraHeight,
        VisionTag::BatteryRemaining,
        VisionTag::StorageRemaining,
        VisionTag::VisionVerNum,
    ];

    /// 按编号查找 tag, 未定义的编号返回 None
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| u32::from(tag.id()) == id)
    }

    /// tag 编号
    pub fn id(self) -> u8 {
        self as u8
    }

    /// tag 名称, 用于已知实体映射的 key
    pub fn name(self) -> &'static str {
        match self {
            Self::Checksum => "Checksum",
            Self::Timestamp => "Timestamp",
            Self::EventId => "EventId",
            Self::EventStartTime => "EventStartTime",
            Self::CameraName => "CameraName",
            Self::CameraDirection => "CameraDirection",
            Self::CameraLat => "CameraLat",
            Self::CameraLong => "CameraLong",
            Self::CameraHeight => "CameraHeight",
            Self::BatteryRemaining => "BatteryRemaining",
            Self::StorageRemaining => "StorageRemaining",
            Self::VisionVerNum => "VisionVerNum",
        }
    }
}

impl fmt::Display for VisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_编号查找() {
        assert_eq!(VisionTag::from_id(1), Some(VisionTag::Checksum));
        assert_eq!(VisionTag::from_id(99), Some(VisionTag::VisionVerNum));
        assert_eq!(VisionTag::from_id(12), None);
        assert_eq!(VisionTag::from_id(0), None);
    }

    #[test]
    fn test_tag_名称与显示() {
        assert_eq!(VisionTag::EventId.name(), "EventId");
        assert_eq!(VisionTag::CameraLat.to_string(), "CameraLat(7)");
    }
}
