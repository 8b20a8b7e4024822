//! 统一错误类型定义.
//!
//! 所有 visklv crate 共用的错误类型, 支持跨模块传播.
//!
//! 注意两类"异常"情况不在此处建模:
//! - 未识别的 key/tag: 静默跳过或作为未知条目保留
//! - 校验和不匹配: 通过负数校验和上报, 属于数据而非故障

use thiserror::Error;

/// Vision KLV 统一错误类型
#[derive(Debug, Error)]
pub enum VisionError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 格式字符串无效 (如版本号字符串)
    #[error("格式无效: {0}")]
    InvalidFormat(String),

    /// 无效数据 (截断或损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// KLV 负载超过单字节长度字段上限
    #[error("KLV 负载过大: {size} 字节 (上限 {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// 补丁后的 PSI section 无法容纳在单个 TS 包中
    #[error("PSI section 过大: {size} 字节 (上限 {max})")]
    SectionTooLarge { size: usize, max: usize },

    /// 不支持的操作 (纳秒时间戳, 跨类型转换等)
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 扫描完整个输入后仍未找到 PMT
    #[error("扫描完整个 TS 输入后未找到任何 PMT, TS 可能已损坏")]
    NoProgramTable,

    /// PMT 跨越多个 TS 包, 无法原地补丁
    #[error("PMT 跨越多个 TS 包, 不支持原地补丁")]
    UnsupportedFragmentedTable,

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,
}

/// Vision KLV 统一 Result 类型
pub type VisionResult<T> = Result<T, VisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误信息_包含尺寸() {
        let err = VisionError::PayloadTooLarge { size: 300, max: 255 };
        let msg = err.to_string();
        assert!(msg.contains("300"));
        assert!(msg.contains("255"));
    }

    #[test]
    fn test_io_错误转换() {
        fn open() -> VisionResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(VisionError::Io(_))));
    }
}
