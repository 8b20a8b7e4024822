//! # visklv
//!
//! 纯 Rust 实现的 Vision KLV 元数据框架.
//!
//! - **元数据记录**: 带 BCC-16 校验和的 local set, 定点数坐标/高度/方位编码
//! - **帧时间戳**: 视频 SEI 中抗 start code 仿冒的 28 字节时间戳
//! - **TS 注入**: 为已有节目追加异步 KLV 流, PMT 原地补丁, 按 PCR 节拍替换空包
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use visklv::codec::VisionMetadata;
//!
//! let mut meta = VisionMetadata::new();
//! meta.set_camera_name(Some("gate-1"));
//! meta.set_camera_lat(Some(39.9042));
//! let entity = meta.encode().unwrap();
//! println!("{} 字节", entity.source_data().len());
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `visklv-core` | 错误类型, CRC32/BCC-16 校验 |
//! | `visklv-codec` | KLV 分词, 元数据记录, 帧时间戳, SEI |
//! | `visklv-format` | TS 包/PES/PSI, PMT 补丁, KLV 注入与解复用 |

/// 错误类型与校验算法
pub use visklv_core as core;

/// 元数据与帧时间戳编解码
pub use visklv_codec as codec;

/// MPEG-TS 注入与解复用
pub use visklv_format as format;

/// 获取 visklv 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
