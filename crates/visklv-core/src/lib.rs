//! # visklv-core
//!
//! Vision KLV 框架核心库, 提供统一错误类型与校验和算法.
//!
//! 本 crate 是 `visklv-codec` 与 `visklv-format` 的共同底层.

pub mod crc;
pub mod error;

// 重导出常用类型
pub use error::{VisionError, VisionResult};
