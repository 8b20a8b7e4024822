//! # visklv-codec
//!
//! Vision KLV 元数据与帧时间戳编解码库.
//!
//! - [`entity`]: KLV 分词 (local set / universal label)
//! - [`metadata`]: Vision 元数据记录的解码与编码
//! - [`decoder`]: 从实体序列中挑出 Vision 记录的解码器工厂
//! - [`timestamp`] / [`sei`]: 视频 SEI 中的帧级时间戳

pub mod decoder;
pub mod entity;
pub mod fixed_point;
pub mod json;
pub mod metadata;
pub mod sei;
pub mod tags;
pub mod timestamp;

pub use decoder::{DecoderOptions, VisionMetadataDecoder};
pub use entity::{LocalSetEntity, UniversalLabelEntity, parse_local_set, parse_universal_labels};
pub use json::VisionMetadataJson;
pub use metadata::{VISION_METADATA_KEY, VisionMetadata};
pub use sei::VideoCodec;
pub use tags::VisionTag;
pub use timestamp::{FrameTimestamp, TimestampKind};
