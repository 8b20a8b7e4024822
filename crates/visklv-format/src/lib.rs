//! # visklv-format
//!
//! Vision KLV 框架 MPEG-TS 层.
//!
//! 在已有的传输流中为默认节目追加 KLV 数据流:
//! PMT 原地补丁, 按 PCR 节拍调度记录, 用 KLV 包替换空包.
//! 同时提供反方向的 KLV/视频 PES 解复用.

pub mod demuxer;
pub mod muxer;
pub mod packet;
pub mod patch;
pub mod pes;
pub mod psi;
pub mod scheduler;

pub use demuxer::{DemuxEvent, KlvTsDemuxer};
pub use muxer::{KlvMuxOptions, KlvPidMuxer, MuxStats, stamp_records};
pub use packet::{TS_PACKET_SIZE, TsHeader};
pub use psi::{EsInfo, ProgramMapTable, PsiTracker};
pub use scheduler::{KlvInjectionScheduler, SchedulerState};
