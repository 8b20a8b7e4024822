//! KLV 注入调度.
//!
//! 状态机:
//! ```text
//! Warming --(首个 PMT 补丁成功)--> Armed --(首个 PCR)--> Running
//! ```
//!
//! Running 状态下以首个 PCR 为零点计算经过时间, 每当
//! `elapsed_ms > 已注入条数 * interval_ms` 时取出下一条记录,
//! 封装为 PES 后拆成 TS 包放入有界 FIFO, 由后续的空包位置逐个替换输出.

use std::collections::VecDeque;

use log::{debug, info, warn};
use visklv_codec::VisionMetadata;
use visklv_core::VisionResult;

use crate::packet::{PID_NULL, TS_PACKET_SIZE, TsHeader, packetize};
use crate::pes::{PesOptions, PesStreamId, wrap_pes};

/// 每 100 纳秒对应的 27MHz 计数
pub const PCR_TICKS_PER_100NS: f64 = 2.7;

/// 每毫秒对应的 100 纳秒单位数
const HUNDRED_NS_PER_MS: f64 = 10_000.0;

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// 尚未定位节目表
    Warming,
    /// 节目表已就绪, 等待时钟
    Armed,
    /// 时钟已建立, 按节拍注入
    Running,
}

/// 一次时钟采样
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// 27MHz PCR
    pub pcr: u64,
    /// adaptation field 的 discontinuity_indicator
    pub discontinuity: bool,
}

/// KLV 注入调度器
#[derive(Debug)]
pub struct KlvInjectionScheduler {
    state: SchedulerState,
    klv_pid: u16,
    continuity_counter: u8,
    interval_ms: u64,
    buffer_capacity: usize,
    reference_clock: Option<u64>,
    last_clock: Option<u64>,
    injection_count: u64,
    source: VecDeque<VisionMetadata>,
    buffer: VecDeque<[u8; TS_PACKET_SIZE]>,
    exhausted_logged: bool,
    dropped_packets: u64,
}

impl KlvInjectionScheduler {
    pub fn new(
        klv_pid: u16,
        interval_ms: u64,
        buffer_capacity: usize,
        source: impl IntoIterator<Item = VisionMetadata>,
    ) -> Self {
        Self {
            state: SchedulerState::Warming,
            klv_pid,
            continuity_counter: 0,
            interval_ms,
            buffer_capacity,
            reference_clock: None,
            last_clock: None,
            injection_count: 0,
            source: source.into_iter().collect(),
            buffer: VecDeque::with_capacity(buffer_capacity),
            exhausted_logged: false,
            dropped_packets: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// 节目表已就绪
    pub fn arm(&mut self) {
        if self.state == SchedulerState::Warming {
            debug!("KLV 调度: Warming -> Armed");
            self.state = SchedulerState::Armed;
        }
    }

    /// 记录时钟采样, 不连续的采样被忽略
    ///
    /// 返回采样是否被采纳.
    pub fn observe_clock(&mut self, sample: ClockSample) -> bool {
        if self.state == SchedulerState::Warming {
            return false;
        }
        if sample.discontinuity {
            warn!("KLV 调度: PCR 不连续 (pcr={}), 跳过该采样", sample.pcr);
            return false;
        }
        if self.reference_clock.is_none() {
            debug!("KLV 调度: 参考 PCR={}, Armed -> Running", sample.pcr);
            self.reference_clock = Some(sample.pcr);
            self.state = SchedulerState::Running;
        }
        self.last_clock = Some(sample.pcr);
        true
    }

    /// 自首个 PCR 以来经过的毫秒数
    pub fn elapsed_ms(&self) -> f64 {
        match (self.reference_clock, self.last_clock) {
            (Some(reference), Some(last)) => {
                last.saturating_sub(reference) as f64 / PCR_TICKS_PER_100NS / HUNDRED_NS_PER_MS
            }
            _ => 0.0,
        }
    }

    /// 下一条记录是否到期
    pub fn is_due(&self) -> bool {
        self.state == SchedulerState::Running
            && self.elapsed_ms() > (self.injection_count * self.interval_ms) as f64
    }

    /// 若到期则生成下一条记录的 TS 包并入队
    ///
    /// 返回是否取出了一条记录. 记录源耗尽后不再产生输出.
    pub fn poll(&mut self) -> VisionResult<bool> {
        if !self.is_due() {
            return Ok(false);
        }
        let Some(record) = self.source.pop_front() else {
            if !self.exhausted_logged {
                info!(
                    "KLV 调度: 记录源已耗尽, 共调度 {} 条",
                    self.injection_count
                );
                self.exhausted_logged = true;
            }
            return Ok(false);
        };

        let entity = record.encode()?;
        let pes = wrap_pes(
            PesStreamId::PrivateStream1,
            entity.source_data(),
            &PesOptions {
                data_alignment: true,
                pts: None,
            },
        )?;
        let packets = packetize(self.klv_pid, &mut self.continuity_counter, &pes);

        if self.buffer.len() + packets.len() > self.buffer_capacity {
            warn!(
                "KLV 调度: 缓冲区已满 ({}/{}), 丢弃 {} 个 KLV 包",
                self.buffer.len(),
                self.buffer_capacity,
                packets.len()
            );
            self.dropped_packets += packets.len() as u64;
        } else {
            self.buffer.extend(packets);
        }

        self.injection_count += 1;
        debug!(
            "KLV 调度: 第 {} 条到期, elapsed={:.1}ms, 缓冲 {} 包",
            self.injection_count,
            self.elapsed_ms(),
            self.buffer.len()
        );
        Ok(true)
    }

    /// 用缓冲中最早的 KLV 包替换空包
    ///
    /// 返回是否发生了替换.
    pub fn substitute(&mut self, packet: &mut [u8; TS_PACKET_SIZE]) -> bool {
        let is_null = TsHeader::parse(packet).is_ok_and(|h| h.pid == PID_NULL);
        if !is_null {
            return false;
        }
        match self.buffer.pop_front() {
            Some(klv) => {
                *packet = klv;
                true
            }
            None => false,
        }
    }

    /// 已调度的记录数
    pub fn injection_count(&self) -> u64 {
        self.injection_count
    }

    /// 缓冲中待输出的包数
    pub fn buffered_packets(&self) -> usize {
        self.buffer.len()
    }

    /// 尚未调度的记录数
    pub fn remaining_records(&self) -> usize {
        self.source.len()
    }

    /// 因缓冲区满而丢弃的包数
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }
}
