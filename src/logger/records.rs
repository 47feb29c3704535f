//! 日志记录类型
//!
//! 所有记录可序列化，便于落盘后离线分析。

use serde::{Deserialize, Serialize};

/// TCP 拥塞控制阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpCcState {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// 一条日志记录：时间（皮秒）+ 事件。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub t_ps: u64,
    #[serde(flatten)]
    pub kind: LogEventKind,
}

/// 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEventKind {
    QueueEnqueue {
        queue: usize,
        pkt_id: u64,
        flow_id: u64,
        q_bytes: u64,
        cap_bytes: u64,
    },
    QueueService {
        queue: usize,
        pkt_id: u64,
        flow_id: u64,
        q_bytes: u64,
    },
    QueueDrop {
        queue: usize,
        pkt_id: u64,
        flow_id: u64,
        q_bytes: u64,
        cap_bytes: u64,
    },
    /// PFC 暂停/恢复帧已发出
    QueuePause {
        queue: usize,
        pausing: bool,
        q_bytes: u64,
    },
    PktSend {
        flow_id: u64,
        seq: u64,
        bytes: u32,
        retransmit: bool,
    },
    PktRecv {
        flow_id: u64,
        seq: u64,
        bytes: u32,
    },
    /// 每次 cwnd/状态变化后的 TCP 快照（画 sawtooth 用）
    TcpState {
        conn: u64,
        cwnd: u64,
        ssthresh: u64,
        state: TcpCcState,
        rtt_ps: u64,
        rto_ps: u64,
    },
    TcpRto {
        conn: u64,
        seq: u64,
        backoff_rto_ps: u64,
    },
    MptcpWindow {
        conn: u64,
        total_cwnd: u64,
        alfa: f64,
    },
}
