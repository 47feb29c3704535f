//! 队列策略（Queue disciplines）
//!
//! 提供 FIFO（尾丢弃）、RED（随机早期丢弃/ECN 标记）、严格优先级和
//! 无损（PFC 背压）四种队列变体；入队策略不同，服务循环共享。

mod base;
mod fifo;
mod lossless;
mod priority;
mod random;

pub use base::{QueueCore, QueueStats};
pub use fifo::FifoQueue;
pub use lossless::LosslessQueue;
pub use priority::PrioQueue;
pub use random::{RandomQueue, RedParams};

pub const DEFAULT_PKT_BYTES: u64 = 1500;

/// 把“包数”换算成缓冲字节容量。
pub fn mem_from_pkt(pkts: u64) -> u64 {
    pkts.saturating_mul(DEFAULT_PKT_BYTES)
}
