//! 队列公共骨架
//!
//! 所有队列变体共享同一外部契约：上游 sink 调用 `receive`，队列
//! 入队或丢弃；服务线空闲且缓冲非空时，按 `size_bits / service_rate`
//! 调度一次发送完成事件；完成时把包交给下一跳并继续服务。
//!
//! 正在串行化的包仍留在缓冲里计入占用，发送完成时才出队。

use std::collections::VecDeque;

use crate::logger::LogEventKind;
use crate::net::{Network, Packet, SinkId, Wake};
use crate::sim::{drain_time, EventList, SimTime};

/// 每队列计数。
///
/// 不变式：`enqueued == dequeued + dropped + 当前缓冲包数`
/// （enqueued 计所有到达，包括被拒绝的）。
#[derive(Debug, Default, Clone)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub bytes_dropped: u64,
}

/// 变体间共享的队列状态与服务循环。
#[derive(Debug)]
pub struct QueueCore {
    pub(crate) self_id: SinkId,
    pub(crate) service_bps: u64,
    pub(crate) max_bytes: u64,
    pub(crate) q: VecDeque<Packet>,
    pub(crate) queuesize: u64,
    pub(crate) nodename: String,
    pub stats: QueueStats,
}

impl QueueCore {
    pub fn new(service_bps: u64, max_bytes: u64, kind: &str) -> Self {
        Self {
            self_id: SinkId(usize::MAX),
            service_bps,
            max_bytes,
            q: VecDeque::new(),
            queuesize: 0,
            nodename: format!("{kind}({}Mb/s,{}bytes)", service_bps / 1_000_000, max_bytes),
            stats: QueueStats::default(),
        }
    }

    pub fn queuesize(&self) -> u64 {
        self.queuesize
    }

    pub fn maxsize(&self) -> u64 {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub(crate) fn drain_time(&self, bytes: u32) -> SimTime {
        drain_time(bytes, self.service_bps)
    }

    /// 接受一个包进入缓冲；若之前为空则开始服务。
    pub(crate) fn enqueue(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network) {
        let was_empty = self.q.is_empty();
        self.queuesize = self.queuesize.saturating_add(pkt.size_bytes as u64);
        net.logs.emit(
            sim.now(),
            LogEventKind::QueueEnqueue {
                queue: self.self_id.0,
                pkt_id: pkt.id,
                flow_id: pkt.flow_id,
                q_bytes: self.queuesize,
                cap_bytes: self.max_bytes,
            },
        );
        self.q.push_back(pkt);
        if was_empty {
            self.begin_service(sim);
        }
    }

    /// 记一次策略丢弃并把包还给池。
    pub(crate) fn drop_pkt(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network) {
        self.stats.dropped = self.stats.dropped.saturating_add(1);
        self.stats.bytes_dropped = self.stats.bytes_dropped.saturating_add(pkt.size_bytes as u64);
        net.logs.emit(
            sim.now(),
            LogEventKind::QueueDrop {
                queue: self.self_id.0,
                pkt_id: pkt.id,
                flow_id: pkt.flow_id,
                q_bytes: self.queuesize,
                cap_bytes: self.max_bytes,
            },
        );
        net.on_dropped(pkt);
    }

    pub(crate) fn begin_service(&mut self, sim: &mut EventList) {
        let head = self.q.front().expect("begin_service on empty queue");
        let dt = self.drain_time(head.size_bytes);
        sim.schedule_in(dt, Wake { sink: self.self_id });
    }

    /// 发送完成：出队队头、交给下一跳、继续服务。
    pub(crate) fn complete_service(&mut self, sim: &mut EventList, net: &mut Network) {
        let pkt = self.q.pop_front().expect("complete_service on empty queue");
        self.queuesize = self.queuesize.saturating_sub(pkt.size_bytes as u64);
        self.stats.dequeued = self.stats.dequeued.saturating_add(1);
        net.logs.emit(
            sim.now(),
            LogEventKind::QueueService {
                queue: self.self_id.0,
                pkt_id: pkt.id,
                flow_id: pkt.flow_id,
                q_bytes: self.queuesize,
            },
        );
        net.send_on(pkt, sim);
        if !self.q.is_empty() {
            self.begin_service(sim);
        }
    }
}
