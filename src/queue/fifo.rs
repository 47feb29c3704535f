//! FIFO（尾丢弃）队列
//!
//! 当 `当前占用 + 包大小 > 容量` 时，直接丢弃新到达的 packet。

use std::any::Any;

use super::base::QueueCore;
use crate::net::{Network, Packet, PacketSink, SinkId};
use crate::sim::EventList;

#[derive(Debug)]
pub struct FifoQueue {
    core: QueueCore,
}

impl FifoQueue {
    pub fn new(service_bps: u64, max_bytes: u64) -> Self {
        Self {
            core: QueueCore::new(service_bps, max_bytes, "queue"),
        }
    }

    pub fn stats(&self) -> &super::base::QueueStats {
        &self.core.stats
    }

    pub fn queuesize(&self) -> u64 {
        self.core.queuesize()
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn maxsize(&self) -> u64 {
        self.core.maxsize()
    }
}

impl PacketSink for FifoQueue {
    fn name(&self) -> &str {
        &self.core.nodename
    }

    fn on_attach(&mut self, id: SinkId) {
        self.core.self_id = id;
    }

    fn receive(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network) {
        self.core.stats.enqueued = self.core.stats.enqueued.saturating_add(1);
        if self.core.queuesize().saturating_add(pkt.size_bytes as u64) > self.core.maxsize() {
            self.core.drop_pkt(pkt, sim, net);
            return;
        }
        self.core.enqueue(pkt, sim, net);
    }

    fn do_next_event(&mut self, sim: &mut EventList, net: &mut Network) {
        self.core.complete_service(sim, net);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
