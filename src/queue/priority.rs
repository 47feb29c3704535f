//! Strict-priority queue with drop-tail capacity.
//!
//! One FIFO per `PktPriority` class; higher classes are served to completion
//! before lower ones. An optional per-class byte quota bounds starvation: a
//! class that has transmitted at least its quota in consecutive bytes while a
//! lower class waits yields exactly one packet to the highest waiting lower
//! class, then its counter resets.

use std::any::Any;
use std::collections::VecDeque;

use super::base::QueueStats;
use crate::logger::LogEventKind;
use crate::net::{Network, Packet, PacketSink, PktPriority, SinkId, Wake};
use crate::sim::{drain_time, EventList};

const N_CLASSES: usize = 3;

fn class_of(prio: PktPriority) -> usize {
    // class 0 is the highest
    match prio {
        PktPriority::Hi => 0,
        PktPriority::Mid => 1,
        PktPriority::Lo => 2,
    }
}

#[derive(Debug)]
pub struct PrioQueue {
    self_id: SinkId,
    service_bps: u64,
    max_bytes: u64,
    bufs: [VecDeque<Packet>; N_CLASSES],
    queuesize: u64,
    /// per-class byte quota; None = pure strict priority
    quota: [Option<u64>; N_CLASSES],
    served: [u64; N_CLASSES],
    in_service: Option<Packet>,
    nodename: String,
    pub stats: QueueStats,
}

impl PrioQueue {
    pub fn new(service_bps: u64, max_bytes: u64) -> Self {
        Self {
            self_id: SinkId(usize::MAX),
            service_bps,
            max_bytes,
            bufs: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            queuesize: 0,
            quota: [None; N_CLASSES],
            served: [0; N_CLASSES],
            in_service: None,
            nodename: format!("prioqueue({}Mb/s,{}bytes)", service_bps / 1_000_000, max_bytes),
            stats: QueueStats::default(),
        }
    }

    pub fn set_class_quota(&mut self, prio: PktPriority, quota_bytes: Option<u64>) {
        self.quota[class_of(prio)] = quota_bytes;
    }

    pub fn queuesize(&self) -> u64 {
        self.queuesize
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    fn is_buffered_empty(&self) -> bool {
        self.bufs.iter().all(|b| b.is_empty())
    }

    /// Pick the class to serve next. Strict priority unless the winning
    /// class is over quota while a lower class waits.
    fn pick_class(&mut self) -> Option<usize> {
        let winner = (0..N_CLASSES).find(|&c| !self.bufs[c].is_empty())?;
        if let Some(q) = self.quota[winner] {
            if self.served[winner] >= q {
                if let Some(lower) = ((winner + 1)..N_CLASSES).find(|&c| !self.bufs[c].is_empty()) {
                    self.served[winner] = 0;
                    return Some(lower);
                }
            }
        }
        Some(winner)
    }

    fn begin_service(&mut self, sim: &mut EventList) {
        debug_assert!(self.in_service.is_none());
        let Some(c) = self.pick_class() else { return };
        let pkt = self.bufs[c].pop_front().expect("picked class non-empty");
        self.served[c] = self.served[c].saturating_add(pkt.size_bytes as u64);
        if self.bufs[c].is_empty() {
            self.served[c] = 0;
        }
        let dt = drain_time(pkt.size_bytes, self.service_bps);
        sim.schedule_in(dt, Wake { sink: self.self_id });
        self.in_service = Some(pkt);
    }
}

impl PacketSink for PrioQueue {
    fn name(&self) -> &str {
        &self.nodename
    }

    fn on_attach(&mut self, id: SinkId) {
        self.self_id = id;
    }

    fn receive(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network) {
        self.stats.enqueued = self.stats.enqueued.saturating_add(1);
        let sz = pkt.size_bytes as u64;
        if self.queuesize.saturating_add(sz) > self.max_bytes {
            self.stats.dropped = self.stats.dropped.saturating_add(1);
            self.stats.bytes_dropped = self.stats.bytes_dropped.saturating_add(sz);
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
            return;
        }
        self.queuesize = self.queuesize.saturating_add(sz);
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
        self.bufs[class_of(pkt.prio)].push_back(pkt);
        if self.in_service.is_none() {
            self.begin_service(sim);
        }
    }

    fn do_next_event(&mut self, sim: &mut EventList, net: &mut Network) {
        let Some(pkt) = self.in_service.take() else {
            return;
        };
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
        if !self.is_buffered_empty() {
            self.begin_service(sim);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
