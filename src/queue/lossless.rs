//! Lossless (PFC-style) queue.
//!
//! Instead of dropping on overflow, signal backpressure: above the
//! high-water mark send a PAUSE frame to the configured upstream sink,
//! below the low-water mark send RESUME (wait == 0). A received PAUSE
//! halts our own service at the next packet boundary; serialization in
//! progress is never preempted.
//!
//! Packets are never dropped because of occupancy. Policy drops remain:
//! a packet whose TTL expires here is discarded.

use std::any::Any;
use std::collections::VecDeque;

use tracing::{error, trace};

use super::base::QueueStats;
use crate::logger::LogEventKind;
use crate::net::{Header, Network, Packet, PacketKind, PacketSink, SinkId, Wake};
use crate::sim::{drain_time, EventList, SimTime};

/// Pause quantum carried in PAUSE frames. The value is advisory: RESUME
/// frames end a pause early, which is how this queue always uses it.
const PAUSE_QUANTUM: SimTime = SimTime(1_000_000_000); // 1 ms

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Ready,
    Paused,
}

#[derive(Debug)]
pub struct LosslessQueue {
    self_id: SinkId,
    service_bps: u64,
    max_bytes: u64,
    high_bytes: u64,
    low_bytes: u64,
    q: VecDeque<Packet>,
    queuesize: u64,
    /// a service-completion wake is outstanding
    busy: bool,
    /// we received a PAUSE and must not start new transmissions
    paused_recv: bool,
    /// whether we have paused our upstream
    state_send: SendState,
    upstream: Option<SinkId>,
    nodename: String,
    pub stats: QueueStats,
}

impl LosslessQueue {
    pub fn new(service_bps: u64, max_bytes: u64, high_bytes: u64, low_bytes: u64) -> Self {
        assert!(high_bytes > low_bytes, "high watermark must exceed low watermark");
        assert!(max_bytes >= high_bytes, "capacity below high watermark");
        Self {
            self_id: SinkId(usize::MAX),
            service_bps,
            max_bytes,
            high_bytes,
            low_bytes,
            q: VecDeque::new(),
            queuesize: 0,
            busy: false,
            paused_recv: false,
            state_send: SendState::Ready,
            upstream: None,
            nodename: format!(
                "lossless({}Mb/s,{}bytes)",
                service_bps / 1_000_000,
                max_bytes
            ),
            stats: QueueStats::default(),
        }
    }

    /// The sink that receives our PAUSE/RESUME frames. PFC chains are
    /// built lossless-to-lossless; only this queue type understands them.
    pub fn set_upstream(&mut self, upstream: SinkId) {
        self.upstream = Some(upstream);
    }

    pub fn queuesize(&self) -> u64 {
        self.queuesize
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn is_paused(&self) -> bool {
        self.paused_recv
    }

    fn begin_service(&mut self, sim: &mut EventList) {
        debug_assert!(!self.busy);
        let head = self.q.front().expect("begin_service on empty queue");
        let dt = drain_time(head.size_bytes, self.service_bps);
        sim.schedule_in(dt, Wake { sink: self.self_id });
        self.busy = true;
    }

    fn send_pause(&mut self, wait: SimTime, sim: &mut EventList, net: &mut Network) {
        let Some(up) = self.upstream else { return };
        let pkt = net.pool.pause(wait);
        net.logs.emit(
            sim.now(),
            LogEventKind::QueuePause {
                queue: self.self_id.0,
                pausing: wait > SimTime::ZERO,
                q_bytes: self.queuesize,
            },
        );
        net.deliver(up, pkt, sim);
    }
}

impl PacketSink for LosslessQueue {
    fn name(&self) -> &str {
        &self.nodename
    }

    fn on_attach(&mut self, id: SinkId) {
        self.self_id = id;
    }

    fn receive(&mut self, mut pkt: Packet, sim: &mut EventList, net: &mut Network) {
        if pkt.kind == PacketKind::EthPause {
            let Header::Pause { wait } = &pkt.header else {
                panic!("EthPause packet without pause header");
            };
            self.paused_recv = *wait > SimTime::ZERO;
            trace!(queue = self.self_id.0, paused = self.paused_recv, "pause frame");
            net.pool.free(pkt);
            if !self.paused_recv && !self.busy && !self.q.is_empty() {
                self.begin_service(sim);
            }
            return;
        }

        self.stats.enqueued = self.stats.enqueued.saturating_add(1);

        // policy drop: TTL expiry
        pkt.ttl = pkt.ttl.saturating_sub(1);
        if pkt.ttl == 0 {
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
            return;
        }

        self.queuesize = self.queuesize.saturating_add(pkt.size_bytes as u64);
        if self.queuesize > self.max_bytes {
            // backpressure failed us; a real PFC deployment sizes the
            // headroom so this cannot happen
            error!(
                queue = self.self_id.0,
                q_bytes = self.queuesize,
                cap = self.max_bytes,
                "lossless queue above capacity; check watermarks/headroom"
            );
        }
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

        if self.queuesize > self.high_bytes && self.state_send == SendState::Ready {
            self.state_send = SendState::Paused;
            self.send_pause(PAUSE_QUANTUM, sim, net);
        }

        if !self.busy && !self.paused_recv {
            self.begin_service(sim);
        }
    }

    fn do_next_event(&mut self, sim: &mut EventList, net: &mut Network) {
        self.busy = false;
        let Some(pkt) = self.q.pop_front() else { return };
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

        if self.queuesize < self.low_bytes && self.state_send == SendState::Paused {
            self.state_send = SendState::Ready;
            self.send_pause(SimTime::ZERO, sim, net);
        }

        if !self.q.is_empty() && !self.paused_recv {
            self.begin_service(sim);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
