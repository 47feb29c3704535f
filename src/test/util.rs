//! Shared test fixtures.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::net::{Header, Network, Packet, PacketKind, PacketSink};
use crate::sim::{EventList, SimTime};

/// What a [`Collector`] remembers about each packet before freeing it.
#[derive(Debug, Clone)]
pub struct CollectedPkt {
    pub id: u64,
    pub flow_id: u64,
    pub kind: PacketKind,
    pub at: SimTime,
    pub size: u32,
    pub ce: bool,
    pub pause_wait: Option<SimTime>,
}

/// Terminal sink that records arrivals and frees the packet.
pub struct Collector {
    got: Arc<Mutex<Vec<CollectedPkt>>>,
}

impl Collector {
    pub fn new() -> (Self, Arc<Mutex<Vec<CollectedPkt>>>) {
        let got = Arc::new(Mutex::new(Vec::new()));
        (Self { got: Arc::clone(&got) }, got)
    }
}

impl PacketSink for Collector {
    fn name(&self) -> &str {
        "collector"
    }

    fn receive(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network) {
        let pause_wait = match &pkt.header {
            Header::Pause { wait } => Some(*wait),
            _ => None,
        };
        self.got.lock().expect("collector lock").push(CollectedPkt {
            id: pkt.id,
            flow_id: pkt.flow_id,
            kind: pkt.kind,
            at: sim.now(),
            size: pkt.size_bytes,
            ce: pkt.ecn.is_ce(),
            pause_wait,
        });
        net.on_delivered(pkt);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
