//! 传播时延管道
//!
//! 链路的一个方向上的“线”：对每个进入的包施加固定时延后交给下一跳。
//! 管道没有缓冲上限，也不限速——它表示线缆本身，不是接口。

use std::any::Any;
use std::collections::VecDeque;

use super::id::SinkId;
use super::network::{Network, PacketSink, Wake};
use super::packet::Packet;
use crate::sim::{EventList, SimTime};

pub struct Pipe {
    delay: SimTime,
    self_id: SinkId,
    inflight: VecDeque<(SimTime, Packet)>,
    nodename: String,
}

impl Pipe {
    pub fn new(delay: SimTime) -> Self {
        Self {
            delay,
            self_id: SinkId(usize::MAX),
            inflight: VecDeque::new(),
            nodename: format!("pipe({}us)", delay.as_micros()),
        }
    }

    pub fn delay(&self) -> SimTime {
        self.delay
    }
}

impl PacketSink for Pipe {
    fn name(&self) -> &str {
        &self.nodename
    }

    fn on_attach(&mut self, id: SinkId) {
        self.self_id = id;
    }

    fn receive(&mut self, pkt: Packet, sim: &mut EventList, _net: &mut Network) {
        let arrive = sim.now().saturating_add(self.delay);
        // 没有在途包时需要重新挂起唤醒；否则已有更早的唤醒在排队
        if self.inflight.is_empty() {
            sim.schedule(arrive, Wake { sink: self.self_id });
        }
        self.inflight.push_back((arrive, pkt));
    }

    fn do_next_event(&mut self, sim: &mut EventList, net: &mut Network) {
        let Some((_, pkt)) = self.inflight.pop_front() else {
            return;
        };
        net.send_on(pkt, sim);
        if let Some(&(next_at, _)) = self.inflight.front() {
            sim.schedule(next_at, Wake { sink: self.self_id });
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
