//! Sink 注册表与数据包投递
//!
//! 布线层拥有所有组件：每个组件（队列、管道、协议端点）注册进
//! `Network`，得到一个 `SinkId`；组件之间只通过 id 引用彼此，
//! 从而打破 source ↔ sink ↔ route 的循环引用。
//!
//! 投递使用 take/put-back 模式：处理期间把 sink 从槽位里取出，
//! 这样它的处理函数可以自由地可变借用其余网络状态。

use std::any::Any;
use std::collections::HashMap;

use super::flow::FlowStats;
use super::id::SinkId;
use super::packet::Packet;
use crate::logger::LogManager;
use crate::proto::mptcp::MptcpStack;
use crate::proto::tcp::TcpStack;
use crate::sim::{Event, EventList, World};
use tracing::{debug, trace};

/// 数据包 sink：任何能接收数据包的组件。
///
/// `do_next_event` 是组件的定时回调（由 `Wake` 事件驱动）；
/// 纯被动组件可以不实现。
pub trait PacketSink: Send + Any {
    fn name(&self) -> &str;

    /// 注册时由 Network 回调，组件借此记住自己的 id。
    fn on_attach(&mut self, _id: SinkId) {}

    /// 接收数据包
    fn receive(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network);

    /// 定时回调（`Wake` 事件）
    fn do_next_event(&mut self, _sim: &mut EventList, _net: &mut Network) {}

    fn as_any(&self) -> &dyn Any;
}

/// 全局统计信息
#[derive(Debug, Default)]
pub struct Stats {
    pub delivered_pkts: u64,
    pub delivered_bytes: u64,
    pub dropped_pkts: u64,
    pub dropped_bytes: u64,
}

/// 网络：sink 注册表 + 数据包池 + 协议栈 + 统计 + 日志。
#[derive(Default)]
pub struct Network {
    sinks: Vec<Option<Box<dyn PacketSink>>>,
    names: Vec<String>,
    pub pool: super::packet::PacketPool,
    pub tcp: TcpStack,
    pub mptcp: MptcpStack,
    pub stats: Stats,
    pub flows: HashMap<u64, FlowStats>,
    pub logs: LogManager,
}

impl Network {
    /// 注册一个 sink，返回其 id。
    pub fn add_sink(&mut self, mut sink: Box<dyn PacketSink>) -> SinkId {
        let id = SinkId(self.sinks.len());
        sink.on_attach(id);
        self.names.push(sink.name().to_string());
        self.sinks.push(Some(sink));
        id
    }

    pub fn sink_name(&self, id: SinkId) -> &str {
        &self.names[id.0]
    }

    /// 只读访问某个 sink（测试/统计用）。处理中的 sink 返回 None。
    pub fn sink(&self, id: SinkId) -> Option<&dyn PacketSink> {
        self.sinks.get(id.0).and_then(|s| s.as_deref())
    }

    /// 把包交给路由上的下一跳。
    ///
    /// 路由耗尽却仍被要求转发是布线错误，直接 panic。
    pub fn send_on(&mut self, mut pkt: Packet, sim: &mut EventList) {
        let Some(next) = pkt.next_sink() else {
            panic!(
                "packet {} (flow {}) ran off the end of its route at hop {}",
                pkt.id, pkt.flow_id, pkt.nexthop
            );
        };
        pkt.nexthop = pkt.nexthop.saturating_add(1);
        self.deliver(next, pkt, sim);
    }

    /// 把包直接交给指定 sink 处理（不改动路由游标）。
    pub fn deliver(&mut self, to: SinkId, pkt: Packet, sim: &mut EventList) {
        trace!(pkt_id = pkt.id, flow_id = pkt.flow_id, to = ?to, "投递数据包");
        // 暂时把 sink 取出来，避免 &mut self 与 &mut sink 的重叠借用。
        let mut sink = self.sinks[to.0].take().expect("sink exists and is not re-entered");
        sink.receive(pkt, sim, self);
        self.sinks[to.0] = Some(sink);
    }

    /// 定时唤醒某个 sink（由 `Wake` 事件调用）。
    pub(crate) fn wake(&mut self, id: SinkId, sim: &mut EventList) {
        let mut sink = self.sinks[id.0].take().expect("sink exists and is not re-entered");
        sink.do_next_event(sim, self);
        self.sinks[id.0] = Some(sink);
    }

    /// 包抵达最终目的地：计数并归还池中。
    pub fn on_delivered(&mut self, pkt: Packet) {
        self.stats.delivered_pkts = self.stats.delivered_pkts.saturating_add(1);
        self.stats.delivered_bytes = self.stats.delivered_bytes.saturating_add(pkt.size_bytes as u64);
        let fs = self.flows.entry(pkt.flow_id).or_default();
        fs.delivered_pkts = fs.delivered_pkts.saturating_add(1);
        fs.delivered_bytes = fs.delivered_bytes.saturating_add(pkt.size_bytes as u64);
        self.pool.free(pkt);
    }

    /// 包被丢弃：计数并归还池中。
    pub fn on_dropped(&mut self, pkt: Packet) {
        debug!(pkt_id = pkt.id, flow_id = pkt.flow_id, "丢弃数据包");
        self.stats.dropped_pkts = self.stats.dropped_pkts.saturating_add(1);
        self.stats.dropped_bytes = self.stats.dropped_bytes.saturating_add(pkt.size_bytes as u64);
        self.pool.free(pkt);
    }
}

/// 事件：唤醒一个 sink 的定时回调。
#[derive(Debug)]
pub struct Wake {
    pub sink: SinkId,
}

impl Event for Wake {
    fn execute(self: Box<Self>, sim: &mut EventList, world: &mut dyn World) {
        let w = world
            .as_any_mut()
            .downcast_mut::<super::net_world::NetWorld>()
            .expect("world must be NetWorld");
        w.net.wake(self.sink, sim);
    }
}
