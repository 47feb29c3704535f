//! 数据包类型
//!
//! 定义网络数据包、协议头以及按类型复用的数据包池。
//! 包的所有权是线性的：由源端分配，沿路由逐跳传递，
//! 在终点 sink 或被丢弃时归还池中。

use std::sync::Arc;

use super::route::Route;
use crate::sim::SimTime;

/// 数据包类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Plain,
    Tcp,
    TcpAck,
    EthPause,
}

/// 包优先级（供优先级队列分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktPriority {
    Lo,
    Mid,
    Hi,
}

/// ECN 码点（简化：只区分 Not-ECT / ECT / CE）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ecn {
    NotEct,
    Ect0,
    Ce,
}

impl Ecn {
    pub fn is_ect(self) -> bool {
        matches!(self, Ecn::Ect0)
    }

    pub fn is_ce(self) -> bool {
        matches!(self, Ecn::Ce)
    }
}

/// SACK 块：sink 报告的非连续已收区间 [start, end)。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub start: u64,
    pub end: u64,
}

/// TCP 数据段头
#[derive(Debug, Clone)]
pub struct TcpHeader {
    pub seq: u64,
    /// MPTCP 数据序列号（非 MPTCP 连接为 0）
    pub data_seq: u64,
    pub len: u32,
    pub syn: bool,
    /// 发送时间戳，由 sink 在 ACK 中回显（RTT 估计用）
    pub ts: SimTime,
    /// 重传标记，随时间戳一起回显（Karn 规则用）
    pub retransmitted: bool,
}

/// TCP ACK 头
#[derive(Debug, Clone)]
pub struct TcpAckHeader {
    pub ackno: u64,
    /// MPTCP 数据层累计确认
    pub data_ackno: u64,
    /// 回显的数据段发送时间戳
    pub ts: SimTime,
    /// 回显的数据段重传标记
    pub echo_rexmit: bool,
    pub ecn_echo: bool,
    /// 通告接收窗口（字节）
    pub wnd: u64,
    pub sack: Vec<SackBlock>,
}

/// 协议头（tagged union）
#[derive(Debug, Clone)]
pub enum Header {
    None,
    Tcp(TcpHeader),
    TcpAck(TcpAckHeader),
    /// PFC 暂停帧：wait > 0 暂停，wait == 0 恢复
    Pause { wait: SimTime },
}

/// 网络数据包
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: u64,
    pub kind: PacketKind,
    /// 线上大小（含仿真头部）
    pub size_bytes: u32,
    pub flow_id: u64,
    pub route: Arc<Route>,
    /// 路由中的当前跳下标（指向下一个要交付的 sink）
    pub nexthop: usize,
    /// 可选反向路由（终点 sink 构造 ACK 时使用）
    pub reverse: Option<Arc<Route>>,
    pub prio: PktPriority,
    pub ecn: Ecn,
    pub ttl: u8,
    /// lossless/trim 变体使用的弹回标志
    pub bounced: bool,
    pub header: Header,
}

pub const DEFAULT_TTL: u8 = 64;

impl Packet {
    /// 若支持 ECN，则标记为 CE
    pub fn mark_ce_if_ect(&mut self) {
        if self.ecn.is_ect() {
            self.ecn = Ecn::Ce;
        }
    }

    pub fn next_sink(&self) -> Option<super::id::SinkId> {
        self.route.at(self.nexthop)
    }
}

/// 数据包池：free-list 复用，活跃分配数超过上限即大声失败。
///
/// 上限防止病态场景吃光内存；需要更大规模时用 `with_ceiling` 调高。
#[derive(Debug)]
pub struct PacketPool {
    free: Vec<Packet>,
    live: usize,
    ceiling: usize,
    next_pkt_id: u64,
    empty_route: Arc<Route>,
}

pub const DEFAULT_POOL_CEILING: usize = 1 << 20;

impl Default for PacketPool {
    fn default() -> Self {
        Self::with_ceiling(DEFAULT_POOL_CEILING)
    }
}

impl PacketPool {
    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            free: Vec::new(),
            live: 0,
            ceiling,
            next_pkt_id: 0,
            empty_route: Arc::new(Route::default()),
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    fn alloc(&mut self) -> Packet {
        if self.live >= self.ceiling {
            panic!(
                "packet pool ceiling ({}) exceeded; raise it with PacketPool::with_ceiling or shorten the scenario",
                self.ceiling
            );
        }
        self.live += 1;
        let id = self.next_pkt_id;
        self.next_pkt_id = self.next_pkt_id.wrapping_add(1);
        let mut pkt = self.free.pop().unwrap_or_else(|| Packet {
            id: 0,
            kind: PacketKind::Plain,
            size_bytes: 0,
            flow_id: 0,
            route: Arc::clone(&self.empty_route),
            nexthop: 0,
            reverse: None,
            prio: PktPriority::Lo,
            ecn: Ecn::NotEct,
            ttl: DEFAULT_TTL,
            bounced: false,
            header: Header::None,
        });
        pkt.id = id;
        pkt.nexthop = 0;
        pkt.reverse = None;
        pkt.prio = PktPriority::Lo;
        pkt.ecn = Ecn::NotEct;
        pkt.ttl = DEFAULT_TTL;
        pkt.bounced = false;
        pkt.header = Header::None;
        pkt
    }

    /// 归还池中。归还后不得再引用（所有权已被拿走，由类型系统保证）。
    pub fn free(&mut self, mut pkt: Packet) {
        debug_assert!(self.live > 0, "double free: pool has no live packets");
        self.live -= 1;
        pkt.route = Arc::clone(&self.empty_route);
        pkt.reverse = None;
        pkt.header = Header::None;
        self.free.push(pkt);
    }

    /// 无协议头的裸包（队列/管道测试与背景流量用）
    pub fn plain(&mut self, flow_id: u64, route: Arc<Route>, size_bytes: u32) -> Packet {
        let mut pkt = self.alloc();
        pkt.kind = PacketKind::Plain;
        pkt.flow_id = flow_id;
        pkt.size_bytes = size_bytes;
        pkt.route = route;
        pkt
    }

    /// TCP 数据段
    pub fn tcp_data(
        &mut self,
        flow_id: u64,
        route: Arc<Route>,
        reverse: Arc<Route>,
        size_bytes: u32,
        hdr: TcpHeader,
    ) -> Packet {
        let mut pkt = self.alloc();
        pkt.kind = PacketKind::Tcp;
        pkt.flow_id = flow_id;
        pkt.size_bytes = size_bytes;
        pkt.route = route;
        pkt.reverse = Some(reverse);
        pkt.prio = PktPriority::Lo;
        pkt.ecn = Ecn::Ect0;
        pkt.header = Header::Tcp(hdr);
        pkt
    }

    /// TCP ACK（小包，沿反向路由）
    pub fn tcp_ack(
        &mut self,
        flow_id: u64,
        route: Arc<Route>,
        size_bytes: u32,
        hdr: TcpAckHeader,
    ) -> Packet {
        let mut pkt = self.alloc();
        pkt.kind = PacketKind::TcpAck;
        pkt.flow_id = flow_id;
        pkt.size_bytes = size_bytes;
        pkt.route = route;
        pkt.prio = PktPriority::Hi;
        pkt.header = Header::TcpAck(hdr);
        pkt
    }

    /// PFC 暂停/恢复帧（不走路由，直接投递）
    pub fn pause(&mut self, wait: SimTime) -> Packet {
        let mut pkt = self.alloc();
        pkt.kind = PacketKind::EthPause;
        pkt.size_bytes = 64;
        pkt.prio = PktPriority::Hi;
        pkt.header = Header::Pause { wait };
        pkt
    }
}

/// TCP 序列号回绕比较：a < b 当且仅当 (a - b) 按补码为负。
pub fn seq_lt(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) < 0
}
