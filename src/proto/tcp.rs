//! TCP 协议实现
//!
//! 可靠字节流 + Reno 风格拥塞控制：慢启动 / 拥塞避免 / 3 dupACK 快速
//! 重传与快速恢复 / RTO 指数退避。RTT 估计按 Jacobson/Karels，重传段
//! 的回显样本按 Karn 规则丢弃。sink 侧维护累计 ACK 与乱序集合，
//! ACK 携带 SACK 块与通告窗口。
//!
//! 连接状态集中在 `TcpStack` 里按 id 存取；路由终点是两个轻量端点
//! sink（`TcpSrcEndpoint` / `TcpSinkEndpoint`），它们只负责把包头
//! 转交给协议栈。

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::logger::{LogEventKind, TcpCcState};
use crate::net::{
    seq_lt, Header, NetWorld, Network, Packet, PacketFlow, PacketSink, Route, SackBlock, SinkId,
    TcpAckHeader, TcpHeader,
};
use crate::proto::mptcp::{MptcpId, MptcpStack, SubflowSnap};
use crate::sim::{Event, EventHandle, EventList, SimTime, World};

/// 一个 TCP 连接的唯一标识（同时用作 flow id）。
pub type TcpConnId = u64;

#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// MSS（数据段载荷大小，字节）
    pub mss: u32,
    /// ACK 包大小（字节）
    pub ack_bytes: u32,
    /// 初始 cwnd（字节）
    pub init_cwnd_bytes: u64,
    /// 初始 ssthresh（字节）
    pub init_ssthresh_bytes: u64,
    /// cwnd 上限（字节）
    pub max_cwnd_bytes: u64,
    /// 初始 RTO
    pub init_rto: SimTime,
    /// RTO 下限
    pub min_rto: SimTime,
    /// RTO 上限（退避不超过此值）
    pub max_rto: SimTime,
    /// sink 侧接收窗口预算（字节）
    pub rcv_wnd_bytes: u64,
    /// 是否仿真三次握手（默认直接进入 ESTABLISHED）
    pub handshake: bool,
    /// 应用层限速（包/秒）
    pub app_limited_pps: Option<u64>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        let mss = 1460;
        Self {
            mss,
            ack_bytes: 40,
            init_cwnd_bytes: (mss as u64).saturating_mul(10),
            init_ssthresh_bytes: (mss as u64).saturating_mul(100),
            max_cwnd_bytes: u64::MAX / 4,
            init_rto: SimTime::from_millis(20),
            // 下限须高于含排队的 RTT，否则恢复期会出现假性超时
            min_rto: SimTime::from_millis(10),
            max_rto: SimTime::from_secs(60),
            rcv_wnd_bytes: 1 << 30,
            handshake: false,
            app_limited_pps: None,
        }
    }
}

#[derive(Debug, Clone)]
struct SentSeg {
    len: u32,
    data_seq: u64,
}

/// sink 侧状态：累计 ACK + 乱序区间。
#[derive(Debug, Default)]
struct RcvState {
    /// 最后一个按序收到的字节
    cumulative_ack: u64,
    /// 乱序段：首字节 seq -> 长度
    received: BTreeMap<u64, u32>,
    oo_bytes: u64,
    /// 由乱序推断的丢包数
    inferred_drops: u64,
}

impl RcvState {
    /// 从乱序集合构造至多 3 个 SACK 块（[start, end) 左闭右开）。
    fn sack_blocks(&self) -> Vec<SackBlock> {
        let mut blocks: Vec<SackBlock> = Vec::new();
        for (&seq, &len) in &self.received {
            let end = seq.saturating_add(len as u64);
            match blocks.last_mut() {
                Some(b) if b.end == seq => b.end = end,
                _ => {
                    if blocks.len() == 3 {
                        break;
                    }
                    blocks.push(SackBlock { start: seq, end });
                }
            }
        }
        blocks
    }
}

#[derive(Debug)]
pub struct TcpConn {
    pub id: TcpConnId,
    /// 每连接一个 flow，包的 flow id 由此而来
    flow: PacketFlow,
    fwd: Arc<Route>,
    rev: Arc<Route>,
    pub cfg: TcpConfig,
    /// 应用要发送的字节数（u64::MAX 表示不限）
    total_bytes: u64,

    // 源端
    established: bool,
    highest_sent: u64,
    last_acked: u64,
    recoverq: u64,
    dupacks: u32,
    cwnd: u64,
    ssthresh: u64,
    in_fast_recovery: bool,
    rtt: SimTime,
    mdev: SimTime,
    rto: SimTime,
    base_rtt: Option<SimTime>,
    peer_rwnd: u64,
    rto_handle: Option<EventHandle>,
    inflight: BTreeMap<u64, SentSeg>,
    /// SACK 记分板：已被 sink 报告收到的段首 seq
    sacked: BTreeSet<u64>,
    drops: u64,

    // MPTCP
    pub(crate) msrc: Option<MptcpId>,
    pub(crate) subflow_idx: usize,

    // sink 端
    rcv: RcvState,

    // 统计
    start_at: Option<SimTime>,
    done_at: Option<SimTime>,
    stopped: bool,
    pkts_sent: u64,
}

impl TcpConn {
    pub fn new(
        id: TcpConnId,
        fwd: Arc<Route>,
        rev: Arc<Route>,
        total_bytes: u64,
        cfg: TcpConfig,
    ) -> Self {
        let mss = cfg.mss as u64;
        let cwnd = cfg.init_cwnd_bytes.max(mss);
        let ssthresh = cfg.init_ssthresh_bytes.max(mss);
        let rto = cfg.init_rto;
        let peer_rwnd = cfg.rcv_wnd_bytes;
        let established = !cfg.handshake;
        Self {
            id,
            flow: PacketFlow::from_id(id),
            fwd,
            rev,
            cfg,
            total_bytes,
            established,
            highest_sent: 0,
            last_acked: 0,
            recoverq: 0,
            dupacks: 0,
            cwnd,
            ssthresh,
            in_fast_recovery: false,
            rtt: SimTime::ZERO,
            mdev: SimTime::ZERO,
            rto,
            base_rtt: None,
            peer_rwnd,
            rto_handle: None,
            inflight: BTreeMap::new(),
            sacked: BTreeSet::new(),
            drops: 0,
            msrc: None,
            subflow_idx: 0,
            rcv: RcvState::default(),
            start_at: None,
            done_at: None,
            stopped: false,
            pkts_sent: 0,
        }
    }

    /// 完成目标：握手占用 1 字节序列空间。
    fn target(&self) -> u64 {
        if self.total_bytes == u64::MAX {
            u64::MAX
        } else if self.cfg.handshake {
            self.total_bytes.saturating_add(1)
        } else {
            self.total_bytes
        }
    }

    pub fn cwnd(&self) -> u64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u64 {
        self.ssthresh
    }

    pub fn rtt(&self) -> SimTime {
        self.rtt
    }

    pub fn rto(&self) -> SimTime {
        self.rto
    }

    pub fn base_rtt(&self) -> Option<SimTime> {
        self.base_rtt
    }

    pub fn bytes_acked(&self) -> u64 {
        self.last_acked.min(self.target())
    }

    pub fn is_done(&self) -> bool {
        self.done_at.is_some()
    }

    pub fn start_time(&self) -> Option<SimTime> {
        self.start_at
    }

    pub fn done_time(&self) -> Option<SimTime> {
        self.done_at
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }

    pub fn packets_sent(&self) -> u64 {
        self.pkts_sent
    }

    pub fn inferred_sink_drops(&self) -> u64 {
        self.rcv.inferred_drops
    }

    pub fn cumulative_ack(&self) -> u64 {
        self.rcv.cumulative_ack
    }

    pub fn cc_state(&self) -> TcpCcState {
        if self.in_fast_recovery {
            TcpCcState::FastRecovery
        } else if self.cwnd < self.ssthresh {
            TcpCcState::SlowStart
        } else {
            TcpCcState::CongestionAvoidance
        }
    }

    pub(crate) fn inflight_bytes(&self) -> u64 {
        self.highest_sent.saturating_sub(self.last_acked)
    }

    /// 回到慢启动起点（运行时新增的 MPTCP 子流从一个 MSS 起步）。
    pub(crate) fn begin_slow_start(&mut self) {
        self.cwnd = self.cfg.mss as u64;
    }

    /// 停摆：子流被移出 MPTCP 连接后不再收发。
    pub(crate) fn halt(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub(crate) fn effective_cwnd(&self) -> u64 {
        if self.in_fast_recovery {
            self.ssthresh
        } else {
            self.cwnd
        }
    }

    /// 有效发送窗口：cwnd 与对端通告窗口取小。
    fn send_window(&self) -> u64 {
        self.cwnd.min(self.peer_rwnd)
    }

    /// 最早一个未被 SACK 覆盖的未确认段。
    fn first_unsacked(&self) -> Option<(u64, SentSeg)> {
        self.inflight
            .iter()
            .find(|(seq, _)| !self.sacked.contains(*seq))
            .map(|(&s, seg)| (s, seg.clone()))
    }
}

/// TCP 协议栈：按连接 id 存取所有连接状态。
#[derive(Default)]
pub struct TcpStack {
    conns: HashMap<TcpConnId, TcpConn>,
}

impl TcpStack {
    pub fn insert(&mut self, conn: TcpConn) {
        self.conns.insert(conn.id, conn);
    }

    pub fn get(&self, id: TcpConnId) -> Option<&TcpConn> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: TcpConnId) -> Option<&mut TcpConn> {
        self.conns.get_mut(&id)
    }

    pub fn conns(&self) -> impl Iterator<Item = &TcpConn> {
        self.conns.values()
    }

    /// 子流快照：耦合公式需要的兄弟子流状态。
    pub(crate) fn subflow_snapshot(&self, subflows: &[TcpConnId]) -> Vec<SubflowSnap> {
        subflows
            .iter()
            .filter_map(|id| self.conns.get(id))
            .map(|c| SubflowSnap {
                cwnd: c.effective_cwnd(),
                rtt: c.rtt,
                mss: c.cfg.mss,
            })
            .collect()
    }

    /// 所有子流在途字节合计（共享接收窗口检查用）。
    fn aggregate_inflight(&self, subflows: &[TcpConnId]) -> u64 {
        subflows
            .iter()
            .filter_map(|id| self.conns.get(id))
            .map(|c| c.inflight_bytes())
            .sum()
    }

    fn log_state(&self, id: TcpConnId, sim: &EventList, net: &mut Network) {
        let Some(conn) = self.conns.get(&id) else { return };
        net.logs.emit(
            sim.now(),
            LogEventKind::TcpState {
                conn: id,
                cwnd: conn.cwnd,
                ssthresh: conn.ssthresh,
                state: conn.cc_state(),
                rtt_ps: conn.rtt.0,
                rto_ps: conn.rto.0,
            },
        );
    }

    fn arm_rto(&mut self, id: TcpConnId, sim: &mut EventList) {
        let Some(conn) = self.conns.get_mut(&id) else { return };
        if let Some(h) = conn.rto_handle.take() {
            sim.cancel(h);
        }
        let at = sim.now().saturating_add(conn.rto);
        conn.rto_handle = Some(sim.schedule(at, TcpTimer { conn: id }));
    }

    fn cancel_rto(&mut self, id: TcpConnId, sim: &mut EventList) {
        if let Some(conn) = self.conns.get_mut(&id) {
            if let Some(h) = conn.rto_handle.take() {
                sim.cancel(h);
            }
        }
    }

    /// 启动流：进入发送循环（未握手则先发 SYN）。
    pub fn startflow(
        &mut self,
        id: TcpConnId,
        sim: &mut EventList,
        net: &mut Network,
        mptcp: &mut MptcpStack,
    ) {
        if let Some(conn) = self.conns.get_mut(&id) {
            if conn.start_at.is_none() {
                conn.start_at = Some(sim.now());
            }
        }
        self.send_packets(id, sim, net, mptcp);
    }

    /// 发送循环：窗口允许且有数据时构造并发出数据段。
    pub(crate) fn send_packets(
        &mut self,
        id: TcpConnId,
        sim: &mut EventList,
        net: &mut Network,
        mptcp: &mut MptcpStack,
    ) {
        // 共享接收窗口：先在不可变借用下合计所有兄弟子流的在途字节
        let mut agg_inflight = match self.conns.get(&id).and_then(|c| c.msrc) {
            Some(mid) => mptcp
                .subflow_ids(mid)
                .map(|subs| self.aggregate_inflight(&subs)),
            None => None,
        };

        let Some(conn) = self.conns.get_mut(&id) else { return };
        if conn.done_at.is_some() || conn.stopped {
            return;
        }

        if !conn.established {
            // 发送 SYN（占用 1 字节序列空间）
            if conn.highest_sent == 0 {
                let hdr = TcpHeader {
                    seq: 1,
                    data_seq: 0,
                    len: 1,
                    syn: true,
                    ts: sim.now(),
                    retransmitted: false,
                };
                let pkt = net.pool.tcp_data(
                    conn.flow.id,
                    Arc::clone(&conn.fwd),
                    Arc::clone(&conn.rev),
                    conn.cfg.ack_bytes,
                    hdr,
                );
                conn.highest_sent = 1;
                conn.inflight.insert(1, SentSeg { len: 1, data_seq: 0 });
                net.send_on(pkt, sim);
                let need_arm = conn.rto_handle.is_none();
                let id = conn.id;
                if need_arm {
                    self.arm_rto(id, sim);
                }
            }
            return;
        }

        let mut c = conn.send_window();
        // 应用层限速：窗口额外收紧到 pps × rtt 的字节量
        if let (Some(pps), true) = (conn.cfg.app_limited_pps, conn.rtt > SimTime::ZERO) {
            let bytes = (pps as u128)
                .saturating_mul(conn.cfg.mss as u128)
                .saturating_mul(conn.rtt.0 as u128)
                / 1_000_000_000_000u128;
            c = c.min(bytes.min(u64::MAX as u128) as u64);
        }

        let mss = conn.cfg.mss as u64;
        let target = conn.target();
        let mut sent_any = false;

        loop {
            if conn.highest_sent >= target {
                break;
            }
            let mut len = mss.min(target.saturating_sub(conn.highest_sent)) as u32;
            if conn
                .highest_sent
                .saturating_add(len as u64)
                .saturating_sub(conn.last_acked)
                > c
            {
                break;
            }

            // MPTCP：申请数据序列号；共享接收窗口收紧时停发
            let mut data_seq = 0;
            if let Some(mid) = conn.msrc {
                let agg = agg_inflight.get_or_insert(0);
                match mptcp.get_data_seq(mid, conn.subflow_idx, len, *agg) {
                    Some((ds, l)) => {
                        data_seq = ds;
                        len = l;
                        *agg = agg.saturating_add(len as u64);
                    }
                    None => break,
                }
            }

            let seq = conn.highest_sent.saturating_add(1);
            let hdr = TcpHeader {
                seq,
                data_seq,
                len,
                syn: false,
                ts: sim.now(),
                retransmitted: false,
            };
            let wire = len.saturating_add(conn.cfg.ack_bytes);
            let pkt = net.pool.tcp_data(
                conn.flow.id,
                Arc::clone(&conn.fwd),
                Arc::clone(&conn.rev),
                wire,
                hdr,
            );
            conn.inflight.insert(seq, SentSeg { len, data_seq });
            conn.highest_sent = conn.highest_sent.saturating_add(len as u64);
            conn.pkts_sent = conn.pkts_sent.saturating_add(1);
            net.logs.emit(
                sim.now(),
                LogEventKind::PktSend {
                    flow_id: conn.flow.id,
                    seq,
                    bytes: wire,
                    retransmit: false,
                },
            );
            trace!(conn = conn.id, seq, len, cwnd = conn.cwnd, "发送数据段");
            net.send_on(pkt, sim);
            sent_any = true;
        }

        if sent_any && self.conns.get(&id).map(|c| c.rto_handle.is_none()) == Some(true) {
            self.arm_rto(id, sim);
        }
    }

    /// 重传最早一个未被 SACK 覆盖的未确认段。
    fn retransmit_packet(&mut self, id: TcpConnId, sim: &mut EventList, net: &mut Network) {
        let Some(conn) = self.conns.get_mut(&id) else { return };

        if !conn.established {
            // 重发 SYN
            let hdr = TcpHeader {
                seq: 1,
                data_seq: 0,
                len: 1,
                syn: true,
                ts: sim.now(),
                retransmitted: true,
            };
            let pkt = net.pool.tcp_data(
                conn.flow.id,
                Arc::clone(&conn.fwd),
                Arc::clone(&conn.rev),
                conn.cfg.ack_bytes,
                hdr,
            );
            net.send_on(pkt, sim);
            return;
        }

        let Some((seq, seg)) = conn.first_unsacked() else {
            return;
        };
        let hdr = TcpHeader {
            seq,
            data_seq: seg.data_seq,
            len: seg.len,
            syn: false,
            ts: sim.now(),
            retransmitted: true,
        };
        let wire = seg.len.saturating_add(conn.cfg.ack_bytes);
        let pkt = net.pool.tcp_data(
            conn.id,
            Arc::clone(&conn.fwd),
            Arc::clone(&conn.rev),
            wire,
            hdr,
        );
        conn.pkts_sent = conn.pkts_sent.saturating_add(1);
        net.logs.emit(
            sim.now(),
            LogEventKind::PktSend {
                flow_id: conn.flow.id,
                seq,
                bytes: wire,
                retransmit: true,
            },
        );
        debug!(conn = conn.id, seq, "重传数据段");
        net.send_on(pkt, sim);

        let need_arm = conn.rto_handle.is_none();
        if need_arm {
            self.arm_rto(id, sim);
        }
    }

    /// ssthresh 缩减：单路径按 Reno，MPTCP 子流交给耦合层。
    fn deflate_window(&mut self, id: TcpConnId, mptcp: &mut MptcpStack) -> u64 {
        let Some(conn) = self.conns.get(&id) else { return 0 };
        let mss = conn.cfg.mss as u64;
        match conn.msrc {
            None => (conn.cwnd / 2).max(2 * mss),
            Some(mid) => {
                let snap = mptcp
                    .subflow_ids(mid)
                    .map(|subs| self.subflow_snapshot(&subs))
                    .unwrap_or_default();
                mptcp.deflate_window(mid, &snap, conn.cwnd, conn.cfg.mss)
            }
        }
    }

    /// cwnd 增长（仅非快速恢复路径调用）。
    fn inflate_window(
        &mut self,
        id: TcpConnId,
        newly_acked: u64,
        sim: &EventList,
        net: &mut Network,
        mptcp: &mut MptcpStack,
    ) {
        let Some(conn) = self.conns.get(&id) else { return };
        let mss = conn.cfg.mss as u64;
        // 每 ACK 至多按一个 MSS 计增量
        let mut na = newly_acked.min(mss);
        let (mid_snap, cwnd0, ssthresh) = (
            conn.msrc.map(|mid| {
                let snap = mptcp
                    .subflow_ids(mid)
                    .map(|subs| self.subflow_snapshot(&subs))
                    .unwrap_or_default();
                (mid, snap)
            }),
            conn.cwnd,
            conn.ssthresh,
        );

        let mut cwnd = cwnd0;
        if cwnd < ssthresh {
            // 慢启动：cwnd 按确认字节增长，至多增长到 ssthresh
            let inc = (ssthresh - cwnd).min(na);
            cwnd = cwnd.saturating_add(inc);
            na -= inc;
        }
        if na > 0 && cwnd >= ssthresh {
            // 拥塞避免：mss²/cwnd 每 ACK；MPTCP 走耦合增长规则
            cwnd = match &mid_snap {
                None => cwnd.saturating_add(na.saturating_mul(mss) / cwnd),
                Some((mid, snap)) => {
                    let idx = self.conns.get(&id).map(|c| c.subflow_idx).unwrap_or(0);
                    mptcp.inflate_window(*mid, snap, idx, cwnd, na, sim, net)
                }
            };
        }

        let Some(conn) = self.conns.get_mut(&id) else { return };
        conn.cwnd = cwnd.min(conn.cfg.max_cwnd_bytes).max(mss);
    }

    /// 处理到达源端的 ACK。
    pub fn on_ack(
        &mut self,
        id: TcpConnId,
        hdr: TcpAckHeader,
        sim: &mut EventList,
        net: &mut Network,
        mptcp: &mut MptcpStack,
    ) {
        let now = sim.now();
        let ackno = hdr.ackno;

        {
            let Some(conn) = self.conns.get_mut(&id) else {
                warn!(conn = id, "收到未知连接的 ACK，丢弃");
                return;
            };
            if conn.done_at.is_some() || conn.stopped {
                return;
            }
            if ackno > conn.highest_sent {
                // 协议异常：确认了从未发送的数据。记录并继续仿真。
                warn!(conn = id, ackno, highest_sent = conn.highest_sent, "ACK 超出已发送范围");
                return;
            }

            // RTT 样本（Karn：重传段的回显不采样）
            if !hdr.echo_rexmit && hdr.ts > SimTime::ZERO && now >= hdr.ts {
                let m = now.saturating_sub(hdr.ts);
                if m > SimTime::ZERO {
                    if conn.rtt > SimTime::ZERO {
                        let abs_diff = if m >= conn.rtt {
                            m.saturating_sub(conn.rtt)
                        } else {
                            conn.rtt.saturating_sub(m)
                        };
                        conn.mdev = SimTime(conn.mdev.0 / 4 * 3 + abs_diff.0 / 4);
                        conn.rtt = SimTime(conn.rtt.0 / 8 * 7 + m.0 / 8);
                    } else {
                        conn.rtt = m;
                        conn.mdev = SimTime(m.0 / 2);
                    }
                    conn.rto = SimTime(conn.rtt.0.saturating_add(conn.mdev.0.saturating_mul(4)));
                    if conn.base_rtt.map_or(true, |b| m < b) {
                        conn.base_rtt = Some(m);
                    }
                }
            }
            if conn.rto < conn.cfg.min_rto {
                conn.rto = conn.cfg.min_rto;
            }
            if conn.rto > conn.cfg.max_rto {
                conn.rto = conn.cfg.max_rto;
            }

            conn.peer_rwnd = hdr.wnd;

            // SACK 记分板
            for b in &hdr.sack {
                let mut covered: Vec<u64> = Vec::new();
                for (&seq, seg) in conn.inflight.range(b.start..b.end) {
                    if seq >= b.start && seq.saturating_add(seg.len as u64) <= b.end {
                        covered.push(seq);
                    }
                }
                for seq in covered {
                    conn.sacked.insert(seq);
                }
            }

            if !conn.established && ackno >= 1 {
                conn.established = true;
                debug!(conn = id, "连接建立");
            }
        }

        // MPTCP 数据层确认
        if let Some(mid) = self.conns.get(&id).and_then(|c| c.msrc) {
            mptcp.on_data_ack(mid, hdr.data_ackno, sim, net);
        }

        let (last_acked, in_fr, recoverq) = {
            let conn = self.conns.get(&id).expect("conn checked above");
            (conn.last_acked, conn.in_fast_recovery, conn.recoverq)
        };

        if seq_lt(ackno, last_acked) {
            return; // 过期 ACK
        }

        if ackno > last_acked {
            // ---- 新 ACK ----
            {
                let conn = self.conns.get_mut(&id).expect("conn");
                let mut drop_below = Vec::new();
                for (&s, seg) in conn.inflight.iter() {
                    if s.saturating_add(seg.len as u64).saturating_sub(1) <= ackno {
                        drop_below.push(s);
                    } else {
                        break;
                    }
                }
                for s in drop_below {
                    conn.inflight.remove(&s);
                    conn.sacked.remove(&s);
                }
            }

            if !in_fr {
                let newly = ackno - last_acked;
                {
                    let conn = self.conns.get_mut(&id).expect("conn");
                    conn.last_acked = ackno;
                    conn.dupacks = 0;
                }
                self.inflate_window(id, newly, sim, net, mptcp);
            } else if ackno >= recoverq {
                // 退出快速恢复
                let conn = self.conns.get_mut(&id).expect("conn");
                let mss = conn.cfg.mss as u64;
                let flightsize = conn.highest_sent.saturating_sub(ackno);
                conn.cwnd = conn.ssthresh.min(flightsize.saturating_add(mss)).max(mss);
                conn.last_acked = ackno;
                conn.dupacks = 0;
                conn.in_fast_recovery = false;
            } else {
                // 快速恢复中的部分 ACK：缩窗并重传下一个洞
                {
                    let conn = self.conns.get_mut(&id).expect("conn");
                    let mss = conn.cfg.mss as u64;
                    let new_data = ackno - conn.last_acked;
                    conn.last_acked = ackno;
                    conn.cwnd = conn.cwnd.saturating_sub(new_data).saturating_add(mss).max(mss);
                }
                self.retransmit_packet(id, sim, net);
            }

            // RFC2988：新 ACK 重置 RTO；全部确认则撤销定时器
            let all_acked = {
                let conn = self.conns.get(&id).expect("conn");
                ackno >= conn.highest_sent
            };
            if all_acked {
                self.cancel_rto(id, sim);
            } else {
                self.arm_rto(id, sim);
            }

            self.log_state(id, sim, net);

            // 完成判定
            {
                let conn = self.conns.get_mut(&id).expect("conn");
                if conn.last_acked >= conn.target() && conn.done_at.is_none() {
                    conn.done_at = Some(now);
                    debug!(conn = id, t_ps = now.0, "流完成");
                    return;
                }
            }

            self.send_packets(id, sim, net, mptcp);
            return;
        }

        // ---- 重复 ACK ----
        if in_fr {
            // 恢复期内每个 dupACK 膨胀一个 MSS
            let conn = self.conns.get_mut(&id).expect("conn");
            let mss = conn.cfg.mss as u64;
            conn.cwnd = conn.cwnd.saturating_add(mss).min(conn.cfg.max_cwnd_bytes);
            self.send_packets(id, sim, net, mptcp);
            return;
        }

        let dupacks = {
            let conn = self.conns.get_mut(&id).expect("conn");
            conn.dupacks = conn.dupacks.saturating_add(1);
            conn.dupacks
        };

        if dupacks != 3 {
            self.send_packets(id, sim, net, mptcp);
            return;
        }

        if last_acked < recoverq {
            // 上一个恢复周期尚未覆盖到此处，不再次减窗（NewReno）
            return;
        }

        // 第 3 个 dupACK：进入快速恢复
        let ssthresh = self.deflate_window(id, mptcp);
        {
            let conn = self.conns.get_mut(&id).expect("conn");
            conn.drops = conn.drops.saturating_add(1);
            conn.ssthresh = ssthresh;
        }
        self.retransmit_packet(id, sim, net);
        {
            let conn = self.conns.get_mut(&id).expect("conn");
            let mss = conn.cfg.mss as u64;
            conn.cwnd = conn.ssthresh.saturating_add(3 * mss);
            conn.in_fast_recovery = true;
            conn.recoverq = conn.highest_sent;
        }
        self.log_state(id, sim, net);
    }

    /// 处理到达 sink 端的数据段，并回 ACK。
    pub fn on_data(
        &mut self,
        id: TcpConnId,
        hdr: TcpHeader,
        ecn_ce: bool,
        sim: &mut EventList,
        net: &mut Network,
        mptcp: &mut MptcpStack,
    ) {
        let seq = hdr.seq;
        let len = hdr.len;
        {
            let Some(conn) = self.conns.get_mut(&id) else {
                warn!(conn = id, "收到未知连接的数据段，丢弃");
                return;
            };

            net.logs.emit(
                sim.now(),
                LogEventKind::PktRecv {
                    flow_id: id,
                    seq,
                    bytes: len,
                },
            );

            let rcv = &mut conn.rcv;
            if seq == rcv.cumulative_ack + 1 {
                // 按序：推进累计确认并吸收已缓存的乱序段
                rcv.cumulative_ack = seq.saturating_add(len as u64).saturating_sub(1);
                while let Some((&s, &l)) = rcv.received.first_key_value() {
                    if s != rcv.cumulative_ack + 1 {
                        break;
                    }
                    rcv.received.remove(&s);
                    rcv.oo_bytes = rcv.oo_bytes.saturating_sub(l as u64);
                    rcv.cumulative_ack = rcv.cumulative_ack.saturating_add(l as u64);
                }
            } else if seq_lt(seq, rcv.cumulative_ack + 1) {
                // 旧段/坏重传：忽略
            } else {
                // 乱序：记录空洞
                if rcv.received.is_empty() {
                    let gap = seq.saturating_sub(rcv.cumulative_ack + 1);
                    rcv.inferred_drops = rcv
                        .inferred_drops
                        .saturating_add(gap.div_ceil(len.max(1) as u64));
                }
                if rcv.received.insert(seq, len).is_none() {
                    rcv.oo_bytes = rcv.oo_bytes.saturating_add(len as u64);
                }
            }
        }

        // MPTCP 数据层重组
        if let Some(mid) = self.conns.get(&id).and_then(|c| c.msrc) {
            if hdr.data_seq > 0 {
                mptcp.on_data_seq(mid, hdr.data_seq, len);
            }
        }

        self.send_ack(id, &hdr, ecn_ce, sim, net, mptcp);
    }

    fn send_ack(
        &mut self,
        id: TcpConnId,
        data_hdr: &TcpHeader,
        ecn_ce: bool,
        sim: &mut EventList,
        net: &mut Network,
        mptcp: &MptcpStack,
    ) {
        let Some(conn) = self.conns.get(&id) else { return };
        let data_ackno = conn.msrc.map(|mid| mptcp.data_ack(mid)).unwrap_or(0);
        // 通告窗口 = 预算减去乱序占用，不会降到零以下
        let wnd = conn.cfg.rcv_wnd_bytes.saturating_sub(conn.rcv.oo_bytes);
        let ack_hdr = TcpAckHeader {
            ackno: conn.rcv.cumulative_ack,
            data_ackno,
            ts: data_hdr.ts,
            echo_rexmit: data_hdr.retransmitted,
            ecn_echo: ecn_ce,
            wnd,
            sack: conn.rcv.sack_blocks(),
        };
        let pkt = net.pool.tcp_ack(conn.flow.id, Arc::clone(&conn.rev), conn.cfg.ack_bytes, ack_hdr);
        net.send_on(pkt, sim);
    }

    /// RTO 到期。
    pub fn on_timer(
        &mut self,
        id: TcpConnId,
        sim: &mut EventList,
        net: &mut Network,
        mptcp: &mut MptcpStack,
    ) {
        {
            let Some(conn) = self.conns.get_mut(&id) else { return };
            conn.rto_handle = None;
            if conn.done_at.is_some() || conn.stopped || conn.last_acked >= conn.highest_sent {
                return;
            }
            if conn.in_fast_recovery {
                let mss = conn.cfg.mss as u64;
                let flightsize = conn.highest_sent.saturating_sub(conn.last_acked);
                conn.cwnd = conn.ssthresh.min(flightsize.saturating_add(mss));
            }
        }

        let ssthresh = self.deflate_window(id, mptcp);
        let mid = {
            let conn = self.conns.get_mut(&id).expect("conn");
            let mss = conn.cfg.mss as u64;
            conn.ssthresh = ssthresh;
            conn.cwnd = mss;
            conn.in_fast_recovery = false;
            conn.recoverq = conn.highest_sent;
            conn.dupacks = 0;
            // 指数退避
            conn.rto = SimTime(conn.rto.0.saturating_mul(2)).min(conn.cfg.max_rto);
            net.logs.emit(
                sim.now(),
                LogEventKind::TcpRto {
                    conn: id,
                    seq: conn.last_acked.saturating_add(1),
                    backoff_rto_ps: conn.rto.0,
                },
            );
            conn.msrc
        };

        self.retransmit_packet(id, sim, net);
        self.arm_rto(id, sim);
        self.log_state(id, sim, net);

        if let Some(mid) = mid {
            let snap = mptcp
                .subflow_ids(mid)
                .map(|subs| self.subflow_snapshot(&subs))
                .unwrap_or_default();
            mptcp.window_changed(mid, &snap, sim, net);
        }
    }
}

// ---------------------------------------------------------------------------
// 端点 sink：路由终点，把包头转交协议栈
// ---------------------------------------------------------------------------

/// 反向路由终点：源端，接收 ACK。
pub struct TcpSrcEndpoint {
    conn: TcpConnId,
    nodename: String,
}

impl TcpSrcEndpoint {
    pub fn new(conn: TcpConnId) -> Self {
        Self {
            conn,
            nodename: format!("tcpsrc({conn})"),
        }
    }
}

impl PacketSink for TcpSrcEndpoint {
    fn name(&self) -> &str {
        &self.nodename
    }

    fn receive(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network) {
        let Header::TcpAck(hdr) = pkt.header.clone() else {
            warn!(conn = self.conn, "源端点收到非 ACK 包，丢弃");
            net.on_dropped(pkt);
            return;
        };
        net.on_delivered(pkt);
        // 规避 net.tcp / net 的重叠借用
        let mut tcp = std::mem::take(&mut net.tcp);
        let mut mptcp = std::mem::take(&mut net.mptcp);
        tcp.on_ack(self.conn, hdr, sim, net, &mut mptcp);
        net.tcp = tcp;
        net.mptcp = mptcp;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 前向路由终点：sink 端，接收数据段。
pub struct TcpSinkEndpoint {
    conn: TcpConnId,
    nodename: String,
}

impl TcpSinkEndpoint {
    pub fn new(conn: TcpConnId) -> Self {
        Self {
            conn,
            nodename: format!("tcpsink({conn})"),
        }
    }
}

impl PacketSink for TcpSinkEndpoint {
    fn name(&self) -> &str {
        &self.nodename
    }

    fn receive(&mut self, pkt: Packet, sim: &mut EventList, net: &mut Network) {
        let Header::Tcp(hdr) = pkt.header.clone() else {
            warn!(conn = self.conn, "sink 端点收到非数据包，丢弃");
            net.on_dropped(pkt);
            return;
        };
        let ecn_ce = pkt.ecn.is_ce();
        net.on_delivered(pkt);
        let mut tcp = std::mem::take(&mut net.tcp);
        let mut mptcp = std::mem::take(&mut net.mptcp);
        tcp.on_data(self.conn, hdr, ecn_ce, sim, net, &mut mptcp);
        net.tcp = tcp;
        net.mptcp = mptcp;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// 事件
// ---------------------------------------------------------------------------

/// 启动一个 TCP 流。
pub struct TcpStart {
    pub conn: TcpConn,
}

impl Event for TcpStart {
    fn execute(self: Box<Self>, sim: &mut EventList, world: &mut dyn World) {
        let TcpStart { conn } = *self;
        let w = world
            .as_any_mut()
            .downcast_mut::<NetWorld>()
            .expect("world must be NetWorld");
        let id = conn.id;
        let mut tcp = std::mem::take(&mut w.net.tcp);
        let mut mptcp = std::mem::take(&mut w.net.mptcp);
        tcp.insert(conn);
        tcp.startflow(id, sim, &mut w.net, &mut mptcp);
        w.net.tcp = tcp;
        w.net.mptcp = mptcp;
    }
}

/// TCP RTO 定时器事件（通过句柄取消/重置）。
#[derive(Debug)]
pub struct TcpTimer {
    pub conn: TcpConnId,
}

impl Event for TcpTimer {
    fn execute(self: Box<Self>, sim: &mut EventList, world: &mut dyn World) {
        let w = world
            .as_any_mut()
            .downcast_mut::<NetWorld>()
            .expect("world must be NetWorld");
        let mut tcp = std::mem::take(&mut w.net.tcp);
        let mut mptcp = std::mem::take(&mut w.net.mptcp);
        tcp.on_timer(self.conn, sim, &mut w.net, &mut mptcp);
        w.net.tcp = tcp;
        w.net.mptcp = mptcp;
    }
}

// ---------------------------------------------------------------------------
// 布线
// ---------------------------------------------------------------------------

/// 连接描述：中间跳由拓扑层给出，端点由 `connect` 追加。
pub struct TcpConnSpec {
    pub id: TcpConnId,
    pub fwd_hops: Vec<SinkId>,
    pub rev_hops: Vec<SinkId>,
    pub total_bytes: u64,
    pub cfg: TcpConfig,
    pub start: SimTime,
}

/// 建立一条 TCP 连接：注册两端端点、构造正反路由、调度首次发送。
pub fn connect(sim: &mut EventList, net: &mut Network, spec: TcpConnSpec) -> TcpConnId {
    let start = spec.start;
    let conn = build_conn(net, spec);
    let id = conn.id;
    sim.schedule(start, TcpStart { conn });
    id
}

/// 建立一条 MPTCP 子流：与 [`connect`] 相同，另外登记耦合层归属。
/// 运行时追加的子流从一个 MSS 开始慢启动。
pub(crate) fn connect_subflow(
    sim: &mut EventList,
    net: &mut Network,
    spec: TcpConnSpec,
    mid: MptcpId,
    subflow_idx: usize,
    slow_start_init: bool,
) -> TcpConnId {
    let start = spec.start;
    let mut conn = build_conn(net, spec);
    conn.msrc = Some(mid);
    conn.subflow_idx = subflow_idx;
    if slow_start_init {
        conn.begin_slow_start();
    }
    let id = conn.id;
    sim.schedule(start, TcpStart { conn });
    id
}

fn build_conn(net: &mut Network, spec: TcpConnSpec) -> TcpConn {
    let id = spec.id;
    let src_ep = net.add_sink(Box::new(TcpSrcEndpoint::new(id)));
    let snk_ep = net.add_sink(Box::new(TcpSinkEndpoint::new(id)));

    let mut fwd = spec.fwd_hops;
    fwd.push(snk_ep);
    let mut rev = spec.rev_hops;
    rev.push(src_ep);

    TcpConn::new(
        id,
        Arc::new(Route::new(fwd)),
        Arc::new(Route::new(rev)),
        spec.total_bytes,
        spec.cfg,
    )
}
