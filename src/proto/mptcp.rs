//! Multipath TCP 耦合层
//!
//! 在若干 TCP 子流之上协调一个连接：数据序列层把应用字节流映射到
//! 子流上（共享一个接收窗口预算），sink 侧做跨子流重组；拥塞控制
//! 按所选算法耦合各子流的窗口增长。
//!
//! 增长规则都以“子流处于拥塞避免、每 ACK 调用一次”为口径；
//! 子流处于快速恢复时，其对聚合窗口的贡献按 ssthresh 计。

use std::collections::{BTreeMap, HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::logger::LogEventKind;
use crate::net::{NetWorld, Network};
use crate::proto::tcp::{self, TcpConfig, TcpConnId, TcpConnSpec, TcpStack};
use crate::sim::{Event, EventList, SimTime, World};

pub type MptcpId = u64;

/// 耦合算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcAlgo {
    Uncoupled,
    FullyCoupled,
    CoupledInc,
    CoupledTcp,
    CoupledEpsilon,
}

/// 定点 α 的缩放因子。
pub(crate) const A_SCALE: u64 = 512;
/// FULLY_COUPLED 的增/减系数。
const FC_A: u64 = 1;
const FC_B: u64 = 2;

/// 耦合公式需要的兄弟子流快照。
#[derive(Debug, Clone, Copy)]
pub struct SubflowSnap {
    /// 有效窗口（快速恢复中取 ssthresh）
    pub cwnd: u64,
    pub rtt: SimTime,
    pub mss: u32,
}

#[derive(Debug, Clone)]
pub struct MptcpConfig {
    pub algo: CcAlgo,
    /// COUPLED_EPSILON 的 ε ∈ [0, 1]
    pub epsilon: f64,
    /// 共享接收窗口（字节）
    pub rcv_wnd_bytes: u64,
    /// α 是否每个 ACK 重算（默认只在窗口跨过 MSS 边界与丢包后重算）
    pub alfa_every_ack: bool,
    /// 概率取整使用的 RNG 种子
    pub seed: u64,
}

impl Default for MptcpConfig {
    fn default() -> Self {
        Self {
            algo: CcAlgo::Uncoupled,
            epsilon: 1.0,
            rcv_wnd_bytes: 1 << 30,
            alfa_every_ack: false,
            seed: 0x6d70_7463,
        }
    }
}

pub struct MptcpConn {
    pub id: MptcpId,
    pub cfg: MptcpConfig,
    subflows: Vec<TcpConnId>,
    total_bytes: u64,

    // 数据序列层（源端）
    highest_sent: u64,
    last_acked: u64,
    /// 在途数据段：data_seq -> (子流下标, 长度)
    mapped: BTreeMap<u64, (usize, u32)>,
    /// 子流移除后待重映射的数据段
    rexmit: VecDeque<(u64, u32)>,

    // sink 侧重组
    cumulative_ack: u64,
    received: BTreeMap<u64, u32>,

    // 耦合状态
    alfa: f64,
    a_scaled: u64,
    rng: StdRng,

    reset: bool,
    done_at: Option<SimTime>,
}

impl MptcpConn {
    pub(crate) fn new(id: MptcpId, total_bytes: u64, cfg: MptcpConfig) -> Self {
        let seed = cfg.seed ^ id;
        Self {
            id,
            cfg,
            subflows: Vec::new(),
            total_bytes,
            highest_sent: 0,
            last_acked: 0,
            mapped: BTreeMap::new(),
            rexmit: VecDeque::new(),
            cumulative_ack: 0,
            received: BTreeMap::new(),
            alfa: 1.0,
            a_scaled: A_SCALE,
            rng: StdRng::seed_from_u64(seed),
            reset: false,
            done_at: None,
        }
    }

    pub fn subflows(&self) -> &[TcpConnId] {
        &self.subflows
    }

    pub fn is_done(&self) -> bool {
        self.done_at.is_some()
    }

    pub fn done_time(&self) -> Option<SimTime> {
        self.done_at
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    pub fn bytes_acked(&self) -> u64 {
        self.last_acked.min(self.total_bytes)
    }

    pub fn data_ack(&self) -> u64 {
        self.cumulative_ack
    }

    pub fn alfa(&self) -> f64 {
        self.alfa
    }

    pub fn a_scaled(&self) -> u64 {
        self.a_scaled
    }
}

/// 所有子流有效窗口之和。
pub(crate) fn total_window(snap: &[SubflowSnap]) -> u64 {
    snap.iter().map(|s| s.cwnd).sum()
}

/// COUPLED_INC / COUPLED_TCP 的定点 α：
/// A_SCALE · w · maxᵢ(wᵢ·mssᵢ²/rttᵢ²) / (Σⱼ wⱼ·mssⱼ/rttⱼ)²，rtt 以 10µs 为单位。
pub(crate) fn compute_a_scaled(snap: &[SubflowSnap]) -> u64 {
    let mut t: u128 = 0;
    let mut sum_denominator: u128 = 0;
    let mut cwnd_sum: u128 = 0;

    for s in snap {
        let cwnd = s.cwnd as u128;
        let mss = s.mss as u128;
        let mut rtt = (s.rtt.as_micros() / 10) as u128;
        if rtt == 0 {
            rtt = 1;
        }
        t = t.max(cwnd * mss * mss / rtt / rtt);
        sum_denominator += cwnd * mss / rtt;
        cwnd_sum += cwnd;
    }

    if sum_denominator == 0 {
        return A_SCALE;
    }
    let alpha = (A_SCALE as u128) * cwnd_sum * t / sum_denominator / sum_denominator;
    if alpha == 0 {
        return A_SCALE;
    }
    alpha.min(u64::MAX as u128) as u64
}

/// COUPLED_EPSILON 的 α：
/// w · maxᵢ(wᵢ^(ε/2)/rttᵢ)^(1/(1-ε/2)) / (Σⱼ wⱼ/rttⱼ)^(1/(1-ε/2))，rtt 以 ms 为单位。
pub(crate) fn compute_alfa(snap: &[SubflowSnap], e: f64) -> f64 {
    if snap.len() <= 1 {
        return 1.0;
    }
    let mut maxt: f64 = 0.0;
    let mut sum_denominator: f64 = 0.0;
    for s in snap {
        let cwnd = s.cwnd as f64;
        let mut rtt = s.rtt.as_millis() as f64;
        if rtt == 0.0 {
            rtt = 1.0;
        }
        maxt = maxt.max(cwnd.powf(e / 2.0) / rtt);
        sum_denominator += cwnd / rtt;
    }
    if sum_denominator == 0.0 || maxt == 0.0 {
        return 1.0;
    }
    let total = total_window(snap) as f64;
    let p = 1.0 / (1.0 - e / 2.0);
    total * maxt.powf(p) / sum_denominator.powf(p)
}

/// MPTCP 协议栈。
#[derive(Default)]
pub struct MptcpStack {
    conns: HashMap<MptcpId, MptcpConn>,
}

impl MptcpStack {
    pub fn insert(&mut self, conn: MptcpConn) {
        self.conns.insert(conn.id, conn);
    }

    pub fn get(&self, id: MptcpId) -> Option<&MptcpConn> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: MptcpId) -> Option<&mut MptcpConn> {
        self.conns.get_mut(&id)
    }

    pub fn subflow_ids(&self, id: MptcpId) -> Option<Vec<TcpConnId>> {
        self.conns.get(&id).map(|c| c.subflows.clone())
    }

    /// 为子流申请下一个数据序列号，返回（数据序列号，数据段长度）。
    ///
    /// 先消化重映射队列；共享接收窗口收紧或数据发完则返回 None。
    pub(crate) fn get_data_seq(
        &mut self,
        id: MptcpId,
        subflow_idx: usize,
        len: u32,
        agg_inflight: u64,
    ) -> Option<(u64, u32)> {
        let conn = self.conns.get_mut(&id)?;
        if conn.reset {
            return None;
        }

        if agg_inflight.saturating_add(len as u64) > conn.cfg.rcv_wnd_bytes {
            return None;
        }

        if let Some((ds, l)) = conn.rexmit.pop_front() {
            conn.mapped.insert(ds, (subflow_idx, l));
            return Some((ds, l));
        }

        if conn.highest_sent >= conn.total_bytes {
            return None;
        }
        let ds = conn.highest_sent.saturating_add(1);
        let len = (len as u64).min(conn.total_bytes - conn.highest_sent) as u32;
        conn.highest_sent = conn.highest_sent.saturating_add(len as u64);
        conn.mapped.insert(ds, (subflow_idx, len));
        Some((ds, len))
    }

    /// 数据层累计确认（来自任一子流的 ACK）。
    pub(crate) fn on_data_ack(
        &mut self,
        id: MptcpId,
        data_ackno: u64,
        sim: &EventList,
        _net: &mut Network,
    ) {
        let Some(conn) = self.conns.get_mut(&id) else { return };
        if data_ackno <= conn.last_acked {
            return;
        }
        conn.last_acked = data_ackno;
        conn.mapped = conn.mapped.split_off(&(data_ackno.saturating_add(1)));
        if conn.last_acked >= conn.total_bytes && conn.done_at.is_none() {
            conn.done_at = Some(sim.now());
            debug!(conn = id, t_ps = sim.now().0, "MPTCP 流完成");
        }
    }

    /// sink 侧数据层重组（与 TCP sink 同构的累计 + 乱序列表）。
    pub(crate) fn on_data_seq(&mut self, id: MptcpId, data_seq: u64, len: u32) {
        let Some(conn) = self.conns.get_mut(&id) else { return };
        if data_seq == conn.cumulative_ack + 1 {
            conn.cumulative_ack = data_seq.saturating_add(len as u64).saturating_sub(1);
            while let Some((&s, &l)) = conn.received.first_key_value() {
                if s != conn.cumulative_ack + 1 {
                    break;
                }
                conn.received.remove(&s);
                conn.cumulative_ack = conn.cumulative_ack.saturating_add(l as u64);
            }
        } else if data_seq <= conn.cumulative_ack {
            // 坏重传，忽略
        } else {
            conn.received.entry(data_seq).or_insert(len);
        }
    }

    pub(crate) fn data_ack(&self, id: MptcpId) -> u64 {
        self.conns.get(&id).map(|c| c.cumulative_ack).unwrap_or(0)
    }

    /// 子流拥塞避免期的窗口增长。返回新的子流 cwnd。
    ///
    /// `newly_acked` 已由调用方按每 ACK 一个 MSS 封顶。
    pub(crate) fn inflate_window(
        &mut self,
        id: MptcpId,
        snap: &[SubflowSnap],
        _subflow_idx: usize,
        cwnd: u64,
        newly_acked: u64,
        sim: &EventList,
        net: &mut Network,
    ) -> u64 {
        let Some(conn) = self.conns.get_mut(&id) else { return cwnd };
        let mss = snap.first().map(|s| s.mss as u64).unwrap_or(1460);
        let tcp_inc = newly_acked.saturating_mul(mss) / cwnd.max(1);
        if tcp_inc == 0 {
            return cwnd;
        }
        let total = total_window(snap).max(1);

        let new_cwnd = match conn.cfg.algo {
            CcAlgo::Uncoupled => cwnd.saturating_add(tcp_inc),

            CcAlgo::FullyCoupled => {
                // 聚合表现为单条 Reno 流：mss²/w，封顶于非耦合增量
                let tmp = newly_acked.saturating_mul(mss).saturating_mul(FC_A) / total;
                cwnd.saturating_add(tmp.min(tcp_inc))
            }

            CcAlgo::CoupledInc => {
                // mss²·a/(w·A_SCALE)，概率取整，封顶于非耦合增量
                let tmp2 = (newly_acked as u128)
                    .saturating_mul(mss as u128)
                    .saturating_mul(conn.a_scaled as u128)
                    / total as u128;
                let mut tmp = (tmp2 / A_SCALE as u128) as u64;
                if conn.rng.gen_range(0..A_SCALE as u128) < tmp2 % A_SCALE as u128 {
                    tmp = tmp.saturating_add(1);
                }
                cwnd.saturating_add(tmp.min(tcp_inc))
            }

            CcAlgo::CoupledTcp => {
                // LIA：mss² · min(α/w, 1/wᵢ)，四舍五入
                let num = (newly_acked as u128)
                    .saturating_mul(mss as u128)
                    .saturating_mul(conn.a_scaled as u128);
                let den = (total as u128).saturating_mul(A_SCALE as u128);
                let mut tmp = (num / den) as u64;
                if (num % den) >= den / 2 {
                    tmp = tmp.saturating_add(1);
                }
                cwnd.saturating_add(tmp.min(tcp_inc))
            }

            CcAlgo::CoupledEpsilon => {
                let e = conn.cfg.epsilon;
                let tf = (newly_acked as f64) * (mss as f64) * conn.alfa
                    * (conn.alfa * cwnd as f64).powf(1.0 - e)
                    / (total as f64).powf(2.0 - e);
                let mut tmp = tf.floor() as u64;
                if conn.rng.gen::<f64>() < tf - tf.floor() {
                    tmp = tmp.saturating_add(1);
                }
                cwnd.saturating_add(tmp.min(tcp_inc))
            }
        };

        // α 重算节奏：窗口跨过 MSS 边界时（可配置为每 ACK）
        let crossed = new_cwnd / mss != cwnd / mss;
        if crossed || conn.cfg.alfa_every_ack {
            match conn.cfg.algo {
                CcAlgo::CoupledInc | CcAlgo::CoupledTcp => {
                    conn.a_scaled = compute_a_scaled(snap);
                }
                CcAlgo::CoupledEpsilon => {
                    let e = conn.cfg.epsilon;
                    if e > 0.0 && e < 2.0 {
                        conn.alfa = compute_alfa(snap, e);
                    }
                }
                _ => {}
            }
            net.logs.emit(
                sim.now(),
                LogEventKind::MptcpWindow {
                    conn: id,
                    total_cwnd: total,
                    alfa: match conn.cfg.algo {
                        CcAlgo::CoupledInc | CcAlgo::CoupledTcp => {
                            conn.a_scaled as f64 / A_SCALE as f64
                        }
                        _ => conn.alfa,
                    },
                },
            );
        }

        new_cwnd
    }

    /// 子流丢包时的 ssthresh：局部 Reno 减半，FULLY_COUPLED 按共享窗口减。
    pub(crate) fn deflate_window(
        &mut self,
        id: MptcpId,
        snap: &[SubflowSnap],
        cwnd: u64,
        mss: u32,
    ) -> u64 {
        let mss = mss as u64;
        let Some(conn) = self.conns.get(&id) else {
            return (cwnd / 2).max(2 * mss);
        };
        match conn.cfg.algo {
            CcAlgo::Uncoupled | CcAlgo::CoupledInc | CcAlgo::CoupledTcp | CcAlgo::CoupledEpsilon => {
                (cwnd / 2).max(mss)
            }
            CcAlgo::FullyCoupled => {
                let total = total_window(snap);
                cwnd.saturating_sub(total / FC_B).max(mss)
            }
        }
    }

    /// 丢包/RTO 后重算耦合参数。
    pub(crate) fn window_changed(
        &mut self,
        id: MptcpId,
        snap: &[SubflowSnap],
        sim: &EventList,
        net: &mut Network,
    ) {
        let Some(conn) = self.conns.get_mut(&id) else { return };
        match conn.cfg.algo {
            CcAlgo::CoupledInc | CcAlgo::CoupledTcp => {
                conn.a_scaled = compute_a_scaled(snap);
            }
            CcAlgo::CoupledEpsilon => {
                let e = conn.cfg.epsilon;
                if e > 0.0 && e < 2.0 {
                    conn.alfa = compute_alfa(snap, e);
                }
            }
            _ => return,
        }
        net.logs.emit(
            sim.now(),
            LogEventKind::MptcpWindow {
                conn: id,
                total_cwnd: total_window(snap),
                alfa: match conn.cfg.algo {
                    CcAlgo::CoupledInc | CcAlgo::CoupledTcp => conn.a_scaled as f64 / A_SCALE as f64,
                    _ => conn.alfa,
                },
            },
        );
    }
}

// ---------------------------------------------------------------------------
// 子流管理
// ---------------------------------------------------------------------------

/// 运行时新增子流：子流 TCP 连接须已存在于 TcpStack。
/// 新子流从 cwnd = mss 开始慢启动。
pub fn add_subflow(tcp: &mut TcpStack, mptcp: &mut MptcpStack, mid: MptcpId, conn_id: TcpConnId) {
    let Some(mconn) = mptcp.conns.get_mut(&mid) else {
        warn!(mptcp = mid, "向不存在的 MPTCP 连接添加子流");
        return;
    };
    let idx = mconn.subflows.len();
    mconn.subflows.push(conn_id);
    if let Some(conn) = tcp.get_mut(conn_id) {
        conn.msrc = Some(mid);
        conn.subflow_idx = idx;
        conn.begin_slow_start();
    }
}

/// 运行时为已有 MPTCP 连接布一条新子流路径。
pub fn add_subflow_route(
    sim: &mut EventList,
    net: &mut Network,
    mid: MptcpId,
    sub: SubflowSpec,
    start: SimTime,
) -> TcpConnId {
    let idx = net.mptcp.get(mid).map(|c| c.subflows.len()).unwrap_or(0);
    let id = tcp::connect_subflow(
        sim,
        net,
        TcpConnSpec {
            id: sub.id,
            fwd_hops: sub.fwd_hops,
            rev_hops: sub.rev_hops,
            total_bytes: u64::MAX,
            cfg: sub.cfg,
            start,
        },
        mid,
        idx,
        true,
    );
    if let Some(mconn) = net.mptcp.get_mut(mid) {
        mconn.subflows.push(id);
    }
    id
}

/// 移除子流：其在途数据段重新排队到幸存子流；无幸存者则连接复位。
pub fn remove_subflow(
    tcp: &mut TcpStack,
    mptcp: &mut MptcpStack,
    mid: MptcpId,
    conn_id: TcpConnId,
) {
    let Some(mconn) = mptcp.conns.get_mut(&mid) else { return };
    let Some(pos) = mconn.subflows.iter().position(|&c| c == conn_id) else {
        return;
    };
    mconn.subflows.remove(pos);
    if let Some(conn) = tcp.get_mut(conn_id) {
        conn.msrc = None;
        conn.halt();
    }

    // 孤儿数据段重新入队
    let orphaned: Vec<u64> = mconn
        .mapped
        .iter()
        .filter(|(_, &(idx, _))| idx == pos)
        .map(|(&ds, _)| ds)
        .collect();
    for ds in orphaned {
        if let Some((_, len)) = mconn.mapped.remove(&ds) {
            mconn.rexmit.push_back((ds, len));
        }
    }
    // 幸存子流的下标随位置前移
    for (&_ds, slot) in mconn.mapped.iter_mut() {
        if slot.0 > pos {
            slot.0 -= 1;
        }
    }
    for (i, &sub) in mconn.subflows.iter().enumerate() {
        if let Some(conn) = tcp.get_mut(sub) {
            conn.subflow_idx = i;
        }
    }

    if mconn.subflows.is_empty() {
        mconn.reset = true;
        warn!(mptcp = mid, "最后一个子流被移除，连接复位");
    }
}

// ---------------------------------------------------------------------------
// 事件与布线
// ---------------------------------------------------------------------------

/// 周期性发送泵：兜底驱动所有子流的发送循环。
pub struct MptcpPump {
    pub conn: MptcpId,
    pub period: SimTime,
}

impl Event for MptcpPump {
    fn execute(self: Box<Self>, sim: &mut EventList, world: &mut dyn World) {
        let w = world
            .as_any_mut()
            .downcast_mut::<NetWorld>()
            .expect("world must be NetWorld");
        let mut tcp_stack = std::mem::take(&mut w.net.tcp);
        let mut mptcp_stack = std::mem::take(&mut w.net.mptcp);

        let subs = mptcp_stack.subflow_ids(self.conn).unwrap_or_default();
        let done = mptcp_stack
            .get(self.conn)
            .map(|c| c.is_done() || c.is_reset())
            .unwrap_or(true);
        for sub in subs {
            tcp_stack.send_packets(sub, sim, &mut w.net, &mut mptcp_stack);
        }
        w.net.tcp = tcp_stack;
        w.net.mptcp = mptcp_stack;

        if !done {
            let period = self.period;
            let conn = self.conn;
            sim.schedule_in(period, MptcpPump { conn, period });
        }
    }
}

/// 一条子流路径的布线描述。
pub struct SubflowSpec {
    pub id: TcpConnId,
    pub fwd_hops: Vec<crate::net::SinkId>,
    pub rev_hops: Vec<crate::net::SinkId>,
    pub cfg: TcpConfig,
}

pub struct MptcpConnSpec {
    pub id: MptcpId,
    pub cfg: MptcpConfig,
    pub subflows: Vec<SubflowSpec>,
    pub total_bytes: u64,
    pub start: SimTime,
}

/// 建立一条 MPTCP 连接：逐条子流走 TCP 布线，再挂接耦合层与发送泵。
pub fn connect(sim: &mut EventList, net: &mut Network, spec: MptcpConnSpec) -> MptcpId {
    let mid = spec.id;
    let mut mconn = MptcpConn::new(mid, spec.total_bytes, spec.cfg);

    for (idx, sub) in spec.subflows.into_iter().enumerate() {
        let sub_id = tcp::connect_subflow(
            sim,
            net,
            TcpConnSpec {
                id: sub.id,
                fwd_hops: sub.fwd_hops,
                rev_hops: sub.rev_hops,
                // 子流本身不限量，由数据序列层按需喂数
                total_bytes: u64::MAX,
                cfg: sub.cfg,
                start: spec.start,
            },
            mid,
            idx,
            false,
        );
        mconn.subflows.push(sub_id);
    }

    net.mptcp.insert(mconn);
    let period = SimTime::from_secs(1);
    sim.schedule(spec.start.saturating_add(period), MptcpPump { conn: mid, period });
    mid
}
