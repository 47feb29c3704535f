//! Dumbbell 拓扑构建
//!
//! N 个发送主机经各自的接入队列汇聚到一条共享瓶颈（队列 + 管道），
//! 到达接收侧；反向是每流独立的 ACK 通路。incast 场景（多发一收）
//! 也用它搭建。

use crate::net::{NetWorld, Pipe, SinkId};
use crate::queue::{mem_from_pkt, FifoQueue};
use crate::sim::{drain_time, speed_from_gbps, SimTime};

/// Dumbbell 拓扑配置选项
#[derive(Debug, Clone)]
pub struct DumbbellOpts {
    pub senders: usize,
    pub host_link_gbps: u64,
    pub bottleneck_gbps: u64,
    /// 单向传播时延（每段链路）
    pub link_latency: SimTime,
    /// 接入队列容量（包数）
    pub access_queue_pkts: u64,
    /// 瓶颈队列容量（包数）
    pub bottleneck_queue_pkts: u64,
}

impl Default for DumbbellOpts {
    fn default() -> Self {
        Self {
            senders: 1,
            host_link_gbps: 100,
            bottleneck_gbps: 10,
            link_latency: SimTime::from_micros(25),
            access_queue_pkts: 1000,
            bottleneck_queue_pkts: 100,
        }
    }
}

/// 一条经过瓶颈的正反路径（不含协议端点，端点由 `tcp::connect` 追加）。
#[derive(Debug, Clone)]
pub struct DumbbellPath {
    pub fwd_hops: Vec<SinkId>,
    pub rev_hops: Vec<SinkId>,
}

/// 构建好的 dumbbell，含瓶颈队列 id（测试读取丢包计数用）。
#[derive(Debug)]
pub struct Dumbbell {
    pub paths: Vec<DumbbellPath>,
    pub bottleneck_queue: SinkId,
}

/// 搭建 dumbbell：每个发送者一条接入队列+管道，共享瓶颈队列+管道。
///
/// 反向通路带宽与正向接入一致，缓冲充裕（ACK 不应在回程丢失）。
pub fn build_dumbbell(world: &mut NetWorld, opts: &DumbbellOpts) -> Dumbbell {
    let net = &mut world.net;
    let host_bps = speed_from_gbps(opts.host_link_gbps);
    let bottleneck_bps = speed_from_gbps(opts.bottleneck_gbps);

    let bq = net.add_sink(Box::new(FifoQueue::new(
        bottleneck_bps,
        mem_from_pkt(opts.bottleneck_queue_pkts),
    )));
    let bpipe = net.add_sink(Box::new(Pipe::new(opts.link_latency)));

    let mut paths = Vec::with_capacity(opts.senders);
    for _ in 0..opts.senders {
        let access_q = net.add_sink(Box::new(FifoQueue::new(
            host_bps,
            mem_from_pkt(opts.access_queue_pkts),
        )));
        let access_pipe = net.add_sink(Box::new(Pipe::new(opts.link_latency)));

        let rev_q = net.add_sink(Box::new(FifoQueue::new(
            host_bps,
            mem_from_pkt(opts.access_queue_pkts),
        )));
        let rev_pipe = net.add_sink(Box::new(Pipe::new(
            opts.link_latency.saturating_mul(2),
        )));

        paths.push(DumbbellPath {
            fwd_hops: vec![access_q, access_pipe, bq, bpipe],
            rev_hops: vec![rev_q, rev_pipe],
        });
    }

    Dumbbell {
        paths,
        bottleneck_queue: bq,
    }
}

/// 该拓扑上单个 MSS 大小数据段的最小 RTT（健全性检查用）。
pub fn min_rtt(opts: &DumbbellOpts, pkt_bytes: u32, ack_bytes: u32) -> SimTime {
    let host_bps = speed_from_gbps(opts.host_link_gbps);
    let bottleneck_bps = speed_from_gbps(opts.bottleneck_gbps);
    // 正向两段传播 + 两次串行化；反向两段传播 + 一次 ACK 串行化
    SimTime(
        opts.link_latency.0 * 4
            + drain_time(pkt_bytes, host_bps).0
            + drain_time(pkt_bytes, bottleneck_bps).0
            + drain_time(ack_bytes, host_bps).0,
    )
}
