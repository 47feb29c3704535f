//! 多路径拓扑构建
//!
//! 为一条 MPTCP 连接搭建 K 条互不相交的（速率, 时延, 缓冲）路径，
//! 每条路径承载一条子流。

use crate::net::{NetWorld, Pipe, SinkId};
use crate::queue::{mem_from_pkt, FifoQueue};
use crate::sim::SimTime;

/// 一条路径的参数
#[derive(Debug, Clone)]
pub struct PathOpts {
    pub rate_bps: u64,
    /// 单向传播时延
    pub latency: SimTime,
    pub queue_pkts: u64,
}

/// 已搭好的一条路径
#[derive(Debug, Clone)]
pub struct MultipathPath {
    pub fwd_hops: Vec<SinkId>,
    pub rev_hops: Vec<SinkId>,
    pub queue: SinkId,
}

/// 每条路径：限速队列 + 管道；反向 ACK 通路同速率、缓冲充裕。
pub fn build_multipath(world: &mut NetWorld, paths: &[PathOpts]) -> Vec<MultipathPath> {
    let net = &mut world.net;
    paths
        .iter()
        .map(|p| {
            let q = net.add_sink(Box::new(FifoQueue::new(p.rate_bps, mem_from_pkt(p.queue_pkts))));
            let pipe = net.add_sink(Box::new(Pipe::new(p.latency)));
            let rev_q = net.add_sink(Box::new(FifoQueue::new(p.rate_bps, mem_from_pkt(1000))));
            let rev_pipe = net.add_sink(Box::new(Pipe::new(p.latency)));
            MultipathPath {
                fwd_hops: vec![q, pipe],
                rev_hops: vec![rev_q, rev_pipe],
                queue: q,
            }
        })
        .collect()
}
