//! 随机早期丢弃（RED）队列
//!
//! 用 EWMA 平滑队列占用：低于 `min_thresh` 从不丢；介于两阈值之间
//! 以线性上升到 `max_prob` 的概率丢；达到 `max_thresh` 必丢。
//! 概率命中时，ECT 包改为打 CE 标记而不丢弃（ECN）。
//!
//! 丢弃判定使用每队列独立、可指定种子的 `StdRng`，
//! 给定种子即可复现实验。

use std::any::Any;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::base::QueueCore;
use crate::net::{Network, Packet, PacketSink, SinkId};
use crate::sim::EventList;

/// RED 参数
#[derive(Debug, Clone)]
pub struct RedParams {
    pub min_thresh_bytes: u64,
    pub max_thresh_bytes: u64,
    /// 介于两阈值之间时的最大丢弃概率
    pub max_prob: f64,
    /// EWMA 权重 w：avg = (1-w)*avg + w*occupancy
    pub ewma_weight: f64,
}

impl Default for RedParams {
    fn default() -> Self {
        Self {
            min_thresh_bytes: 15_000,
            max_thresh_bytes: 45_000,
            max_prob: 0.1,
            ewma_weight: 0.002,
        }
    }
}

#[derive(Debug)]
pub struct RandomQueue {
    core: QueueCore,
    params: RedParams,
    avg_bytes: f64,
    rng: StdRng,
}

impl RandomQueue {
    pub fn new(service_bps: u64, max_bytes: u64, params: RedParams, seed: u64) -> Self {
        assert!(
            params.min_thresh_bytes < params.max_thresh_bytes,
            "RED thresholds inverted"
        );
        Self {
            core: QueueCore::new(service_bps, max_bytes, "redqueue"),
            params,
            avg_bytes: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn stats(&self) -> &super::base::QueueStats {
        &self.core.stats
    }

    pub fn queuesize(&self) -> u64 {
        self.core.queuesize()
    }

    pub fn avg_bytes(&self) -> f64 {
        self.avg_bytes
    }
}

impl PacketSink for RandomQueue {
    fn name(&self) -> &str {
        &self.core.nodename
    }

    fn on_attach(&mut self, id: SinkId) {
        self.core.self_id = id;
    }

    fn receive(&mut self, mut pkt: Packet, sim: &mut EventList, net: &mut Network) {
        self.core.stats.enqueued = self.core.stats.enqueued.saturating_add(1);

        let w = self.params.ewma_weight;
        self.avg_bytes = (1.0 - w) * self.avg_bytes + w * self.core.queuesize() as f64;

        // 硬上限：缓冲放不下必丢
        if self.core.queuesize().saturating_add(pkt.size_bytes as u64) > self.core.maxsize() {
            self.core.drop_pkt(pkt, sim, net);
            return;
        }

        let avg = self.avg_bytes;
        let min = self.params.min_thresh_bytes as f64;
        let max = self.params.max_thresh_bytes as f64;

        if avg >= max {
            self.core.drop_pkt(pkt, sim, net);
            return;
        }
        if avg > min {
            let p = self.params.max_prob * (avg - min) / (max - min);
            if self.rng.gen::<f64>() < p {
                if pkt.ecn.is_ect() {
                    trace!(queue = self.core.self_id.0, avg, "RED 命中，CE 标记");
                    pkt.mark_ce_if_ect();
                } else {
                    self.core.drop_pkt(pkt, sim, net);
                    return;
                }
            }
        }

        self.core.enqueue(pkt, sim, net);
    }

    fn do_next_event(&mut self, sim: &mut EventList, net: &mut Network) {
        self.core.complete_service(sim, net);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
