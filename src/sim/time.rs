//! 仿真时间类型
//!
//! 定义仿真时间（皮秒）及其单位转换、速率换算辅助函数。

/// 仿真时间（皮秒）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn from_nanos(ns: u64) -> SimTime {
        SimTime(ns.saturating_mul(1_000))
    }
    pub fn from_micros(us: u64) -> SimTime {
        SimTime(us.saturating_mul(1_000_000))
    }
    pub fn from_millis(ms: u64) -> SimTime {
        SimTime(ms.saturating_mul(1_000_000_000))
    }
    pub fn from_secs(s: u64) -> SimTime {
        SimTime(s.saturating_mul(1_000_000_000_000))
    }

    pub fn as_nanos(self) -> u64 {
        self.0 / 1_000
    }
    pub fn as_micros(self) -> u64 {
        self.0 / 1_000_000
    }
    pub fn as_millis(self) -> u64 {
        self.0 / 1_000_000_000
    }
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e12
    }

    pub fn saturating_add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
    pub fn saturating_sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
    pub fn saturating_mul(self, k: u64) -> SimTime {
        SimTime(self.0.saturating_mul(k))
    }
}

/// Mbps -> bps
pub fn speed_from_mbps(mbps: u64) -> u64 {
    mbps.saturating_mul(1_000_000)
}

/// Gbps -> bps
pub fn speed_from_gbps(gbps: u64) -> u64 {
    gbps.saturating_mul(1_000_000_000)
}

/// 包速率 -> bps（按参考包大小换算）
pub fn speed_from_pktps(pktps: u64, ref_pkt_bytes: u64) -> u64 {
    pktps.saturating_mul(ref_pkt_bytes).saturating_mul(8)
}

/// 在给定链路速率下串行化 `bytes` 字节所需的时间。
///
/// ceil(bytes*8*1e12 / bps)，用 u128 中间值避免溢出。
pub fn drain_time(bytes: u32, bps: u64) -> SimTime {
    if bps == 0 {
        return SimTime(u64::MAX / 4);
    }
    let bits = (bytes as u128).saturating_mul(8);
    let ps = (bits.saturating_mul(1_000_000_000_000u128) + (bps as u128 - 1)) / bps as u128;
    SimTime(ps.min(u64::MAX as u128) as u64)
}
