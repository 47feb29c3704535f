//! 数据包流
//!
//! 按逻辑连接聚合数据包的轻量记录。源端在创建数据包时填入 flow id，
//! 下游只读。

use std::sync::atomic::{AtomicU64, Ordering};

/// 动态分配的 flow id 从此基址开始，避免与静态/测试 flow id 冲突。
pub const DYNAMIC_FLOW_BASE: u64 = 1_000_000_000;

static NEXT_DYNAMIC_FLOW_ID: AtomicU64 = AtomicU64::new(DYNAMIC_FLOW_BASE);

/// 数据包流：全局唯一 id + 是否记录逐包日志。
#[derive(Debug, Clone)]
pub struct PacketFlow {
    pub id: u64,
    pub log_me: bool,
}

impl PacketFlow {
    /// 从单调递增计数器分配动态 flow id。
    pub fn new_dynamic() -> Self {
        Self {
            id: NEXT_DYNAMIC_FLOW_ID.fetch_add(1, Ordering::Relaxed),
            log_me: false,
        }
    }

    /// 静态/测试场景用的固定 id（必须 < DYNAMIC_FLOW_BASE）。
    pub fn from_id(id: u64) -> Self {
        debug_assert!(id < DYNAMIC_FLOW_BASE, "static flow id collides with dynamic base");
        Self { id, log_me: false }
    }

    pub fn set_log_me(&mut self, on: bool) {
        self.log_me = on;
    }
}

/// 每流累计计数（由 network 注册表维护）。
#[derive(Debug, Default, Clone)]
pub struct FlowStats {
    pub delivered_pkts: u64,
    pub delivered_bytes: u64,
}
