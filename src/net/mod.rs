//! 网络数据面模块
//!
//! 此模块包含数据包、流、路由、sink 注册表与传播管道。

// 子模块声明
mod flow;
mod id;
mod net_world;
mod network;
mod packet;
mod pipe;
mod route;

// 重新导出公共接口
pub use flow::{FlowStats, PacketFlow, DYNAMIC_FLOW_BASE};
pub use id::SinkId;
pub use net_world::NetWorld;
pub use network::{Network, PacketSink, Stats, Wake};
pub use packet::{
    seq_lt, Ecn, Header, Packet, PacketKind, PacketPool, PktPriority, SackBlock, TcpAckHeader,
    TcpHeader, DEFAULT_POOL_CEILING, DEFAULT_TTL,
};
pub use pipe::Pipe;
pub use route::Route;
