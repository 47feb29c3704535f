//! 传输协议模块
//!
//! TCP 源/汇与 Multipath TCP 耦合层。

pub mod mptcp;
pub mod tcp;
