//! 标识符类型
//!
//! 定义 sink（可接收数据包的组件）的唯一标识符。

/// Sink 标识符（network 注册表内的槽位下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(pub usize);
