//! 拓扑布线模块
//!
//! 把队列/管道/协议端点接成实验场景。

pub mod dumbbell;
pub mod multipath;
