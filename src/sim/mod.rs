//! 仿真核心模块
//!
//! 此模块包含事件驱动仿真的核心组件：仿真时间、事件、世界和调度器。

// 子模块声明
mod event;
mod eventlist;
mod scheduled_event;
mod time;
mod world;

// 重新导出公共接口
pub use event::Event;
pub use eventlist::{EventHandle, EventList};
pub use scheduled_event::ScheduledEvent;
pub use time::{drain_time, speed_from_gbps, speed_from_mbps, speed_from_pktps, SimTime};
pub use world::World;
