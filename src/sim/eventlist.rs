//! 事件列表（调度器）
//!
//! 维护虚拟时钟与按时间排序的事件队列。每个仿真恰好有一个 EventList；
//! 它不是全局单例，由驱动层创建并显式传入各组件，方便一进程多仿真共存。

use super::event::Event;
use super::scheduled_event::ScheduledEvent;
use super::time::SimTime;
use super::world::World;
use std::collections::{BinaryHeap, HashSet};
use tracing::{debug, info, trace};

/// 调度句柄：用于在事件触发前取消它。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

/// 事件驱动调度器：维护当前时间与事件队列。
///
/// 排序规则：
/// 1. 所有待处理的立即触发（trigger）以 LIFO 顺序先于任何定时事件执行，
///    且不推进时间；
/// 2. 定时事件按时间最早优先，同一时刻按插入顺序 FIFO；
/// 3. 时钟永不回退，向过去调度是编程错误（直接 panic）。
#[derive(Default)]
pub struct EventList {
    now: SimTime,
    next_seq: u64,
    q: BinaryHeap<ScheduledEvent>,
    cancelled: HashSet<u64>,
    triggers: Vec<Box<dyn Event>>,
    endtime: Option<SimTime>,
    dropped_after_end: u64,
}

impl EventList {
    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 设置仿真结束时间：之后凡调度在 `endtime` 及以后的事件都被静默丢弃。
    pub fn set_endtime(&mut self, endtime: SimTime) {
        self.endtime = Some(endtime);
    }

    /// 调度事件在指定时间执行，返回可用于取消的句柄。
    pub fn schedule<E: Event>(&mut self, at: SimTime, ev: E) -> EventHandle {
        assert!(
            at >= self.now,
            "cannot schedule event in the past: at={:?} now={:?}",
            at,
            self.now
        );

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        if let Some(end) = self.endtime {
            if at >= end {
                self.dropped_after_end = self.dropped_after_end.saturating_add(1);
                debug!(?at, ?end, "事件晚于 endtime，丢弃");
                return EventHandle(seq);
            }
        }

        trace!(now = ?self.now, seq, schedule_at = ?at, "调度事件");
        self.q.push(ScheduledEvent {
            at,
            seq,
            ev: Box::new(ev),
        });
        EventHandle(seq)
    }

    /// 相对当前时间调度事件。
    pub fn schedule_in<E: Event>(&mut self, delay: SimTime, ev: E) -> EventHandle {
        self.schedule(self.now.saturating_add(delay), ev)
    }

    /// 取消一个尚未触发的事件。对已触发/已取消的句柄是幂等 no-op。
    pub fn cancel(&mut self, handle: EventHandle) {
        self.cancelled.insert(handle.0);
    }

    /// 注册一个零延迟立即回调。LIFO 排空，先于一切定时事件。
    pub fn trigger_now<E: Event>(&mut self, ev: E) {
        self.triggers.push(Box::new(ev));
    }

    /// 被丢弃的晚于 endtime 的事件数（诊断用）。
    pub fn dropped_after_endtime(&self) -> u64 {
        self.dropped_after_end
    }

    /// 当前待处理事件数（不含已取消的墓碑）。
    pub fn pending(&self) -> usize {
        self.q.len().saturating_sub(self.cancelled.len())
    }

    /// 执行下一个事件；队列排空后返回 false。
    pub fn do_next_event(&mut self, world: &mut dyn World) -> bool {
        // 触发器优先，立即执行，不推进时间
        if let Some(t) = self.triggers.pop() {
            t.execute(self, world);
            world.on_tick(self);
            return true;
        }

        loop {
            let Some(item) = self.q.pop() else {
                return false;
            };
            // 懒取消：墓碑事件既不执行也不推进时间
            if self.cancelled.remove(&item.seq) {
                continue;
            }
            debug_assert!(item.at >= self.now, "event time must be >= now");
            self.now = item.at;
            item.ev.execute(self, world);
            world.on_tick(self);
            return true;
        }
    }

    /// 运行直到事件队列为空或下一事件晚于 `until`。
    pub fn run_until(&mut self, until: SimTime, world: &mut dyn World) {
        loop {
            while let Some(t) = self.triggers.pop() {
                t.execute(self, world);
                world.on_tick(self);
            }
            match self.q.peek() {
                Some(top) if top.at <= until => {}
                _ => break,
            }
            let item = self.q.pop().expect("peek then pop");
            if self.cancelled.remove(&item.seq) {
                continue;
            }
            self.now = item.at;
            item.ev.execute(self, world);
            world.on_tick(self);
        }
        self.now = self.now.max(until);
    }

    /// 运行所有事件直到队列为空。
    #[tracing::instrument(skip(self, world))]
    pub fn run(&mut self, world: &mut dyn World) {
        info!("▶️  开始运行仿真");
        let mut event_count: u64 = 0;
        while self.do_next_event(world) {
            event_count = event_count.saturating_add(1);
        }
        info!(total_events = event_count, final_time = ?self.now, "✅ 仿真完成");
    }
}
