//! 路由
//!
//! 一条路由是 sink 的有序序列：位置 i 的 sink 按自身语义（时延/排队/处理）
//! 把包交给位置 i+1 的 sink，末位 sink 是终点。构造完成后不可变，
//! 同一路径的所有包通过 `Arc` 共享。反向路由由布线层显式构造，不自动推导。

use super::id::SinkId;

#[derive(Debug, Clone, Default)]
pub struct Route {
    hops: Vec<SinkId>,
}

impl Route {
    pub fn new(hops: Vec<SinkId>) -> Self {
        Self { hops }
    }

    pub fn push_back(&mut self, sink: SinkId) {
        self.hops.push(sink);
    }

    pub fn at(&self, idx: usize) -> Option<SinkId> {
        self.hops.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn front(&self) -> Option<SinkId> {
        self.hops.first().copied()
    }

    pub fn back(&self) -> Option<SinkId> {
        self.hops.last().copied()
    }
}
