//! 有界对象池。
//!
//! # 设计背景（Why）
//! - 事件循环的热路径会为每次提交构造任务包装；通过回收包装对象，稳定状态下提交不再产生新分配；
//! - 空闲列表使用 `crossbeam_queue::ArrayQueue`：多生产者多消费者、无锁、容量固定，
//!   满足“任意线程并发 take/free 且无需外部加锁”的要求。
//!
//! # 逻辑（How）
//! - `take`：优先弹出空闲实例，否则调用工厂新建；
//! - `free`：先调用 [`Recycle::recycle`] 清空实例持有的引用，再尝试入队；队列已满时直接丢弃。
//!
//! # 契约（What）
//! - 池内实例数永远不超过容量；
//! - 单一所有者纪律：`free` 之后调用方不得再持有该实例（由所有权转移在类型层面保证）。
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::error::{CommonError, Result};

/// 每个池的默认容量。
pub const DEFAULT_POOL_CAPACITY: usize = 128;

/// 归还前清空字段的能力。
pub trait Recycle {
    /// 清空实例上持有的引用与状态，使其可以被安全复用。
    fn recycle(&mut self);
}

impl<T: Recycle + ?Sized> Recycle for Box<T> {
    fn recycle(&mut self) {
        (**self).recycle();
    }
}

/// 池的运行统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 由工厂新建的实例数。
    pub created: u64,
    /// 从空闲列表复用的次数。
    pub reused: u64,
    /// 成功归还空闲列表的次数。
    pub recycled: u64,
    /// 因容量已满被丢弃的次数。
    pub discarded: u64,
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    recycled: AtomicU64,
    discarded: AtomicU64,
}

/// 基于无锁环形队列的有界对象池。
pub struct ObjectPool<T> {
    free: ArrayQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    counters: PoolCounters,
}

impl<T: Recycle> ObjectPool<T> {
    /// 以给定容量和工厂创建对象池，容量为零时返回参数错误。
    pub fn new<F>(capacity: usize, factory: F) -> Result<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(CommonError::invalid_argument(
                "capacity",
                "pool capacity must be positive",
            ));
        }
        Ok(Self {
            free: ArrayQueue::new(capacity),
            factory: Box::new(factory),
            counters: PoolCounters::default(),
        })
    }

    /// 以 [`DEFAULT_POOL_CAPACITY`] 创建对象池。
    pub fn with_default_capacity<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            free: ArrayQueue::new(DEFAULT_POOL_CAPACITY),
            factory: Box::new(factory),
            counters: PoolCounters::default(),
        }
    }

    /// 取出一个实例：空闲列表为空时回退到新建。
    pub fn take(&self) -> T {
        match self.free.pop() {
            Some(value) => {
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// 清空实例并尝试归还；返回 `false` 表示池已满、实例被丢弃。
    pub fn free(&self, mut value: T) -> bool {
        value.recycle();
        match self.free.push(value) {
            Ok(()) => {
                self.counters.recycled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

impl<T> ObjectPool<T> {
    /// 当前空闲实例数。
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            recycled: self.counters.recycled.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("idle", &self.free.len())
            .field("capacity", &self.free.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}
