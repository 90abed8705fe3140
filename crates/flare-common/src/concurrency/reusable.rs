use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

#[cfg(not(any(loom, flare_loom)))]
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[cfg(any(loom, flare_loom))]
use loom::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::engine::ExecutorCore;
use super::promise::{Completion, Promise};
use super::scheduled::{ScheduledRunnable, ScheduledState, StateCell};
use crate::error::TaskError;
use crate::time::Ticks;

struct Cycle {
    promise: Option<Promise<()>>,
    core: Weak<ExecutorCore>,
}

/// 可在多次触发之间重置复用的定时任务。
///
/// # 设计背景（Why）
/// - 心跳、空闲检测这类“每次触发后由业务决定是否再排一次”的任务，若每次都新建定时任务，
///   会在热路径上持续分配；复用同一实例只需在两次触发之间重置状态；
/// - 重置与执行可能交错，必须拒绝在上一轮尚未结束时重置，否则会同时存在两个有效的截止时间。
///
/// # 逻辑（How）
/// - 初始状态为 `Retired`，表示“没有进行中的轮次”；
/// - [`reset`](Self::reset) 校验上一轮已经结束（完成、故障或取消），随后写入新截止时间、
///   新完成句柄并把状态置回 `Armed`，同时递增代次；
/// - 定时堆中残留的旧条目携带旧代次，出堆时被识别并跳过。
///
/// # 契约（What）
/// - 在 `Armed` 或 `Running` 状态调用 `reset` 属于编程错误，会立即 panic；
/// - 取消只在 `Armed` 时成功，成功后句柄变为 Cancelled 并请求移出定时堆。
pub struct ReusableScheduledTask {
    id: u64,
    generation: AtomicU64,
    state: StateCell,
    deadline: AtomicI64,
    action: Box<dyn Fn() + Send + Sync>,
    cycle: spin::Mutex<Cycle>,
}

impl ReusableScheduledTask {
    pub fn new<F>(action: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self {
            id: super::engine::next_task_id(),
            generation: AtomicU64::new(0),
            state: StateCell::new(ScheduledState::Retired),
            deadline: AtomicI64::new(Ticks::MAX.as_nanos()),
            action: Box::new(action),
            cycle: spin::Mutex::new(Cycle {
                promise: None,
                core: Weak::new(),
            }),
        })
    }

    /// 开启新一轮：绑定执行器与截止时间，返回本轮的完成句柄，以及需要写入堆条目的代次。
    ///
    /// # Panics
    /// 上一轮仍处于 `Armed` 或 `Running` 时 panic。
    pub(crate) fn reset(&self, core: &Arc<ExecutorCore>, deadline: Ticks) -> (Completion<()>, u64) {
        let current = self.state.load();
        assert!(
            current.is_settled(),
            "ReusableScheduledTask::reset called while the previous cycle is {current:?}"
        );
        let (promise, completion) = Promise::pair();
        {
            let mut cycle = self.cycle.lock();
            cycle.promise = Some(promise);
            cycle.core = Arc::downgrade(core);
        }
        self.deadline.store(deadline.as_nanos(), Ordering::Release);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            self.state.transition(current, ScheduledState::Armed),
            "ReusableScheduledTask::reset raced with another reset"
        );
        (completion, generation)
    }

    /// 取消当前轮次。
    pub fn cancel(&self) -> bool {
        if !self.state.try_cancel() {
            return false;
        }
        let (promise, core) = {
            let cycle = self.cycle.lock();
            (cycle.promise.clone(), cycle.core.upgrade())
        };
        if let Some(promise) = promise {
            promise.try_cancel();
        }
        if let Some(core) = core {
            core.request_removal(self.id, self.generation.load(Ordering::Acquire));
        }
        true
    }

    pub fn state(&self) -> ScheduledState {
        self.state.load()
    }

    pub fn deadline(&self) -> Ticks {
        Ticks::from_nanos(self.deadline.load(Ordering::Acquire))
    }

    fn current_promise(&self) -> Option<Promise<()>> {
        self.cycle.lock().promise.clone()
    }
}

impl ScheduledRunnable for ReusableScheduledTask {
    fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> ScheduledState {
        self.state.load()
    }

    fn fire(self: Arc<Self>, _core: &Arc<ExecutorCore>, generation: u64) {
        if !self.is_current(generation) || !self.state.try_claim() {
            return;
        }
        let promise = self.current_promise();
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.action)())).map_err(TaskError::from_panic);
        self.state.store(ScheduledState::Retired);
        if let Some(promise) = promise {
            promise.try_resolve(outcome);
        }
    }

    fn cancel_on_shutdown(&self) {
        if self.state.try_cancel()
            && let Some(promise) = self.current_promise()
        {
            promise.try_cancel();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }
}

impl fmt::Debug for ReusableScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusableScheduledTask")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .field("deadline", &self.deadline())
            .finish()
    }
}
