//! 定时任务与其取消状态机。
//!
//! # 设计背景（Why）
//! - 定时任务的“取消”与“开始执行”可能在不同线程上同时发生，必须有且仅有一方获胜；
//! - 以显式有限状态枚举加 CAS 迁移表达这一竞争，非法迁移在类型上不可表达，
//!   比位掩码更容易审计。
//!
//! # 逻辑（How）
//! - 状态：`Armed` →（取消获胜）`CancellationRequested`，或 →（执行获胜）`Running` → `Retired`；
//! - 周期任务在一次执行结束后由 `Running` 回到 `Armed` 并重新入堆；执行器已开始关闭时改为
//!   `Retired` 并把句柄置为完成；
//! - 取消成功后句柄立即变为 Cancelled，并通过任务队列请求执行器把条目移出定时堆；
//!   排空时遇到非 `Armed` 条目同样会跳过，二者任一生效即可保证被取消任务不会执行。
//!
//! # 契约（What）
//! - 取消只在 `Armed` 状态成功，其余状态返回 `false`，不会报错；
//! - 取消从不打断已经在执行的任务体；
//! - 固定速率：下一次截止时间 = 上一次截止时间 + 周期；固定延迟：下一次截止时间 = 本次完成时刻 + 周期。
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::cmp::Ordering as CmpOrdering;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[cfg(not(any(loom, flare_loom)))]
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

#[cfg(any(loom, flare_loom))]
use loom::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use super::engine::ExecutorCore;
use super::promise::{Completion, CompletionStatus, Promise};
use crate::error::TaskError;
use crate::time::Ticks;

/// 定时任务的生命周期状态。
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScheduledState {
    /// 已入堆，尚未执行。
    Armed = 0,
    /// 取消获胜，终态。
    CancellationRequested = 1,
    /// 执行已开始，取消将被拒绝。
    Running = 2,
    /// 执行结束（完成或故障）。
    Retired = 3,
}

impl ScheduledState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Armed,
            1 => Self::CancellationRequested,
            2 => Self::Running,
            _ => Self::Retired,
        }
    }

    /// 是否处于可以重新武装的终态。
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::CancellationRequested | Self::Retired)
    }
}

/// 状态机的原子存储单元。
pub struct StateCell {
    raw: AtomicU8,
}

impl StateCell {
    pub fn new(initial: ScheduledState) -> Self {
        Self {
            raw: AtomicU8::new(initial as u8),
        }
    }

    pub fn load(&self) -> ScheduledState {
        ScheduledState::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// 仅当当前状态为 `from` 时迁移到 `to`。
    pub fn transition(&self, from: ScheduledState, to: ScheduledState) -> bool {
        self.raw
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 取消：`Armed → CancellationRequested`。
    pub fn try_cancel(&self) -> bool {
        self.transition(ScheduledState::Armed, ScheduledState::CancellationRequested)
    }

    /// 设置为不可取消：`Armed → Running`。
    pub fn try_claim(&self) -> bool {
        self.transition(ScheduledState::Armed, ScheduledState::Running)
    }

    pub(crate) fn store(&self, state: ScheduledState) {
        self.raw.store(state as u8, Ordering::Release);
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateCell").field(&self.load()).finish()
    }
}

/// 定时堆可以驱动的条目。
pub(crate) trait ScheduledRunnable: Send + Sync + 'static {
    fn id(&self) -> u64;

    fn state(&self) -> ScheduledState;

    /// 截止时间到达时由排空过程调用；`generation` 为入堆时记录的代次。
    fn fire(self: Arc<Self>, core: &Arc<ExecutorCore>, generation: u64);

    /// 执行器终止时取消；已经离开 `Armed` 的条目保持原状。
    fn cancel_on_shutdown(&self);

    /// 入堆条目是否仍对应当前代次。
    fn is_current(&self, _generation: u64) -> bool {
        true
    }
}

/// 定时堆中的一项，按 `(deadline, sequence)` 升序出堆。
pub(crate) struct ScheduledEntry {
    pub(crate) deadline: Ticks,
    pub(crate) sequence: u64,
    pub(crate) generation: u64,
    pub(crate) task: Arc<dyn ScheduledRunnable>,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    // `BinaryHeap` 是大顶堆，反转比较使最早截止时间位于堆顶，同截止时间按入堆顺序。
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// 周期策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Period {
    FixedRate(Duration),
    FixedDelay(Duration),
}

enum Body {
    Once(Option<Box<dyn FnOnce() + Send>>),
    Repeat(Option<Box<dyn FnMut() + Send>>),
}

/// 一次性或周期性定时任务。
pub(crate) struct ScheduledTask {
    id: u64,
    state: StateCell,
    deadline: AtomicI64,
    period: Option<Period>,
    body: spin::Mutex<Body>,
    promise: Promise<()>,
    core: Weak<ExecutorCore>,
}

impl ScheduledTask {
    pub(crate) fn once(
        id: u64,
        deadline: Ticks,
        body: Box<dyn FnOnce() + Send>,
        core: Weak<ExecutorCore>,
    ) -> (Arc<Self>, Completion<()>) {
        Self::build(id, deadline, None, Body::Once(Some(body)), core)
    }

    pub(crate) fn periodic(
        id: u64,
        deadline: Ticks,
        period: Period,
        body: Box<dyn FnMut() + Send>,
        core: Weak<ExecutorCore>,
    ) -> (Arc<Self>, Completion<()>) {
        Self::build(id, deadline, Some(period), Body::Repeat(Some(body)), core)
    }

    fn build(
        id: u64,
        deadline: Ticks,
        period: Option<Period>,
        body: Body,
        core: Weak<ExecutorCore>,
    ) -> (Arc<Self>, Completion<()>) {
        let (promise, completion) = Promise::pair();
        let task = Arc::new(Self {
            id,
            state: StateCell::new(ScheduledState::Armed),
            deadline: AtomicI64::new(deadline.as_nanos()),
            period,
            body: spin::Mutex::new(body),
            promise,
            core,
        });
        (task, completion)
    }

    pub(crate) fn deadline(&self) -> Ticks {
        Ticks::from_nanos(self.deadline.load(Ordering::Acquire))
    }

    pub(crate) fn cancel(&self) -> bool {
        if !self.state.try_cancel() {
            return false;
        }
        self.promise.try_cancel();
        self.drop_body();
        if let Some(core) = self.core.upgrade() {
            core.request_removal(self.id, 0);
        }
        true
    }

    fn drop_body(&self) {
        let mut body = self.body.lock();
        *body = match &*body {
            Body::Once(_) => Body::Once(None),
            Body::Repeat(_) => Body::Repeat(None),
        };
    }

    fn run_body(&self) -> Result<(), TaskError> {
        let taken = {
            let mut body = self.body.lock();
            match &mut *body {
                Body::Once(action) => action.take().map(BodyRun::Once),
                Body::Repeat(action) => action.take().map(BodyRun::Repeat),
            }
        };
        match taken {
            None => Ok(()),
            Some(BodyRun::Once(action)) => catch_unwind(AssertUnwindSafe(action)).map_err(TaskError::from_panic),
            Some(BodyRun::Repeat(mut action)) => {
                let outcome = catch_unwind(AssertUnwindSafe(&mut action)).map_err(TaskError::from_panic);
                if let Body::Repeat(slot) = &mut *self.body.lock() {
                    *slot = Some(action);
                }
                outcome
            }
        }
    }
}

enum BodyRun {
    Once(Box<dyn FnOnce() + Send>),
    Repeat(Box<dyn FnMut() + Send>),
}

impl ScheduledRunnable for ScheduledTask {
    fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> ScheduledState {
        self.state.load()
    }

    fn fire(self: Arc<Self>, core: &Arc<ExecutorCore>, _generation: u64) {
        if !self.state.try_claim() {
            return;
        }
        let outcome = self.run_body();
        let Some(period) = self.period else {
            self.state.store(ScheduledState::Retired);
            self.promise.try_resolve(outcome);
            return;
        };
        if let Err(error) = outcome {
            self.state.store(ScheduledState::Retired);
            self.promise.try_fail(error);
            return;
        }
        if core.is_shutting_down() {
            self.state.store(ScheduledState::Retired);
            self.promise.try_complete(());
            return;
        }
        let next = match period {
            Period::FixedRate(period) => self.deadline() + period,
            Period::FixedDelay(period) => core.now() + period,
        };
        self.deadline.store(next.as_nanos(), Ordering::Release);
        self.state.store(ScheduledState::Armed);
        core.insert_scheduled(self, next, 0);
    }

    fn cancel_on_shutdown(&self) {
        if self.state.try_cancel() {
            self.promise.try_cancel();
            self.drop_body();
        }
    }
}

/// 定时任务的外部句柄。
///
/// 实现 [`Future`]：一次性任务在执行后完成；周期任务只会在被取消、故障或执行器关闭时完成。
pub struct ScheduledHandle {
    task: Arc<ScheduledTask>,
    completion: Completion<()>,
}

impl ScheduledHandle {
    pub(crate) fn new(task: Arc<ScheduledTask>, completion: Completion<()>) -> Self {
        Self { task, completion }
    }

    /// 尝试取消，只有任务尚未开始执行时返回 `true`。
    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }

    pub fn state(&self) -> ScheduledState {
        self.task.state.load()
    }

    /// 当前（或下一次）截止时间。
    pub fn deadline(&self) -> Ticks {
        self.task.deadline()
    }

    pub fn is_periodic(&self) -> bool {
        self.task.period.is_some()
    }

    pub fn status(&self) -> CompletionStatus {
        self.completion.status()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn error(&self) -> Option<TaskError> {
        self.completion.error()
    }
}

impl Future for ScheduledHandle {
    type Output = Result<(), TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx)
    }
}

impl fmt::Debug for ScheduledHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("id", &self.task.id)
            .field("state", &self.state())
            .field("deadline", &self.deadline())
            .field("status", &self.status())
            .finish()
    }
}
