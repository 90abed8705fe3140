//! 事件循环的排空引擎。
//!
//! # 设计背景（Why）
//! - 线程驱动的事件循环与同步驱动的嵌入式循环共享同一套队列语义：即时任务 FIFO、
//!   定时任务按截止时间升序、任务故障不拖垮循环；把这套语义集中在 [`ExecutorCore`] 中，
//!   两种驱动方式只负责“何时调用排空”；
//! - 即时队列是 [`TaskInbox`]（底层为 `crossbeam_queue::SegQueue`），任意线程可无锁提交，
//!   终止与并发提交之间不会漏掉任何任务；
//!   定时堆只在排空过程中读写，用 `spin::Mutex` 包裹仅为满足 `Sync`。
//!
//! # 逻辑（How）
//! - 一次排空（[`ExecutorCore::run_pass`]）：
//!   1. 记录本轮开始时即时队列的长度，只执行这么多任务，本轮中重入提交的任务留到下一轮；
//!   2. 以当前时刻为快照，依次弹出所有已到期的定时条目并执行；
//! - 所有对定时堆的修改（插入、取消后的移除）都包装成即时任务投递，统一经由队列进入循环，
//!   包括在工作者自身上发起的调用。
//!
//! # 契约（What）
//! - 截止时间晚于快照的条目绝不提前执行；
//! - 任务体 panic 被捕获：有完成句柄的写入句柄，没有的记录日志，随后继续下一项；
//! - 终止之后提交的任务会被拒绝（有句柄的得到 `ExecutorTerminated`）。
use core::fmt;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use super::cancellation::CancellationToken;
use super::inbox::TaskInbox;
use super::promise::{Completion, Promise};
use super::reusable::ReusableScheduledTask;
use super::scheduled::{Period, ScheduledEntry, ScheduledHandle, ScheduledRunnable, ScheduledTask};
use super::task::{ContextAction, FuncTask, Runnable, StateAction, TaskPools, TaskState};
use crate::config::ExecutorSettings;
use crate::error::{CommonError, Result, TaskError};
use crate::logging::{self, LogSeverity, Logger};
use crate::time::{MonotonicTicks, TickSource, Ticks};

static TASK_IDS: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_task_id() -> u64 {
    TASK_IDS.fetch_add(1, Ordering::Relaxed)
}

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const TERMINATED: u8 = 2;

/// 单次排空的统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// 执行的即时任务数（包括定时堆维护任务）。
    pub immediate: usize,
    /// 触发的定时条目数。
    pub scheduled: usize,
}

impl PassOutcome {
    pub fn is_idle(&self) -> bool {
        self.immediate == 0 && self.scheduled == 0
    }
}

type Notifier = Arc<dyn Fn() + Send + Sync>;

/// 即时队列 + 定时堆 + 任务池组成的排空引擎。
pub struct ExecutorCore {
    tasks: TaskInbox<Box<dyn Runnable>>,
    scheduled: spin::Mutex<BinaryHeap<ScheduledEntry>>,
    sequence: AtomicU64,
    lifecycle: AtomicU8,
    pools: Arc<TaskPools>,
    ticks: Arc<dyn TickSource>,
    notifier: spin::RwLock<Option<Notifier>>,
    logger: Arc<dyn Logger>,
    settings: ExecutorSettings,
}

impl ExecutorCore {
    pub fn new(settings: ExecutorSettings) -> Result<Arc<Self>> {
        Self::with_ticks(settings, Arc::new(MonotonicTicks))
    }

    pub fn with_ticks(settings: ExecutorSettings, ticks: Arc<dyn TickSource>) -> Result<Arc<Self>> {
        settings.validate()?;
        Ok(Arc::new(Self {
            tasks: TaskInbox::new(),
            scheduled: spin::Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            lifecycle: AtomicU8::new(RUNNING),
            pools: TaskPools::new(settings.task_pool_capacity())?,
            ticks,
            notifier: spin::RwLock::new(None),
            logger: logging::logger("flare.executor"),
            settings,
        }))
    }

    pub fn now(&self) -> Ticks {
        self.ticks.now()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn pools(&self) -> &Arc<TaskPools> {
        &self.pools
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// 设置新任务到达时的唤醒回调，由线程驱动的循环在工作者启动时安装。
    pub fn set_notifier(&self, notifier: Notifier) {
        *self.notifier.write() = Some(notifier);
    }

    fn notify(&self) {
        let notifier = self.notifier.read().clone();
        if let Some(notifier) = notifier {
            notifier();
        }
    }

    // ---- 生命周期 -------------------------------------------------------

    /// 进入关闭流程，首次调用返回 `true`。
    pub fn begin_shutdown(&self) -> bool {
        let started = self
            .lifecycle
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.notify();
        started
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) != RUNNING
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == TERMINATED
    }

    /// 标记终止：取消所有剩余定时条目，拒绝队列中残留的任务。
    pub fn terminate(&self) {
        self.lifecycle.store(TERMINATED, Ordering::Release);
        self.cancel_scheduled_tasks();
        self.tasks.close(|task| task.reject());
    }

    // ---- 即时任务 -------------------------------------------------------

    /// 投递一个即时任务。
    pub fn execute_runnable(&self, task: Box<dyn Runnable>) {
        if self.tasks.push(task, |task| task.reject()) {
            self.notify();
        } else if self.logger.is_enabled(LogSeverity::Warn) {
            self.logger.warn("task submitted after executor termination was rejected");
        }
    }

    pub fn execute<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_runnable(self.pools.action(action));
    }

    pub fn execute_with_state(&self, action: StateAction, state: TaskState) {
        self.execute_runnable(self.pools.state_action(action, state));
    }

    pub fn execute_with_context(&self, action: ContextAction, context: TaskState, state: TaskState) {
        self.execute_runnable(self.pools.context_action(action, context, state));
    }

    fn submit_inner<T, F>(&self, func: F, token: Option<CancellationToken>) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> core::result::Result<T, TaskError> + Send + 'static,
    {
        let (promise, completion) = Promise::pair();
        self.execute_runnable(Box::new(FuncTask::new(func, promise, token)));
        completion
    }

    /// 提交有返回值的函数。
    pub fn submit<T, F>(&self, func: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_inner(move || Ok(func()), None)
    }

    /// 提交返回 `Result` 的函数，`Err` 作为故障写入句柄。
    pub fn try_submit<T, E, F>(&self, func: F) -> Completion<T>
    where
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> core::result::Result<T, E> + Send + 'static,
    {
        self.submit_inner(move || func().map_err(TaskError::failed), None)
    }

    /// 提交可被令牌取消的函数；令牌在任务体开始前被取消时句柄变为 Cancelled。
    pub fn submit_cancellable<T, F>(&self, func: F, token: CancellationToken) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_inner(move || Ok(func()), Some(token))
    }

    pub fn submit_with_state<T>(&self, func: fn(TaskState) -> T, state: TaskState) -> Completion<T>
    where
        T: Send + 'static,
    {
        self.submit_inner(move || Ok(func(state)), None)
    }

    pub fn submit_with_context<T>(
        &self,
        func: fn(TaskState, TaskState) -> T,
        context: TaskState,
        state: TaskState,
    ) -> Completion<T>
    where
        T: Send + 'static,
    {
        self.submit_inner(move || Ok(func(context, state)), None)
    }

    // ---- 定时任务 -------------------------------------------------------

    /// 在 `delay` 之后执行一次。
    pub fn schedule<F>(self: &Arc<Self>, action: F, delay: Duration) -> ScheduledHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = self.now() + delay;
        let (task, completion) = ScheduledTask::once(next_task_id(), deadline, Box::new(action), Arc::downgrade(self));
        self.enqueue_scheduled(task.clone(), deadline, 0);
        ScheduledHandle::new(task, completion)
    }

    /// 固定速率周期任务：下一次截止时间 = 上一次截止时间 + `period`。
    pub fn schedule_at_fixed_rate<F>(
        self: &Arc<Self>,
        action: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_periodic(Box::new(action), initial_delay, period, Period::FixedRate(period))
    }

    /// 固定延迟周期任务：下一次截止时间 = 本次完成时刻 + `delay`。
    pub fn schedule_with_fixed_delay<F>(
        self: &Arc<Self>,
        action: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_periodic(Box::new(action), initial_delay, delay, Period::FixedDelay(delay))
    }

    fn schedule_periodic(
        self: &Arc<Self>,
        action: Box<dyn FnMut() + Send>,
        initial_delay: Duration,
        period: Duration,
        policy: Period,
    ) -> Result<ScheduledHandle> {
        if period.is_zero() {
            return Err(CommonError::invalid_argument("period", "period must be positive"));
        }
        let deadline = self.now() + initial_delay;
        let (task, completion) = ScheduledTask::periodic(next_task_id(), deadline, policy, action, Arc::downgrade(self));
        self.enqueue_scheduled(task.clone(), deadline, 0);
        Ok(ScheduledHandle::new(task, completion))
    }

    /// 重置可复用任务并在 `delay` 后触发。
    ///
    /// # Panics
    /// 任务的上一轮尚未结束时 panic。
    pub fn schedule_reusable(self: &Arc<Self>, task: &Arc<ReusableScheduledTask>, delay: Duration) -> Completion<()> {
        let deadline = self.now() + delay;
        let (completion, generation) = task.reset(self, deadline);
        self.enqueue_scheduled(task.clone(), deadline, generation);
        completion
    }

    fn enqueue_scheduled(self: &Arc<Self>, task: Arc<dyn ScheduledRunnable>, deadline: Ticks, generation: u64) {
        self.execute_runnable(Box::new(InsertScheduled {
            core: Arc::clone(self),
            task,
            deadline,
            generation,
        }));
    }

    /// 直接插入定时堆，只能在排空过程中调用。
    pub(crate) fn insert_scheduled(&self, task: Arc<dyn ScheduledRunnable>, deadline: Ticks, generation: u64) {
        if self.is_terminated() {
            task.cancel_on_shutdown();
            return;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.scheduled.lock().push(ScheduledEntry {
            deadline,
            sequence,
            generation,
            task,
        });
    }

    /// 请求把指定条目移出定时堆，经由任务队列执行。
    pub(crate) fn request_removal(self: &Arc<Self>, id: u64, generation: u64) {
        let core = Arc::clone(self);
        self.execute(move || {
            core.scheduled
                .lock()
                .retain(|entry| !(entry.task.id() == id && entry.generation == generation));
        });
    }

    /// 取消并清空所有定时条目。
    pub fn cancel_scheduled_tasks(&self) {
        let drained: Vec<ScheduledEntry> = self.scheduled.lock().drain().collect();
        for entry in drained {
            entry.task.cancel_on_shutdown();
        }
    }

    // ---- 排空 -----------------------------------------------------------

    /// 执行本轮开始时已在队列中的即时任务。
    pub fn run_immediate_tasks(&self) -> usize {
        let mut budget = self.tasks.len();
        if let Some(limit) = self.settings.max_tasks_per_pass() {
            budget = budget.min(limit);
        }
        let mut ran = 0;
        while ran < budget {
            let Some(task) = self.tasks.pop() else {
                break;
            };
            self.run_guarded(task);
            ran += 1;
        }
        ran
    }

    /// 以当前时刻为快照，执行所有已到期的定时条目。
    pub fn run_scheduled_tasks(self: &Arc<Self>) -> usize {
        let now = self.now();
        let mut fired = 0;
        while let Some(entry) = self.pop_due(now) {
            if entry.task.is_current(entry.generation) {
                entry.task.fire(self, entry.generation);
                fired += 1;
            }
        }
        fired
    }

    fn pop_due(&self, now: Ticks) -> Option<ScheduledEntry> {
        let mut heap = self.scheduled.lock();
        match heap.peek() {
            Some(entry) if entry.deadline <= now => heap.pop(),
            _ => None,
        }
    }

    /// 一次完整排空：先即时任务，再到期定时任务。
    pub fn run_pass(self: &Arc<Self>) -> PassOutcome {
        let immediate = self.run_immediate_tasks();
        let scheduled = self.run_scheduled_tasks();
        PassOutcome { immediate, scheduled }
    }

    fn run_guarded(&self, task: Box<dyn Runnable>) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
            let error = TaskError::from_panic(payload);
            self.logger.warn_with("a task raised an exception and was skipped", &error);
        }
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.lock().len()
    }

    /// 下一个仍然有效的定时截止时间。
    pub fn next_scheduled_deadline(&self) -> Option<Ticks> {
        let mut heap = self.scheduled.lock();
        while let Some(entry) = heap.peek() {
            if entry.task.state() == super::ScheduledState::Armed && entry.task.is_current(entry.generation) {
                return Some(entry.deadline);
            }
            heap.pop();
        }
        None
    }
}

/// 把定时条目插入堆的维护任务；被拒绝时直接取消条目，保证句柄不会永远悬挂。
struct InsertScheduled {
    core: Arc<ExecutorCore>,
    task: Arc<dyn ScheduledRunnable>,
    deadline: Ticks,
    generation: u64,
}

impl Runnable for InsertScheduled {
    fn run(self: Box<Self>) {
        self.core.insert_scheduled(self.task, self.deadline, self.generation);
    }

    fn reject(self: Box<Self>) {
        self.task.cancel_on_shutdown();
    }
}

impl fmt::Debug for ExecutorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorCore")
            .field("pending", &self.tasks.len())
            .field("scheduled", &self.scheduled.lock().len())
            .field("shutting_down", &self.is_shutting_down())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
