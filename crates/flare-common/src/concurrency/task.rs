//! 即时任务的表示与池化包装。
//!
//! # 设计背景（Why）
//! - 事件循环每秒可能接收数十万次 `execute`，如果每次都新建包装对象，分配器会成为瓶颈；
//! - 三种无返回值变体（无参动作、动作 + 状态、动作 + 上下文 + 状态）各自拥有独立的有界池，
//!   状态变体使用函数指针加共享状态，调用方无需为闭包捕获额外分配。
//!
//! # 逻辑（How）
//! - 包装对象在 `run` 开始时先取出字段、把自身归还对象池，再执行任务体；
//!   因此任务体 panic 不会导致包装泄漏，也不会在仍被队列引用时复用；
//! - 有返回值的 [`FuncTask`] 不池化，结果通过 [`Promise`] 交付。
//!
//! # 契约（What）
//! - [`Runnable::run`] 由事件循环在唯一工作者上调用，外层已包裹 `catch_unwind`；
//! - [`Runnable::reject`] 在执行器拒绝或丢弃任务时调用，有完成句柄的任务必须在此把句柄置为失败。
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::cancellation::CancellationToken;
use super::promise::Promise;
use crate::error::{Result, TaskError};
use crate::pool::{ObjectPool, Recycle};

/// 任务间共享的不透明状态。
pub type TaskState = Arc<dyn Any + Send + Sync>;

/// “动作 + 状态”变体的任务体。
pub type StateAction = fn(TaskState);

/// “动作 + 上下文 + 状态”变体的任务体。
pub type ContextAction = fn(TaskState, TaskState);

/// 可被事件循环执行的工作单元。
pub trait Runnable: Send + 'static {
    fn run(self: Box<Self>);

    /// 执行器拒绝或在终止时丢弃任务。
    fn reject(self: Box<Self>) {}
}

impl<F> Runnable for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// 无参动作的池化包装。
#[derive(Default)]
pub struct ActionTask {
    action: Option<Box<dyn FnOnce() + Send>>,
    home: Option<Arc<TaskPools>>,
}

impl Recycle for ActionTask {
    fn recycle(&mut self) {
        self.action = None;
        self.home = None;
    }
}

impl Runnable for ActionTask {
    fn run(mut self: Box<Self>) {
        let action = self.action.take();
        if let Some(home) = self.home.take() {
            home.actions.free(self);
        }
        if let Some(action) = action {
            action();
        }
    }

    fn reject(mut self: Box<Self>) {
        if let Some(home) = self.home.take() {
            home.actions.free(self);
        }
    }
}

/// “动作 + 状态”的池化包装。
#[derive(Default)]
pub struct StateActionTask {
    action: Option<StateAction>,
    state: Option<TaskState>,
    home: Option<Arc<TaskPools>>,
}

impl Recycle for StateActionTask {
    fn recycle(&mut self) {
        self.action = None;
        self.state = None;
        self.home = None;
    }
}

impl Runnable for StateActionTask {
    fn run(mut self: Box<Self>) {
        let action = self.action.take();
        let state = self.state.take();
        if let Some(home) = self.home.take() {
            home.stateful.free(self);
        }
        if let (Some(action), Some(state)) = (action, state) {
            action(state);
        }
    }

    fn reject(mut self: Box<Self>) {
        if let Some(home) = self.home.take() {
            home.stateful.free(self);
        }
    }
}

/// “动作 + 上下文 + 状态”的池化包装。
#[derive(Default)]
pub struct ContextActionTask {
    action: Option<ContextAction>,
    context: Option<TaskState>,
    state: Option<TaskState>,
    home: Option<Arc<TaskPools>>,
}

impl Recycle for ContextActionTask {
    fn recycle(&mut self) {
        self.action = None;
        self.context = None;
        self.state = None;
        self.home = None;
    }
}

impl Runnable for ContextActionTask {
    fn run(mut self: Box<Self>) {
        let action = self.action.take();
        let context = self.context.take();
        let state = self.state.take();
        if let Some(home) = self.home.take() {
            home.contextual.free(self);
        }
        if let (Some(action), Some(context), Some(state)) = (action, context, state) {
            action(context, state);
        }
    }

    fn reject(mut self: Box<Self>) {
        if let Some(home) = self.home.take() {
            home.contextual.free(self);
        }
    }
}

/// 每个执行器持有一组任务池，每种变体一个池。
pub struct TaskPools {
    actions: ObjectPool<Box<ActionTask>>,
    stateful: ObjectPool<Box<StateActionTask>>,
    contextual: ObjectPool<Box<ContextActionTask>>,
}

impl TaskPools {
    pub fn new(capacity: usize) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            actions: ObjectPool::new(capacity, Box::<ActionTask>::default)?,
            stateful: ObjectPool::new(capacity, Box::<StateActionTask>::default)?,
            contextual: ObjectPool::new(capacity, Box::<ContextActionTask>::default)?,
        }))
    }

    pub fn action<F>(self: &Arc<Self>, action: F) -> Box<dyn Runnable>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = self.actions.take();
        task.action = Some(Box::new(action));
        task.home = Some(Arc::clone(self));
        task
    }

    pub fn state_action(self: &Arc<Self>, action: StateAction, state: TaskState) -> Box<dyn Runnable> {
        let mut task = self.stateful.take();
        task.action = Some(action);
        task.state = Some(state);
        task.home = Some(Arc::clone(self));
        task
    }

    pub fn context_action(
        self: &Arc<Self>,
        action: ContextAction,
        context: TaskState,
        state: TaskState,
    ) -> Box<dyn Runnable> {
        let mut task = self.contextual.take();
        task.action = Some(action);
        task.context = Some(context);
        task.state = Some(state);
        task.home = Some(Arc::clone(self));
        task
    }

    pub fn action_pool(&self) -> &ObjectPool<Box<ActionTask>> {
        &self.actions
    }

    pub fn state_action_pool(&self) -> &ObjectPool<Box<StateActionTask>> {
        &self.stateful
    }

    pub fn context_action_pool(&self) -> &ObjectPool<Box<ContextActionTask>> {
        &self.contextual
    }
}

impl fmt::Debug for TaskPools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPools")
            .field("actions", &self.actions)
            .field("stateful", &self.stateful)
            .field("contextual", &self.contextual)
            .finish()
    }
}

/// 有返回值的任务，结果写入 [`Promise`]。
pub struct FuncTask<T, F> {
    func: F,
    promise: Promise<T>,
    token: Option<CancellationToken>,
}

impl<T, F> FuncTask<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> core::result::Result<T, TaskError> + Send + 'static,
{
    pub fn new(func: F, promise: Promise<T>, token: Option<CancellationToken>) -> Self {
        Self {
            func,
            promise,
            token,
        }
    }
}

impl<T, F> Runnable for FuncTask<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> core::result::Result<T, TaskError> + Send + 'static,
{
    fn run(self: Box<Self>) {
        let FuncTask {
            func,
            promise,
            token,
        } = *self;
        if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            promise.try_cancel();
            return;
        }
        if promise.is_done() {
            return;
        }
        let outcome = match catch_unwind(AssertUnwindSafe(func)) {
            Ok(outcome) => outcome,
            Err(payload) => Err(TaskError::from_panic(payload)),
        };
        promise.try_resolve(outcome);
    }

    fn reject(self: Box<Self>) {
        self.promise.try_fail(TaskError::ExecutorTerminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bump(state: TaskState) {
        if let Some(counter) = state.downcast_ref::<AtomicUsize>() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bump_by_context(context: TaskState, state: TaskState) {
        let step = context.downcast_ref::<usize>().copied().unwrap_or(0);
        if let Some(counter) = state.downcast_ref::<AtomicUsize>() {
            counter.fetch_add(step, Ordering::SeqCst);
        }
    }

    #[test]
    fn action_wrappers_return_to_their_pool() {
        let pools = TaskPools::new(4).expect("容量合法");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            pools.action(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .run();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(pools.action_pool().len(), 1);
        assert_eq!(pools.action_pool().stats().created, 1);
        assert_eq!(pools.action_pool().stats().reused, 2);
    }

    #[test]
    fn state_variants_use_separate_pools() {
        let pools = TaskPools::new(4).expect("容量合法");
        let counter: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        pools.state_action(bump, counter.clone()).run();
        pools
            .context_action(bump_by_context, Arc::new(5usize), counter.clone())
            .run();
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert_eq!(pools.state_action_pool().len(), 1);
        assert_eq!(pools.context_action_pool().len(), 1);
        assert!(pools.action_pool().is_empty());
    }

    #[test]
    fn recycled_wrappers_drop_their_state() {
        let pools = TaskPools::new(2).expect("容量合法");
        let state: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        pools.state_action(bump, state.clone()).run();
        assert_eq!(Arc::strong_count(&state), 1);
        let pooled = pools.stateful.take();
        assert!(pooled.action.is_none());
        assert!(pooled.state.is_none());
        assert!(pooled.home.is_none());
    }

    #[test]
    fn func_task_reports_panics_as_faults() {
        let (promise, completion) = Promise::<u32>::pair();
        let task = FuncTask::new(|| -> core::result::Result<u32, TaskError> { panic!("boom") }, promise, None);
        Box::new(task).run();
        assert!(matches!(completion.error(), Some(TaskError::Panicked(message)) if message == "boom"));
    }

    #[test]
    fn cancelled_token_skips_the_body() {
        let (promise, completion) = Promise::<u32>::pair();
        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&ran);
        let task = FuncTask::new(
            move || {
                observed.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
            promise,
            Some(token),
        );
        Box::new(task).run();
        assert!(completion.is_cancelled());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
