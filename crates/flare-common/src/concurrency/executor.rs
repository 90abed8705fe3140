use std::sync::Arc;
use std::time::Duration;

use super::cancellation::CancellationToken;
use super::engine::ExecutorCore;
use super::promise::Completion;
use super::reusable::ReusableScheduledTask;
use super::scheduled::ScheduledHandle;
use super::task::{ContextAction, StateAction, TaskState};
use crate::error::Result;
use crate::time::Ticks;

/// 事件执行器抽象。
///
/// # 设计背景（Why）
/// - Channel 只需要“把工作投递到绑定的循环上”这一能力，不关心循环由后台线程驱动还是由测试同步驱动；
/// - 两种驱动方式共享 [`ExecutorCore`]，trait 只暴露核心与生命周期控制，
///   具体的提交 API 由 [`ExecutorExt`] 以扩展方法提供，因此 `dyn EventExecutor` 同样可用。
///
/// # 契约（What）
/// - 提交操作可在任意线程并发调用；
/// - `shutdown_gracefully` 幂等，关闭开始后周期任务不再重排。
pub trait EventExecutor: Send + Sync + 'static {
    fn core(&self) -> &Arc<ExecutorCore>;

    /// 当前线程是否为该执行器的工作者。
    fn in_event_loop(&self) -> bool;

    /// 请求优雅关闭。
    fn shutdown_gracefully(&self);

    fn is_shutting_down(&self) -> bool {
        self.core().is_shutting_down()
    }

    fn is_terminated(&self) -> bool {
        self.core().is_terminated()
    }

    fn now(&self) -> Ticks {
        self.core().now()
    }
}

/// 面向任意 [`EventExecutor`]（包括 trait 对象）的提交 API。
pub trait ExecutorExt: EventExecutor {
    fn execute<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core().execute(action);
    }

    fn execute_with_state(&self, action: StateAction, state: TaskState) {
        self.core().execute_with_state(action, state);
    }

    fn execute_with_context(&self, action: ContextAction, context: TaskState, state: TaskState) {
        self.core().execute_with_context(action, context, state);
    }

    fn submit<T, F>(&self, func: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.core().submit(func)
    }

    fn try_submit<T, E, F>(&self, func: F) -> Completion<T>
    where
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce() -> core::result::Result<T, E> + Send + 'static,
    {
        self.core().try_submit(func)
    }

    fn submit_cancellable<T, F>(&self, func: F, token: CancellationToken) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.core().submit_cancellable(func, token)
    }

    fn schedule<F>(&self, action: F, delay: Duration) -> ScheduledHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.core().schedule(action, delay)
    }

    fn schedule_at_fixed_rate<F>(&self, action: F, initial_delay: Duration, period: Duration) -> Result<ScheduledHandle>
    where
        F: FnMut() + Send + 'static,
    {
        self.core().schedule_at_fixed_rate(action, initial_delay, period)
    }

    fn schedule_with_fixed_delay<F>(&self, action: F, initial_delay: Duration, delay: Duration) -> Result<ScheduledHandle>
    where
        F: FnMut() + Send + 'static,
    {
        self.core().schedule_with_fixed_delay(action, initial_delay, delay)
    }

    fn schedule_reusable(&self, task: &Arc<ReusableScheduledTask>, delay: Duration) -> Completion<()> {
        self.core().schedule_reusable(task, delay)
    }
}

impl<E: EventExecutor + ?Sized> ExecutorExt for E {}
