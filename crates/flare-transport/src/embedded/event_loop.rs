use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use flare_common::concurrency::{EventExecutor, ExecutorCore};
use flare_common::config::ExecutorSettings;
use flare_common::time::{ManualTicks, Ticks};

use crate::error::Result;

/// 由调用方同步驱动的事件循环。
///
/// # 设计背景（Why）
/// - 测试需要精确控制“任务何时运行、时间走到哪里”，后台线程与真实时钟都会引入不确定性；
///   这里复用 [`ExecutorCore`] 的排空逻辑，只把驱动权交给调用方，时间由 [`ManualTicks`] 推进。
///
/// # 契约（What）
/// - `in_event_loop` 恒为 `true`：驱动它的线程就是它的工作者；
/// - [`run_tasks`](Self::run_tasks) 反复排空即时队列，直到队列为空（包括排空过程中新提交的任务）；
/// - [`run_scheduled_tasks`](Self::run_scheduled_tasks) 只执行按手动时钟已到期的定时任务。
pub struct EmbeddedEventLoop {
    core: Arc<ExecutorCore>,
    ticks: ManualTicks,
}

impl EmbeddedEventLoop {
    pub fn new() -> Result<Arc<Self>> {
        Self::with_settings(ExecutorSettings::default())
    }

    pub fn with_settings(settings: ExecutorSettings) -> Result<Arc<Self>> {
        let ticks = ManualTicks::new();
        let core = ExecutorCore::with_ticks(settings, Arc::new(ticks.clone()))?;
        Ok(Arc::new(Self { core, ticks }))
    }

    /// 推进手动时钟，返回推进后的时间点。
    pub fn advance_time(&self, delta: Duration) -> Ticks {
        self.ticks.advance(delta)
    }

    pub fn ticks(&self) -> &ManualTicks {
        &self.ticks
    }

    /// 执行即时任务直到队列为空，返回执行的任务数。
    pub fn run_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            ran += self.core.run_immediate_tasks();
            if !self.core.has_pending_tasks() {
                return ran;
            }
        }
    }

    /// 执行已到期的定时任务，返回触发次数。
    pub fn run_scheduled_tasks(&self) -> usize {
        self.core.run_scheduled_tasks()
    }

    /// 下一个仍有效的定时截止时间。
    pub fn next_scheduled_task(&self) -> Option<Ticks> {
        self.core.next_scheduled_deadline()
    }

    pub fn cancel_scheduled_tasks(&self) {
        self.core.cancel_scheduled_tasks();
    }
}

impl EventExecutor for EmbeddedEventLoop {
    fn core(&self) -> &Arc<ExecutorCore> {
        &self.core
    }

    fn in_event_loop(&self) -> bool {
        true
    }

    fn shutdown_gracefully(&self) {
        self.core.begin_shutdown();
    }
}

impl fmt::Debug for EmbeddedEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedEventLoop")
            .field("now", &self.core.now())
            .field("pending", &self.core.pending_tasks())
            .finish()
    }
}
