use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use super::engine::ExecutorCore;
use super::executor::EventExecutor;
use super::promise::{Completion, Promise};
use crate::config::ExecutorSettings;
use crate::error::{CommonError, Result};
use crate::time::{MonotonicTicks, TickSource};

/// 由一个专属工作线程驱动的事件执行器。
///
/// # 逻辑（How）
/// - 工作线程启动后先安装唤醒回调（`Thread::unpark`），随后循环执行排空；
/// - 队列为空时按最近的定时截止时间 `park_timeout`，没有定时条目时无限期 `park`；
///   提交方入队后调用 `unpark`，`park` 的令牌语义保证不会丢失唤醒；
/// - 关闭开始后继续排空，直到即时队列为空，再终止：取消剩余定时条目、拒绝迟到的提交，
///   最后完成终止句柄。
///
/// # 契约（What）
/// - `Drop` 时若尚未关闭会自动关闭并等待工作线程退出（在工作线程自身上 Drop 时不等待）。
pub struct SingleThreadEventExecutor {
    core: Arc<ExecutorCore>,
    worker: spin::Mutex<Option<JoinHandle<()>>>,
    worker_id: OnceLock<ThreadId>,
    termination: spin::Mutex<Option<Completion<()>>>,
}

impl SingleThreadEventExecutor {
    pub fn new(settings: ExecutorSettings) -> Result<Arc<Self>> {
        Self::with_ticks(settings, Arc::new(MonotonicTicks))
    }

    pub fn with_ticks(settings: ExecutorSettings, ticks: Arc<dyn TickSource>) -> Result<Arc<Self>> {
        let thread_name = settings.thread_name().to_owned();
        let core = ExecutorCore::with_ticks(settings, ticks)?;
        let worker_core = Arc::clone(&core);
        let (terminated, termination) = Promise::pair();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_worker(worker_core, terminated))
            .map_err(|error| CommonError::Config(format!("failed to spawn event loop thread: {error}")))?;
        let worker_id = OnceLock::new();
        let _ = worker_id.set(handle.thread().id());
        Ok(Arc::new(Self {
            core,
            worker: spin::Mutex::new(Some(handle)),
            worker_id,
            termination: spin::Mutex::new(Some(termination)),
        }))
    }

    /// 取走终止句柄：工作线程完成终止后该句柄变为 Completed。只能取走一次。
    pub fn termination(&self) -> Option<Completion<()>> {
        self.termination.lock().take()
    }

    /// 阻塞等待工作线程退出。需先调用 [`EventExecutor::shutdown_gracefully`]。
    pub fn await_termination(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            self.core.logger().error("event loop worker exited with a panic");
        }
    }
}

fn run_worker(core: Arc<ExecutorCore>, terminated: Promise<()>) {
    let current = thread::current();
    core.set_notifier(Arc::new(move || current.unpark()));
    loop {
        core.run_pass();
        if core.has_pending_tasks() {
            continue;
        }
        if core.is_shutting_down() {
            core.terminate();
            terminated.try_complete(());
            break;
        }
        match core.next_scheduled_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(core.now());
                if !wait.is_zero() {
                    thread::park_timeout(wait);
                }
            }
            None => thread::park(),
        }
    }
}

impl EventExecutor for SingleThreadEventExecutor {
    fn core(&self) -> &Arc<ExecutorCore> {
        &self.core
    }

    fn in_event_loop(&self) -> bool {
        self.worker_id.get() == Some(&thread::current().id())
    }

    fn shutdown_gracefully(&self) {
        self.core.begin_shutdown();
    }
}

impl Drop for SingleThreadEventExecutor {
    fn drop(&mut self) {
        self.core.begin_shutdown();
        if !self.in_event_loop() {
            self.await_termination();
        }
    }
}

impl fmt::Debug for SingleThreadEventExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleThreadEventExecutor")
            .field("core", &self.core)
            .finish()
    }
}
