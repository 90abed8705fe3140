//! 一次性完成句柄。
//!
//! # 设计背景（Why）
//! - 提交到事件循环的工作与发起方处在不同线程，结果需要一个“只能写一次”的槽位来交接；
//! - 取消路径与执行路径可能同时尝试写入，槽位必须保证先到者生效、后到者得到失败反馈，
//!   而不是 panic 或覆盖结果。
//!
//! # 逻辑（How）
//! - [`Promise`] 是写端，可克隆，供执行路径与取消路径共享；
//! - [`Completion`] 是唯一的读端，实现 [`Future`]，也可以通过 [`Completion::status`] 非阻塞地查询；
//! - 槽位由 `spin::Mutex` 保护，临界区只做字段交换，唤醒在锁外进行。
//!
//! # 契约（What）
//! - 状态只会从 `Pending` 迁移一次到 `Completed`/`Cancelled`/`Faulted`；
//! - `try_*` 写入失败时返回 `false`，不改变已有结果；
//! - `Completion` 在返回 `Ready` 之后再次被轮询会 panic，符合 `Future` 的通用约定。
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::sync::Arc;

use crate::error::TaskError;

/// 完成句柄的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    Pending,
    Completed,
    Cancelled,
    Faulted,
}

impl CompletionStatus {
    /// 是否已经离开 `Pending`。
    pub const fn is_done(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

struct Slot<T> {
    status: CompletionStatus,
    outcome: Option<Result<T, TaskError>>,
    waker: Option<Waker>,
    taken: bool,
}

struct Shared<T> {
    slot: spin::Mutex<Slot<T>>,
}

impl<T> Shared<T> {
    fn resolve(&self, outcome: Result<T, TaskError>) -> bool {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.status.is_done() {
                return false;
            }
            slot.status = match &outcome {
                Ok(_) => CompletionStatus::Completed,
                Err(TaskError::Cancelled) => CompletionStatus::Cancelled,
                Err(_) => CompletionStatus::Faulted,
            };
            slot.outcome = Some(outcome);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    fn status(&self) -> CompletionStatus {
        self.slot.lock().status
    }
}

/// 完成句柄的写端。
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    /// 创建一对写端与读端。
    pub fn pair() -> (Promise<T>, Completion<T>) {
        let shared = Arc::new(Shared {
            slot: spin::Mutex::new(Slot {
                status: CompletionStatus::Pending,
                outcome: None,
                waker: None,
                taken: false,
            }),
        });
        (
            Promise {
                shared: Arc::clone(&shared),
            },
            Completion { shared },
        )
    }

    pub fn try_complete(&self, value: T) -> bool {
        self.shared.resolve(Ok(value))
    }

    pub fn try_fail(&self, error: TaskError) -> bool {
        self.shared.resolve(Err(error))
    }

    pub fn try_cancel(&self) -> bool {
        self.shared.resolve(Err(TaskError::Cancelled))
    }

    /// 以 `Result` 一次性写入。
    pub fn try_resolve(&self, outcome: Result<T, TaskError>) -> bool {
        self.shared.resolve(outcome)
    }

    pub fn status(&self) -> CompletionStatus {
        self.shared.status()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("status", &self.status()).finish()
    }
}

/// 完成句柄的读端。
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    /// 直接构造一个已完成的句柄。
    pub fn ready(value: T) -> Self {
        let (promise, completion) = Promise::pair();
        promise.try_complete(value);
        completion
    }

    /// 直接构造一个已失败的句柄。
    pub fn failed(error: TaskError) -> Self {
        let (promise, completion) = Promise::pair();
        promise.try_fail(error);
        completion
    }

    pub fn status(&self) -> CompletionStatus {
        self.shared.status()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    pub fn is_completed(&self) -> bool {
        self.status() == CompletionStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == CompletionStatus::Cancelled
    }

    pub fn is_faulted(&self) -> bool {
        self.status() == CompletionStatus::Faulted
    }

    /// 非阻塞地取出结果；尚未完成或已被取走时返回 `None`。
    pub fn try_take(&mut self) -> Option<Result<T, TaskError>> {
        let mut slot = self.shared.slot.lock();
        let outcome = slot.outcome.take();
        if outcome.is_some() {
            slot.taken = true;
        }
        outcome
    }

    /// 查看故障原因而不取走结果。
    pub fn error(&self) -> Option<TaskError> {
        match &self.shared.slot.lock().outcome {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if let Some(outcome) = slot.outcome.take() {
            slot.taken = true;
            return Poll::Ready(outcome);
        }
        assert!(!slot.taken, "Completion polled after its result was taken");
        match &slot.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("status", &self.status()).finish()
    }
}
