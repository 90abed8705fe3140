//! 可关闭的多生产者任务收件箱。
//!
//! # 设计背景（Why）
//! - 任意线程都可以提交任务，而工作者在终止时要把残留任务全部拒绝；
//!   “先检查是否已关闭、再入队”两步之间存在窗口：关闭方恰好在窗口中完成排空，
//!   入队的任务就既不会运行也不会被拒绝，其完成句柄永远悬挂。
//!
//! # 逻辑（How）
//! - 生产者：已关闭则直接拒绝；否则入队，经过 `SeqCst` 栅栏后再读一次关闭标志，
//!   若此时已关闭，则自己把队列排空并拒绝；
//! - 关闭方：写入关闭标志，经过 `SeqCst` 栅栏后排空并拒绝；
//! - 两侧的栅栏保证“生产者看到关闭”与“关闭方看到该任务”至少一个成立，
//!   `pop` 的排他性保证每个任务至多被一方弹出。
//!
//! # 契约（What）
//! - 关闭之后，每个入队过的任务恰好被弹出一次：要么被消费者运行，要么被某一方拒绝。
#[cfg(not(any(loom, flare_loom)))]
use std::sync::atomic::{AtomicBool, Ordering, fence};

#[cfg(any(loom, flare_loom))]
use loom::sync::atomic::{AtomicBool, Ordering, fence};

#[cfg(not(any(loom, flare_loom)))]
type Queue<T> = crossbeam_queue::SegQueue<T>;

#[cfg(any(loom, flare_loom))]
struct Queue<T>(loom::sync::Mutex<std::collections::VecDeque<T>>);

#[cfg(any(loom, flare_loom))]
impl<T> Queue<T> {
    fn new() -> Self {
        Self(loom::sync::Mutex::new(std::collections::VecDeque::new()))
    }

    fn push(&self, item: T) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push_back(item);
        }
    }

    fn pop(&self) -> Option<T> {
        self.0.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    fn len(&self) -> usize {
        self.0.lock().map(|queue| queue.len()).unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 关闭后不再接收任务、并保证残留任务被拒绝的收件箱。
pub struct TaskInbox<T> {
    queue: Queue<T>,
    closed: AtomicBool,
}

impl<T> TaskInbox<T> {
    pub fn new() -> Self {
        Self {
            queue: Queue::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// 投递任务；返回 `false` 表示收件箱已关闭、任务已交给 `reject`。
    ///
    /// 返回 `true` 只说明任务曾经入队：若关闭与入队交错，它仍可能随后经 `reject` 被拒绝。
    pub fn push(&self, item: T, mut reject: impl FnMut(T)) -> bool {
        if self.is_closed() {
            reject(item);
            return false;
        }
        self.queue.push(item);
        fence(Ordering::SeqCst);
        if self.closed.load(Ordering::Relaxed) {
            self.drain(&mut reject);
        }
        true
    }

    /// 关闭收件箱并拒绝全部残留任务，可重复调用。
    pub fn close(&self, mut reject: impl FnMut(T)) {
        self.closed.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        self.drain(&mut reject);
    }

    fn drain(&self, reject: &mut impl FnMut(T)) {
        while let Some(item) = self.queue.pop() {
            reject(item);
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Default for TaskInbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
