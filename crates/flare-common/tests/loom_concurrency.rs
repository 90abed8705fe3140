//! Loom 并发模型：穷举线程交错，验证引用计数、定时状态机与任务收件箱的线性化。
//!
//! 仅在 `RUSTFLAGS="--cfg flare_loom" cargo test --features loom-model` 下编译。
#![cfg(any(loom, flare_loom))]

use flare_common::concurrency::{ScheduledState, StateCell, TaskInbox};
use flare_common::refcount::RefCount;
use loom::sync::Arc;
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::thread;

#[test]
fn concurrent_release_reaches_zero_exactly_once() {
    loom::model(|| {
        let count = Arc::new(RefCount::new());
        count.retain().expect("retain 应成功");
        let other = Arc::clone(&count);
        let worker = thread::spawn(move || other.release().expect("释放应成功"));
        let here = count.release().expect("释放应成功");
        let there = worker.join().expect("线程不应 panic");
        assert!(here ^ there, "恰好一个释放者观察到归零");
        assert_eq!(count.get(), 0);
    });
}

#[test]
fn retain_racing_final_release_never_resurrects() {
    loom::model(|| {
        let count = Arc::new(RefCount::new());
        let other = Arc::clone(&count);
        let worker = thread::spawn(move || other.retain().is_ok());
        let released = count.release().expect("释放应成功");
        let retained = worker.join().expect("线程不应 panic");
        if retained {
            assert!(!released);
            assert_eq!(count.get(), 1);
        } else {
            assert!(released);
            assert_eq!(count.get(), 0);
        }
    });
}

#[test]
fn cancel_and_claim_have_one_winner() {
    loom::model(|| {
        let cell = Arc::new(StateCell::new(ScheduledState::Armed));
        let other = Arc::clone(&cell);
        let canceller = thread::spawn(move || other.try_cancel());
        let claimed = cell.try_claim();
        let cancelled = canceller.join().expect("线程不应 panic");
        assert!(claimed ^ cancelled);
        let expected = if claimed {
            ScheduledState::Running
        } else {
            ScheduledState::CancellationRequested
        };
        assert_eq!(cell.load(), expected);
    });
}

#[test]
fn a_submission_racing_close_is_rejected_exactly_once() {
    loom::model(|| {
        let inbox = Arc::new(TaskInbox::new());
        let rejected = Arc::new(AtomicUsize::new(0));
        let producer = {
            let inbox = Arc::clone(&inbox);
            let rejected = Arc::clone(&rejected);
            thread::spawn(move || {
                inbox.push(7u32, |_| {
                    rejected.fetch_add(1, Ordering::SeqCst);
                });
            })
        };
        inbox.close(|_| {
            rejected.fetch_add(1, Ordering::SeqCst);
        });
        producer.join().expect("线程不应 panic");
        assert_eq!(rejected.load(Ordering::SeqCst), 1, "关闭后的任务必须恰好被拒绝一次");
        assert!(inbox.is_empty());
    });
}
