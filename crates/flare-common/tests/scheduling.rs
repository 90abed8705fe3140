//! 定时调度与执行器的端到端性质。
//!
//! - 不同截止时间的任务按截止时间升序执行，与提交顺序无关；
//! - 周期任务的重排：固定速率基于上一次截止时间，固定延迟基于完成时刻；
//! - 关闭开始后周期任务不再重排，句柄完成；
//! - 取消与执行竞争时恰好一方获胜；
//! - 可复用任务只能在上一轮结束后重置。
#![cfg(not(any(loom, flare_loom)))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use flare_common::concurrency::{
    CompletionStatus, EventExecutor, ExecutorCore, ExecutorExt, ReusableScheduledTask, ScheduledState,
    SingleThreadEventExecutor,
};
use flare_common::config::ExecutorSettings;
use flare_common::pool::{DEFAULT_POOL_CAPACITY, ObjectPool, Recycle};
use flare_common::time::{ManualTicks, Ticks};
use futures::executor::block_on;
use proptest::prelude::*;

fn manual_core() -> (Arc<ExecutorCore>, ManualTicks) {
    let ticks = ManualTicks::new();
    let core = ExecutorCore::with_ticks(ExecutorSettings::default(), Arc::new(ticks.clone())).expect("默认配置合法");
    (core, ticks)
}

proptest! {
    #[test]
    fn distinct_deadlines_fire_in_ascending_order(
        delays in proptest::collection::hash_set(1u64..1_000, 1..24)
    ) {
        let (core, ticks) = manual_core();
        let fired = Arc::new(Mutex::new(Vec::new()));
        for delay in &delays {
            let fired = Arc::clone(&fired);
            let delay = *delay;
            core.schedule(move || fired.lock().expect("记录锁").push(delay), Duration::from_millis(delay));
        }
        core.run_pass();
        ticks.advance(Duration::from_secs(1));
        core.run_pass();

        let mut expected: Vec<u64> = delays.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(&*fired.lock().expect("记录锁"), &expected);
    }
}

#[test]
fn fixed_rate_rearms_from_the_previous_deadline() {
    let (core, ticks) = manual_core();
    let period = Duration::from_millis(10);
    let late_by = Duration::from_millis(3);
    let handle = core
        .schedule_at_fixed_rate(|| {}, period, period)
        .expect("周期合法");
    core.run_pass();
    assert_eq!(handle.deadline(), Ticks::ZERO + period);

    ticks.advance(period + late_by);
    core.run_pass();
    assert_eq!(handle.state(), ScheduledState::Armed);
    assert_eq!(handle.deadline(), Ticks::ZERO + period + period);
}

#[test]
fn fixed_delay_rearms_from_the_completion_time() {
    let (core, ticks) = manual_core();
    let delay = Duration::from_millis(10);
    let work = Duration::from_millis(4);
    let clock = ticks.clone();
    let handle = core
        .schedule_with_fixed_delay(
            move || {
                clock.advance(work);
            },
            delay,
            delay,
        )
        .expect("周期合法");
    core.run_pass();

    ticks.advance(delay);
    core.run_pass();
    assert_eq!(handle.deadline(), Ticks::ZERO + delay + work + delay);
    assert!(!handle.is_done());
}

#[test]
fn periodic_handle_completes_once_shutdown_begins() {
    let (core, ticks) = manual_core();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let handle = core
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
        .expect("周期合法");
    core.run_pass();
    ticks.advance(Duration::from_millis(1));
    core.run_pass();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    core.begin_shutdown();
    ticks.advance(Duration::from_millis(1));
    core.run_pass();
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(handle.status(), CompletionStatus::Completed);
    assert_eq!(handle.state(), ScheduledState::Retired);
    assert_eq!(core.scheduled_len(), 0);
}

#[test]
fn periodic_failure_faults_the_handle_and_stops_rearming() {
    let (core, ticks) = manual_core();
    let handle = core
        .schedule_at_fixed_rate(|| panic!("tick failed"), Duration::ZERO, Duration::from_millis(1))
        .expect("周期合法");
    core.run_pass();
    core.run_pass();
    assert_eq!(handle.status(), CompletionStatus::Faulted);
    ticks.advance(Duration::from_millis(5));
    core.run_pass();
    assert_eq!(core.scheduled_len(), 0);
}

#[test]
fn cancel_and_run_race_has_exactly_one_winner() {
    for _ in 0..200 {
        let (core, ticks) = manual_core();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let handle = Arc::new(core.schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(1),
        ));
        core.run_pass();
        ticks.advance(Duration::from_millis(1));

        let barrier = Arc::new(Barrier::new(2));
        let canceller = {
            let handle = Arc::clone(&handle);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                handle.cancel()
            })
        };
        barrier.wait();
        core.run_pass();
        let cancelled = canceller.join().expect("取消线程不应 panic");
        core.run_pass();

        let executed = ran.load(Ordering::SeqCst);
        assert_eq!(usize::from(cancelled) + executed, 1);
        let expected = if cancelled {
            CompletionStatus::Cancelled
        } else {
            CompletionStatus::Completed
        };
        assert_eq!(handle.status(), expected);
    }
}

#[test]
#[should_panic(expected = "previous cycle")]
fn reusable_task_cannot_be_reset_while_armed() {
    let (core, _) = manual_core();
    let task = ReusableScheduledTask::new(|| {});
    let _first = core.schedule_reusable(&task, Duration::from_millis(5));
    let _second = core.schedule_reusable(&task, Duration::from_millis(5));
}

#[test]
fn reusable_task_can_be_reset_after_each_cycle() {
    let (core, ticks) = manual_core();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let task = ReusableScheduledTask::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let first = core.schedule_reusable(&task, Duration::from_millis(5));
    core.run_pass();
    ticks.advance(Duration::from_millis(5));
    core.run_pass();
    assert!(first.is_completed());
    assert_eq!(task.state(), ScheduledState::Retired);

    let second = core.schedule_reusable(&task, Duration::from_millis(5));
    core.run_pass();
    assert!(task.cancel());
    assert!(second.is_cancelled());

    let third = core.schedule_reusable(&task, Duration::from_millis(5));
    core.run_pass();
    ticks.advance(Duration::from_millis(5));
    core.run_pass();
    assert!(third.is_completed());
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[derive(Default)]
struct Scratch(Vec<u8>);

impl Recycle for Scratch {
    fn recycle(&mut self) {
        self.0.clear();
    }
}

proptest! {
    #[test]
    fn pool_never_holds_more_than_its_capacity(borrowed in 0usize..300) {
        let pool = ObjectPool::with_default_capacity(Scratch::default);
        let taken: Vec<Scratch> = (0..borrowed).map(|_| pool.take()).collect();
        for scratch in taken {
            pool.free(scratch);
        }
        prop_assert_eq!(pool.len(), borrowed.min(DEFAULT_POOL_CAPACITY));
        prop_assert_eq!(pool.stats().discarded as usize, borrowed.saturating_sub(DEFAULT_POOL_CAPACITY));
    }
}

#[test]
fn threaded_executor_runs_submissions_and_schedules() {
    let executor = SingleThreadEventExecutor::new(ExecutorSettings::default()).expect("执行器应成功启动");
    let sum = block_on(executor.submit(|| (1..=10).sum::<u32>())).expect("任务应成功");
    assert_eq!(sum, 55);

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let periodic = executor
        .schedule_with_fixed_delay(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            Duration::from_millis(2),
        )
        .expect("周期合法");
    while fired.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    while !periodic.cancel() {
        thread::yield_now();
    }
    assert!(matches!(block_on(periodic), Err(flare_common::TaskError::Cancelled)));
    executor.shutdown_gracefully();
    executor.await_termination();
    assert!(executor.is_terminated());
}
