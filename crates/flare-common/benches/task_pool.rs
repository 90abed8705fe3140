use criterion::{Criterion, black_box};
use flare_common::concurrency::ExecutorCore;
use flare_common::config::ExecutorSettings;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{env, time::Duration};

/// 即时任务的投递与排空成本。
///
/// # 设计背景（Why）
/// - `execute` 是事件循环最热的入口，包装对象池化与否直接决定分配器压力；
/// - 基准对比“无状态闭包”与“函数指针 + 共享状态”两种变体，便于发现池化回归。
fn bench_execute_and_drain(c: &mut Criterion) {
    let core = ExecutorCore::new(ExecutorSettings::default()).expect("默认配置合法");
    let counter = Arc::new(AtomicUsize::new(0));

    c.bench_function("execute_closure_x1024", |b| {
        b.iter(|| {
            for _ in 0..1024 {
                let counter = Arc::clone(&counter);
                core.execute(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
            black_box(core.run_pass())
        });
    });

    fn bump(state: flare_common::concurrency::TaskState) {
        if let Some(counter) = state.downcast_ref::<AtomicUsize>() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    c.bench_function("execute_with_state_x1024", |b| {
        b.iter(|| {
            for _ in 0..1024 {
                core.execute_with_state(bump, counter.clone());
            }
            black_box(core.run_pass())
        });
    });
}

fn main() {
    let quick_mode = env::args().skip(1).any(|arg| arg == "--quick");

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_execute_and_drain(&mut criterion);
    criterion.final_summary();
}
