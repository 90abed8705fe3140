//! 事件循环执行器及其支撑原语。
//!
//! - [`ExecutorCore`]：即时队列、定时堆与任务池组成的排空引擎；
//! - [`SingleThreadEventExecutor`]：由专属线程驱动的执行器；
//! - [`ScheduledHandle`] / [`ReusableScheduledTask`]：定时任务与其原子状态机；
//! - [`TaskInbox`]：可关闭的任务收件箱，终止时残留任务一律被拒绝；
//! - [`Promise`] / [`Completion`]：跨线程交付结果的一次性句柄。
mod cancellation;
mod engine;
mod executor;
mod inbox;
mod promise;
mod reusable;
mod scheduled;
mod single_thread;
mod task;

pub use cancellation::CancellationToken;
pub use engine::{ExecutorCore, PassOutcome};
pub use executor::{EventExecutor, ExecutorExt};
pub use inbox::TaskInbox;
pub use promise::{Completion, CompletionStatus, Promise};
pub use reusable::ReusableScheduledTask;
pub use scheduled::{ScheduledHandle, ScheduledState, StateCell};
pub use single_thread::SingleThreadEventExecutor;
pub use task::{ContextAction, Runnable, StateAction, TaskPools, TaskState};
