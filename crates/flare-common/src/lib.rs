#![deny(unsafe_code)]

//! `flare-common` 汇集网络运行时各层共享的基础设施。
//!
//! # 模块定位（Why）
//! - 传输层、缓冲层都依赖同一套时间、引用计数、池化与执行器语义，
//!   把它们收敛到独立 crate，可避免上层在各自实现中出现细微分歧；
//! - 执行器同时服务线程驱动与测试同步驱动两种模式，因此排空语义由 [`concurrency::ExecutorCore`]
//!   统一承载，驱动方式只决定何时调用排空。
//!
//! # 模块概览（How）
//! - [`time`]：单调时钟与可手动推进的测试时钟；
//! - [`refcount`]：CAS 驱动的引用计数契约；
//! - [`pool`]：基于无锁有界队列的对象池；
//! - [`concurrency`]：事件执行器、定时任务状态机与完成句柄；
//! - [`logging`]：分级日志能力，默认桥接 `tracing`；
//! - [`config`]：执行器配置；
//! - [`error`]：稳定错误码与错误类型。
pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod refcount;
pub mod time;

pub use error::{CommonError, Result, TaskError};
