#![deny(unsafe_code)]

//! `flare-buffer` 提供引用计数、可池化的字节缓冲。
//!
//! # 模块定位（Why）
//! - 入站读事件与出站写请求都以 [`ByteBuf`] 承载数据，存储在最后一次 `release` 时归还
//!   [`PooledByteBufAllocator`] 的有界空闲列表；
//! - 计数语义直接复用 `flare_common::refcount`，与地址信封、数据报等资源保持一致。
//!
//! # 设计概要（How）
//! - `allocator`：基于 `flare_common::pool::ObjectPool` 的存储复用；
//! - `byte_buf`：共享存储 + 原子计数 + 每句柄读指针与窗口（切片视图）；
//! - `composite`：零复制拼接多个缓冲，释放时级联释放组件；
//! - `config`：可从 TOML 加载的池配置。
mod allocator;
mod byte_buf;
mod composite;
mod config;

pub use allocator::{BufferRecycler, PooledByteBufAllocator};
pub use byte_buf::ByteBuf;
pub use composite::CompositeByteBuf;
pub use config::{BufferPoolSettings, DEFAULT_INITIAL_BUFFER_CAPACITY};
