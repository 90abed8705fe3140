#![deny(unsafe_code)]

//! `flare-transport` 定义通道、流水线与地址信封。
//!
//! # 模块定位（Why）
//! - 协议 handler 只面向 [`pipeline::Context`] 编程，不感知底层传输；
//!   通道生命周期与流水线调度在 [`channel::AbstractChannel`] 中统一实现；
//! - [`embedded::EmbeddedChannel`] 让 handler 链在没有真实 I/O 的情况下被同步、确定地驱动。
//!
//! # 模块概览（How）
//! - [`channel`]：通道状态机、传输原语与出站缓冲；
//! - [`pipeline`]：handler 契约、上下文转发与链尾策略；
//! - [`embedded`]：嵌入式事件循环与回环通道；
//! - [`envelope`] / [`socket`]：带地址的消息与数据报；
//! - [`address`] / [`resolver`]：端点与名称解析；
//! - [`config`] / [`error`]：通道配置与稳定错误码。
pub mod address;
pub mod channel;
pub mod config;
pub mod embedded;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod socket;

pub use address::Endpoint;
pub use channel::{AbstractChannel, Channel, ChannelId, ChannelMetadata, ChannelOps, ChannelState, Transport};
pub use config::ChannelSettings;
pub use embedded::{EmbeddedChannel, EmbeddedEventLoop};
pub use envelope::{AddressedEnvelope, EnvelopePool};
pub use error::{ChannelError, Result};
pub use resolver::{DefaultNameResolver, NameResolver};
pub use socket::DatagramPacket;
