//! Channel 抽象。
//!
//! # 设计背景（Why）
//! - 通道把“一个连接（或一个数据报端点）”的生命周期、流水线与事件循环绑定在一起；
//!   生命周期编排与流水线调度与具体传输无关，写在 [`AbstractChannel`] 中，
//!   具体传输只实现 [`Transport`] 的 `do_*` 原语。
//!
//! # 逻辑（How）
//! - 面向用户的出站操作（`write`/`close` 等）从流水线尾部进入，经过出站 handler 后到达头部；
//! - 头部调用 [`ChannelOps`]，由 [`AbstractChannel`] 维护状态并委托给传输原语。
//!
//! # 契约（What）
//! - 状态机：`Open` →（注册成功）`Active` → `Closed`，`Closed` 为终态；
//! - 一个通道在整个生命周期内只拥有一条流水线，只绑定一个事件循环。
use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flare_common::concurrency::{Completion, EventExecutor, Promise};

use crate::address::Endpoint;
use crate::pipeline::{ChannelPipeline, PipelineMessage};

mod abstract_channel;
mod outbound;
mod transport;

pub use abstract_channel::AbstractChannel;
pub use outbound::OutboundBuffer;
pub use transport::Transport;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的通道标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// 通道生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelState {
    Open = 0,
    Active = 1,
    Closed = 2,
}

impl ChannelState {
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// 传输能力描述。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMetadata {
    has_disconnect: bool,
}

impl ChannelMetadata {
    /// `has_disconnect = false` 的传输把 `disconnect` 视为 `close`。
    pub const fn new(has_disconnect: bool) -> Self {
        Self { has_disconnect }
    }

    pub const fn has_disconnect(&self) -> bool {
        self.has_disconnect
    }
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self::new(false)
    }
}

/// 流水线头部调用的通道操作。
///
/// # 契约（What）
/// - 只能在通道绑定的事件循环上调用；流水线保证这一点；
/// - 携带 [`Promise`] 的操作必须兑现该 promise。
pub trait ChannelOps: Send + Sync {
    fn bind(&self, local: Endpoint, promise: Promise<()>);

    fn connect(&self, remote: Endpoint, local: Option<Endpoint>, promise: Promise<()>);

    fn disconnect(&self, promise: Promise<()>);

    fn close(&self, promise: Promise<()>);

    fn begin_read(&self);

    fn write(&self, msg: PipelineMessage, promise: Promise<()>);

    fn flush(&self);
}

/// 通道。
pub trait Channel: Send + Sync + 'static {
    fn id(&self) -> ChannelId;

    fn state(&self) -> ChannelState;

    fn metadata(&self) -> ChannelMetadata;

    fn pipeline(&self) -> &Arc<ChannelPipeline>;

    /// 绑定的事件循环；尚未注册时为 `None`。
    fn event_loop(&self) -> Option<Arc<dyn EventExecutor>>;

    fn local_address(&self) -> Option<Endpoint>;

    fn remote_address(&self) -> Option<Endpoint>;

    fn ops(&self) -> &dyn ChannelOps;

    /// 注册到事件循环；成功后状态变为 `Active`，并依次触发 registered 与 active 事件。
    fn register(&self, event_loop: Arc<dyn EventExecutor>) -> Completion<()>;

    fn is_registered(&self) -> bool {
        self.event_loop().is_some()
    }

    fn is_open(&self) -> bool {
        self.state() != ChannelState::Closed
    }

    fn is_active(&self) -> bool {
        self.state() == ChannelState::Active
    }

    fn bind(&self, local: Endpoint) -> Completion<()> {
        self.pipeline().bind(local)
    }

    fn connect(&self, remote: Endpoint, local: Option<Endpoint>) -> Completion<()> {
        self.pipeline().connect(remote, local)
    }

    fn disconnect(&self) -> Completion<()> {
        self.pipeline().disconnect()
    }

    fn close(&self) -> Completion<()> {
        self.pipeline().close()
    }

    fn read(&self) {
        self.pipeline().begin_read();
    }

    fn write(&self, msg: PipelineMessage) -> Completion<()> {
        self.pipeline().write(msg)
    }

    fn flush(&self) {
        self.pipeline().flush();
    }

    fn write_and_flush(&self, msg: PipelineMessage) -> Completion<()> {
        self.pipeline().write_and_flush(msg)
    }
}
