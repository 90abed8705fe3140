//! Handler 契约。
//!
//! # 设计背景（Why）
//! - 入站与出站是两条方向相反的链路，拆成两个 trait 后，单向 handler 不必为另一方向写空实现；
//! - 所有回调都提供“原样转发给下一个 handler”的默认实现，具体 handler 只覆写关心的事件。
//!
//! # 契约（What）
//! - 回调只会在通道绑定的事件循环工作者上被调用，handler 内部状态无需额外加锁即可按单线程推理，
//!   但类型本身仍需 `Send + Sync` 以便在快照之间共享；
//! - 出站回调携带的 [`Promise`] 必须被最终兑现（完成或失败），要么自己兑现，要么随事件转发；
//! - handler 在回调中 panic 时，流水线会捕获并把 [`ChannelError::HandlerPanicked`] 投递给
//!   同一 handler 的 `on_exception_caught`。
use std::sync::Arc;

use flare_common::concurrency::Promise;

use super::context::Context;
use super::message::{PipelineMessage, UserEvent};
use crate::address::Endpoint;
use crate::error::ChannelError;

/// 入站 handler：事件从头部流向尾部。
#[allow(unused_variables)]
pub trait InboundHandler: Send + Sync + 'static {
    /// handler 已加入流水线。
    fn on_handler_added(&self, ctx: &dyn Context) {}

    /// handler 已移出流水线。
    fn on_handler_removed(&self, ctx: &dyn Context) {}

    fn on_channel_registered(&self, ctx: &dyn Context) {
        ctx.fire_channel_registered();
    }

    fn on_channel_unregistered(&self, ctx: &dyn Context) {
        ctx.fire_channel_unregistered();
    }

    fn on_channel_active(&self, ctx: &dyn Context) {
        ctx.fire_channel_active();
    }

    fn on_channel_inactive(&self, ctx: &dyn Context) {
        ctx.fire_channel_inactive();
    }

    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.fire_read(msg);
    }

    fn on_read_complete(&self, ctx: &dyn Context) {
        ctx.fire_read_complete();
    }

    fn on_writability_changed(&self, ctx: &dyn Context, is_writable: bool) {
        ctx.fire_writability_changed(is_writable);
    }

    fn on_user_event(&self, ctx: &dyn Context, event: UserEvent) {
        ctx.fire_user_event(event);
    }

    fn on_exception_caught(&self, ctx: &dyn Context, error: ChannelError) {
        ctx.fire_exception_caught(error);
    }
}

/// 出站 handler：事件从尾部流向头部，最终由通道的传输原语执行。
pub trait OutboundHandler: Send + Sync + 'static {
    fn on_bind(&self, ctx: &dyn Context, local: Endpoint, promise: Promise<()>) {
        ctx.bind_with(local, promise);
    }

    fn on_connect(&self, ctx: &dyn Context, remote: Endpoint, local: Option<Endpoint>, promise: Promise<()>) {
        ctx.connect_with(remote, local, promise);
    }

    fn on_disconnect(&self, ctx: &dyn Context, promise: Promise<()>) {
        ctx.disconnect_with(promise);
    }

    fn on_close(&self, ctx: &dyn Context, promise: Promise<()>) {
        ctx.close_with(promise);
    }

    /// 请求通道开始读取。
    fn on_begin_read(&self, ctx: &dyn Context) {
        ctx.begin_read();
    }

    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage, promise: Promise<()>) {
        ctx.write_with(msg, promise);
    }

    fn on_flush(&self, ctx: &dyn Context) {
        ctx.flush();
    }
}

/// Handler 的主要方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerDirection {
    Inbound,
    Outbound,
    Duplex,
}

/// 流水线槽位中存放的统一封装。
///
/// # 契约（What）
/// - `direction()` 为 `Inbound`/`Duplex` 时 `clone_inbound()` 必须返回 `Some`，
///   为 `Outbound`/`Duplex` 时 `clone_outbound()` 必须返回 `Some`。
pub trait Handler: Send + Sync + 'static {
    fn direction(&self) -> HandlerDirection;

    fn clone_inbound(&self) -> Option<Arc<dyn InboundHandler>> {
        None
    }

    fn clone_outbound(&self) -> Option<Arc<dyn OutboundHandler>> {
        None
    }
}

pub fn handler_from_inbound(handler: Arc<dyn InboundHandler>) -> Arc<dyn Handler> {
    Arc::new(InboundHandlerSlot { inner: handler })
}

pub fn handler_from_outbound(handler: Arc<dyn OutboundHandler>) -> Arc<dyn Handler> {
    Arc::new(OutboundHandlerSlot { inner: handler })
}

/// 同时实现两个方向的 handler，两侧共享同一实例。
pub fn handler_from_duplex<H>(handler: Arc<H>) -> Arc<dyn Handler>
where
    H: InboundHandler + OutboundHandler,
{
    Arc::new(DuplexHandlerSlot {
        inbound: Arc::clone(&handler) as Arc<dyn InboundHandler>,
        outbound: handler,
    })
}

struct InboundHandlerSlot {
    inner: Arc<dyn InboundHandler>,
}

impl Handler for InboundHandlerSlot {
    fn direction(&self) -> HandlerDirection {
        HandlerDirection::Inbound
    }

    fn clone_inbound(&self) -> Option<Arc<dyn InboundHandler>> {
        Some(Arc::clone(&self.inner))
    }
}

struct OutboundHandlerSlot {
    inner: Arc<dyn OutboundHandler>,
}

impl Handler for OutboundHandlerSlot {
    fn direction(&self) -> HandlerDirection {
        HandlerDirection::Outbound
    }

    fn clone_outbound(&self) -> Option<Arc<dyn OutboundHandler>> {
        Some(Arc::clone(&self.inner))
    }
}

struct DuplexHandlerSlot {
    inbound: Arc<dyn InboundHandler>,
    outbound: Arc<dyn OutboundHandler>,
}

impl Handler for DuplexHandlerSlot {
    fn direction(&self) -> HandlerDirection {
        HandlerDirection::Duplex
    }

    fn clone_inbound(&self) -> Option<Arc<dyn InboundHandler>> {
        Some(Arc::clone(&self.inbound))
    }

    fn clone_outbound(&self) -> Option<Arc<dyn OutboundHandler>> {
        Some(Arc::clone(&self.outbound))
    }
}
