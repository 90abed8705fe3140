use flare_common::concurrency::Promise;

use super::context::Context;
use super::handler::{InboundHandler, OutboundHandler};
use super::message::{PipelineMessage, UserEvent};
use crate::address::Endpoint;
use crate::error::ChannelError;

/// 入站事件，按值沿链传递。
pub(crate) enum InboundEvent {
    Registered,
    Unregistered,
    Active,
    Inactive,
    Read(PipelineMessage),
    ReadComplete,
    WritabilityChanged(bool),
    User(UserEvent),
    Exception(ChannelError),
}

impl InboundEvent {
    pub(crate) fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    pub(crate) fn deliver(self, handler: &dyn InboundHandler, ctx: &dyn Context) {
        match self {
            Self::Registered => handler.on_channel_registered(ctx),
            Self::Unregistered => handler.on_channel_unregistered(ctx),
            Self::Active => handler.on_channel_active(ctx),
            Self::Inactive => handler.on_channel_inactive(ctx),
            Self::Read(msg) => handler.on_read(ctx, msg),
            Self::ReadComplete => handler.on_read_complete(ctx),
            Self::WritabilityChanged(writable) => handler.on_writability_changed(ctx, writable),
            Self::User(event) => handler.on_user_event(ctx, event),
            Self::Exception(error) => handler.on_exception_caught(ctx, error),
        }
    }

    /// 事件无法投递（循环已终止）时释放其持有的资源。
    pub(crate) fn abandon(self) {
        if let Self::Read(msg) = self {
            msg.safe_release();
        }
    }
}

/// 出站事件。
pub(crate) enum OutboundEvent {
    Bind(Endpoint, Promise<()>),
    Connect(Endpoint, Option<Endpoint>, Promise<()>),
    Disconnect(Promise<()>),
    Close(Promise<()>),
    BeginRead,
    Write(PipelineMessage, Promise<()>),
    Flush,
}

impl OutboundEvent {
    pub(crate) fn promise(&self) -> Option<&Promise<()>> {
        match self {
            Self::Bind(_, promise)
            | Self::Connect(_, _, promise)
            | Self::Disconnect(promise)
            | Self::Close(promise)
            | Self::Write(_, promise) => Some(promise),
            Self::BeginRead | Self::Flush => None,
        }
    }

    pub(crate) fn deliver(self, handler: &dyn OutboundHandler, ctx: &dyn Context) {
        match self {
            Self::Bind(local, promise) => handler.on_bind(ctx, local, promise),
            Self::Connect(remote, local, promise) => handler.on_connect(ctx, remote, local, promise),
            Self::Disconnect(promise) => handler.on_disconnect(ctx, promise),
            Self::Close(promise) => handler.on_close(ctx, promise),
            Self::BeginRead => handler.on_begin_read(ctx),
            Self::Write(msg, promise) => handler.on_write(ctx, msg, promise),
            Self::Flush => handler.on_flush(ctx),
        }
    }

    /// 以 `error` 失败该事件的句柄并释放其消息。
    pub(crate) fn fail(self, error: ChannelError) {
        let promise = self.promise().cloned();
        if let Self::Write(msg, _) = self {
            msg.safe_release();
        }
        if let Some(promise) = promise {
            promise.try_fail(error.into_task_error());
        }
    }
}
