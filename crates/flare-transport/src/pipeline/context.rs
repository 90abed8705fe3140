//! Handler 上下文。
//!
//! # 设计背景（Why）
//! - handler 需要把事件转发给“相对自己的下一个” handler，而不是从链头重新开始；
//!   上下文记录了 handler 在链中的位置，是转发的唯一入口。
//!
//! # 逻辑（How）
//! - 转发时先在最新快照中按身份定位自身，因此在回调里新增的 handler 立即可见；
//! - 若自身已被移除（例如初始化器完成后自我移除），则退回到创建上下文时的快照，
//!   事件仍交给移除前的相邻 handler。
//!
//! # 契约（What）
//! - 上下文只在回调期间有效，不应被 handler 保存；
//! - `fire_*` 与出站方法都在当前线程同步转发，不会再次入队。
use std::sync::Arc;

use flare_common::concurrency::{Completion, EventExecutor, Promise};
use flare_common::logging::Logger;

use super::event::{InboundEvent, OutboundEvent};
use super::message::{PipelineMessage, UserEvent};
use super::pipeline::{ChannelPipeline, HandlerEntry, Snapshot};
use crate::address::Endpoint;
use crate::channel::Channel;
use crate::error::ChannelError;

/// handler 回调拿到的上下文。
pub trait Context: Send + Sync {
    /// handler 在流水线中的名称。
    fn name(&self) -> &str;

    fn pipeline(&self) -> &Arc<ChannelPipeline>;

    /// 所属通道；通道已被销毁时为 `None`。
    fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.pipeline().channel()
    }

    fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.channel().and_then(|channel| channel.event_loop())
    }

    fn logger(&self) -> &Arc<dyn Logger> {
        self.pipeline().logger()
    }

    fn fire_channel_registered(&self);

    fn fire_channel_unregistered(&self);

    fn fire_channel_active(&self);

    fn fire_channel_inactive(&self);

    fn fire_read(&self, msg: PipelineMessage);

    fn fire_read_complete(&self);

    fn fire_writability_changed(&self, is_writable: bool);

    fn fire_user_event(&self, event: UserEvent);

    fn fire_exception_caught(&self, error: ChannelError);

    fn bind_with(&self, local: Endpoint, promise: Promise<()>);

    fn connect_with(&self, remote: Endpoint, local: Option<Endpoint>, promise: Promise<()>);

    fn disconnect_with(&self, promise: Promise<()>);

    fn close_with(&self, promise: Promise<()>);

    fn begin_read(&self);

    fn write_with(&self, msg: PipelineMessage, promise: Promise<()>);

    fn flush(&self);

    fn bind(&self, local: Endpoint) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        self.bind_with(local, promise);
        completion
    }

    fn connect(&self, remote: Endpoint, local: Option<Endpoint>) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        self.connect_with(remote, local, promise);
        completion
    }

    fn disconnect(&self) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        self.disconnect_with(promise);
        completion
    }

    fn close(&self) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        self.close_with(promise);
        completion
    }

    fn write(&self, msg: PipelineMessage) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        self.write_with(msg, promise);
        completion
    }

    fn write_and_flush(&self, msg: PipelineMessage) -> Completion<()> {
        let completion = self.write(msg);
        self.flush();
        completion
    }
}

/// 一次回调期间使用的上下文实现。
pub(crate) struct HandlerContext {
    pipeline: Arc<ChannelPipeline>,
    entry: Arc<HandlerEntry>,
    snapshot: Snapshot,
    index: usize,
}

impl HandlerContext {
    pub(crate) fn new(pipeline: Arc<ChannelPipeline>, snapshot: Snapshot, index: usize) -> Self {
        let entry = Arc::clone(&snapshot[index]);
        Self {
            pipeline,
            entry,
            snapshot,
            index,
        }
    }

    fn position(&self) -> (Snapshot, usize) {
        let live = self.pipeline.snapshot();
        match live.iter().position(|entry| Arc::ptr_eq(entry, &self.entry)) {
            Some(index) => (live, index),
            None => (Arc::clone(&self.snapshot), self.index),
        }
    }

    fn inbound(&self, event: InboundEvent) {
        let (snapshot, index) = self.position();
        self.pipeline.dispatch_inbound(&snapshot, index + 1, event);
    }

    fn outbound(&self, event: OutboundEvent) {
        let (snapshot, index) = self.position();
        self.pipeline.dispatch_outbound(&snapshot, index, event);
    }
}

impl Context for HandlerContext {
    fn name(&self) -> &str {
        self.entry.name()
    }

    fn pipeline(&self) -> &Arc<ChannelPipeline> {
        &self.pipeline
    }

    fn fire_channel_registered(&self) {
        self.inbound(InboundEvent::Registered);
    }

    fn fire_channel_unregistered(&self) {
        self.inbound(InboundEvent::Unregistered);
    }

    fn fire_channel_active(&self) {
        self.inbound(InboundEvent::Active);
    }

    fn fire_channel_inactive(&self) {
        self.inbound(InboundEvent::Inactive);
    }

    fn fire_read(&self, msg: PipelineMessage) {
        self.inbound(InboundEvent::Read(msg));
    }

    fn fire_read_complete(&self) {
        self.inbound(InboundEvent::ReadComplete);
    }

    fn fire_writability_changed(&self, is_writable: bool) {
        self.inbound(InboundEvent::WritabilityChanged(is_writable));
    }

    fn fire_user_event(&self, event: UserEvent) {
        self.inbound(InboundEvent::User(event));
    }

    fn fire_exception_caught(&self, error: ChannelError) {
        self.inbound(InboundEvent::Exception(error));
    }

    fn bind_with(&self, local: Endpoint, promise: Promise<()>) {
        self.outbound(OutboundEvent::Bind(local, promise));
    }

    fn connect_with(&self, remote: Endpoint, local: Option<Endpoint>, promise: Promise<()>) {
        self.outbound(OutboundEvent::Connect(remote, local, promise));
    }

    fn disconnect_with(&self, promise: Promise<()>) {
        self.outbound(OutboundEvent::Disconnect(promise));
    }

    fn close_with(&self, promise: Promise<()>) {
        self.outbound(OutboundEvent::Close(promise));
    }

    fn begin_read(&self) {
        self.outbound(OutboundEvent::BeginRead);
    }

    fn write_with(&self, msg: PipelineMessage, promise: Promise<()>) {
        self.outbound(OutboundEvent::Write(msg, promise));
    }

    fn flush(&self) {
        self.outbound(OutboundEvent::Flush);
    }
}
