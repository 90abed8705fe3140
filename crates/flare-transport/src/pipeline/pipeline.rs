use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use flare_common::concurrency::{Completion, Promise, Runnable};
use flare_common::error::panic_message;
use flare_common::logging::{self, Logger};

use super::context::HandlerContext;
use super::event::{InboundEvent, OutboundEvent};
use super::handler::{Handler, InboundHandler, OutboundHandler};
use super::message::{PipelineMessage, UserEvent};
use super::unhandled::UnhandledSink;
use crate::address::Endpoint;
use crate::channel::Channel;
use crate::error::{ChannelError, Result};

/// 链路快照：不可变的槽位数组，变更时整体替换。
pub(crate) type Snapshot = Arc<Vec<Arc<HandlerEntry>>>;

/// 流水线中的一个具名槽位。
pub(crate) struct HandlerEntry {
    name: String,
    handler: Arc<dyn Handler>,
    inbound: Option<Arc<dyn InboundHandler>>,
    outbound: Option<Arc<dyn OutboundHandler>>,
}

impl HandlerEntry {
    fn new(name: &str, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.to_owned(),
            inbound: handler.clone_inbound(),
            outbound: handler.clone_outbound(),
            handler,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// 在事件循环上执行的流水线操作。
enum PipelineOp {
    Inbound(InboundEvent),
    Outbound(OutboundEvent),
}

struct PipelineTask {
    pipeline: Arc<ChannelPipeline>,
    op: PipelineOp,
}

impl Runnable for PipelineTask {
    fn run(self: Box<Self>) {
        let PipelineTask { pipeline, op } = *self;
        pipeline.run(op);
    }

    fn reject(self: Box<Self>) {
        match self.op {
            PipelineOp::Inbound(event) => event.abandon(),
            PipelineOp::Outbound(event) => event.fail(ChannelError::Closed),
        }
    }
}

/// 通道的 handler 链。
///
/// # 设计背景（Why）
/// - 入站事件从头到尾、出站事件从尾到头，handler 只与相邻位置交互，
///   因此协议逻辑可以拆成可独立测试、可自由组合的小段；
/// - 运行期间允许增删 handler（例如初始化器完成后移除自身），调度不能因链路变更而错乱。
///
/// # 逻辑（How）
/// - 槽位数组以写时复制的快照保存：变更在 `mutation` 锁内基于旧快照构造新数组并整体替换，
///   调度只持有快照的 `Arc`，读路径不加锁等待；
/// - 公开的 `fire_*` 与出站方法是外部入口，统一包装成任务投递到通道绑定的事件循环，
///   即使调用方本就在该循环上也照样入队；通道尚未注册时在调用线程上直接调度；
/// - 入站事件找不到下一个入站 handler 时交给尾端 [`UnhandledSink`]，
///   出站事件找不到下一个出站 handler 时交给通道的 [`ChannelOps`](crate::channel::ChannelOps)；
/// - 每次回调都包在 `catch_unwind` 中，panic 被转换为 [`ChannelError::HandlerPanicked`]
///   并交给同一 handler 的 `on_exception_caught`；若该回调本身就是异常处理，仅记录告警。
///
/// # 契约（What）
/// - handler 名称在同一流水线内唯一；
/// - 同一事件循环上，入站事件按 handler 注册顺序经过，出站事件按逆序经过；
/// - `on_handler_added`/`on_handler_removed` 在事件循环上同步调用，
///   从其他线程变更链路时则投递到循环上执行。
///
/// # 风险（Trade-offs）
/// - 上下文转发时需要在快照中按身份定位自身，代价与链路长度成线性关系，
///   对通常只有个位数 handler 的链路可以忽略。
pub struct ChannelPipeline {
    self_ref: Weak<ChannelPipeline>,
    channel: Weak<dyn Channel>,
    handlers: spin::RwLock<Snapshot>,
    mutation: spin::Mutex<()>,
    sink: Arc<dyn UnhandledSink>,
    logger: Arc<dyn Logger>,
}

impl ChannelPipeline {
    pub(crate) fn new(channel: Weak<dyn Channel>, sink: Arc<dyn UnhandledSink>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            channel,
            handlers: spin::RwLock::new(Arc::new(Vec::new())),
            mutation: spin::Mutex::new(()),
            sink,
            logger: logging::logger("flare.pipeline"),
        })
    }

    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.upgrade()
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn sink(&self) -> &Arc<dyn UnhandledSink> {
        &self.sink
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.handlers.read())
    }

    // ---- 链路变更 ----

    pub fn add_first(&self, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.insert(name, handler, |_| Ok(0))
    }

    pub fn add_last(&self, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.insert(name, handler, |entries| Ok(entries.len()))
    }

    pub fn add_before(&self, base: &str, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.insert(name, handler, |entries| position_of(entries, base))
    }

    pub fn add_after(&self, base: &str, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.insert(name, handler, |entries| position_of(entries, base).map(|index| index + 1))
    }

    /// 移除具名 handler 并返回它。
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Handler>> {
        let (previous, index) = {
            let _guard = self.mutation.lock();
            let previous = self.snapshot();
            let index = position_of(&previous, name)?;
            let mut next: Vec<_> = previous.iter().cloned().collect();
            next.remove(index);
            *self.handlers.write() = Arc::new(next);
            (previous, index)
        };
        let removed = Arc::clone(&previous[index].handler);
        self.notify_removed(previous, index);
        Ok(removed)
    }

    /// 原位替换具名 handler，返回被替换者。
    pub fn replace(&self, old_name: &str, new_name: &str, handler: Arc<dyn Handler>) -> Result<Arc<dyn Handler>> {
        let (previous, next, index) = {
            let _guard = self.mutation.lock();
            let previous = self.snapshot();
            let index = position_of(&previous, old_name)?;
            if new_name != old_name && previous.iter().any(|entry| entry.name == new_name) {
                return Err(ChannelError::DuplicateHandler(new_name.to_owned()));
            }
            let mut next: Vec<_> = previous.iter().cloned().collect();
            next[index] = Arc::new(HandlerEntry::new(new_name, handler));
            let next = Arc::new(next);
            *self.handlers.write() = Arc::clone(&next);
            (previous, next, index)
        };
        let replaced = Arc::clone(&previous[index].handler);
        self.notify_removed(previous, index);
        self.notify_added(next, index);
        Ok(replaced)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.snapshot()
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| Arc::clone(&entry.handler))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|entry| entry.name == name)
    }

    /// 按链路顺序（头到尾）列出 handler 名称。
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(
        &self,
        name: &str,
        handler: Arc<dyn Handler>,
        locate: impl FnOnce(&[Arc<HandlerEntry>]) -> Result<usize>,
    ) -> Result<()> {
        let (next, index) = {
            let _guard = self.mutation.lock();
            let current = self.snapshot();
            if current.iter().any(|entry| entry.name == name) {
                return Err(ChannelError::DuplicateHandler(name.to_owned()));
            }
            let index = locate(&current)?;
            let mut next: Vec<_> = current.iter().cloned().collect();
            next.insert(index, Arc::new(HandlerEntry::new(name, handler)));
            let next = Arc::new(next);
            *self.handlers.write() = Arc::clone(&next);
            (next, index)
        };
        self.notify_added(next, index);
        Ok(())
    }

    fn notify_added(&self, snapshot: Snapshot, index: usize) {
        self.on_loop(move |pipeline| {
            if let Some(handler) = snapshot[index].inbound.clone() {
                pipeline.guarded(&snapshot, index, false, |ctx| handler.on_handler_added(ctx));
            }
        });
    }

    fn notify_removed(&self, snapshot: Snapshot, index: usize) {
        self.on_loop(move |pipeline| {
            if let Some(handler) = snapshot[index].inbound.clone() {
                pipeline.guarded(&snapshot, index, false, |ctx| handler.on_handler_removed(ctx));
            }
        });
    }

    /// 在事件循环上执行 handler 生命周期回调：已在循环上（或尚未注册）时同步执行。
    fn on_loop(&self, work: impl FnOnce(&Arc<ChannelPipeline>) + Send + 'static) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        match self.channel().and_then(|channel| channel.event_loop()) {
            Some(executor) if !executor.in_event_loop() => {
                executor.core().execute(move || work(&this));
            }
            _ => work(&this),
        }
    }

    // ---- 外部入口：入站 ----

    pub fn fire_channel_registered(&self) {
        self.submit(PipelineOp::Inbound(InboundEvent::Registered));
    }

    pub fn fire_channel_unregistered(&self) {
        self.submit(PipelineOp::Inbound(InboundEvent::Unregistered));
    }

    pub fn fire_channel_active(&self) {
        self.submit(PipelineOp::Inbound(InboundEvent::Active));
    }

    pub fn fire_channel_inactive(&self) {
        self.submit(PipelineOp::Inbound(InboundEvent::Inactive));
    }

    pub fn fire_read(&self, msg: PipelineMessage) {
        self.submit(PipelineOp::Inbound(InboundEvent::Read(msg)));
    }

    pub fn fire_read_complete(&self) {
        self.submit(PipelineOp::Inbound(InboundEvent::ReadComplete));
    }

    pub fn fire_writability_changed(&self, is_writable: bool) {
        self.submit(PipelineOp::Inbound(InboundEvent::WritabilityChanged(is_writable)));
    }

    pub fn fire_user_event(&self, event: UserEvent) {
        self.submit(PipelineOp::Inbound(InboundEvent::User(event)));
    }

    pub fn fire_exception_caught(&self, error: ChannelError) {
        self.submit(PipelineOp::Inbound(InboundEvent::Exception(error)));
    }

    // ---- 外部入口：出站 ----

    pub fn bind(&self, local: Endpoint) -> Completion<()> {
        self.outbound_with_promise(|promise| OutboundEvent::Bind(local, promise))
    }

    pub fn connect(&self, remote: Endpoint, local: Option<Endpoint>) -> Completion<()> {
        self.outbound_with_promise(|promise| OutboundEvent::Connect(remote, local, promise))
    }

    pub fn disconnect(&self) -> Completion<()> {
        self.outbound_with_promise(OutboundEvent::Disconnect)
    }

    pub fn close(&self) -> Completion<()> {
        self.outbound_with_promise(OutboundEvent::Close)
    }

    pub fn begin_read(&self) {
        self.submit(PipelineOp::Outbound(OutboundEvent::BeginRead));
    }

    pub fn write(&self, msg: PipelineMessage) -> Completion<()> {
        self.outbound_with_promise(|promise| OutboundEvent::Write(msg, promise))
    }

    pub fn flush(&self) {
        self.submit(PipelineOp::Outbound(OutboundEvent::Flush));
    }

    pub fn write_and_flush(&self, msg: PipelineMessage) -> Completion<()> {
        let completion = self.write(msg);
        self.flush();
        completion
    }

    fn outbound_with_promise(&self, event: impl FnOnce(Promise<()>) -> OutboundEvent) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        self.submit(PipelineOp::Outbound(event(promise)));
        completion
    }

    fn submit(&self, op: PipelineOp) {
        let Some(pipeline) = self.self_ref.upgrade() else {
            return;
        };
        match self.channel().and_then(|channel| channel.event_loop()) {
            Some(executor) => executor.core().execute_runnable(Box::new(PipelineTask { pipeline, op })),
            None => pipeline.run(op),
        }
    }

    fn run(self: &Arc<Self>, op: PipelineOp) {
        let snapshot = self.snapshot();
        match op {
            PipelineOp::Inbound(event) => self.dispatch_inbound(&snapshot, 0, event),
            PipelineOp::Outbound(event) => {
                let len = snapshot.len();
                self.dispatch_outbound(&snapshot, len, event);
            }
        }
    }

    // ---- 调度 ----

    /// 把入站事件交给 `from` 及之后的第一个入站 handler；没有则交给尾端。
    pub(crate) fn dispatch_inbound(self: &Arc<Self>, snapshot: &Snapshot, from: usize, event: InboundEvent) {
        let next = snapshot
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(index, entry)| entry.inbound.clone().map(|handler| (index, handler)));
        let Some((index, handler)) = next else {
            self.tail(event);
            return;
        };
        let is_exception = event.is_exception();
        self.guarded(snapshot, index, is_exception, |ctx| event.deliver(handler.as_ref(), ctx));
    }

    /// 把出站事件交给 `before` 之前最近的出站 handler；没有则交给通道。
    pub(crate) fn dispatch_outbound(self: &Arc<Self>, snapshot: &Snapshot, before: usize, event: OutboundEvent) {
        let next = snapshot
            .iter()
            .enumerate()
            .take(before)
            .rev()
            .find_map(|(index, entry)| entry.outbound.clone().map(|handler| (index, handler)));
        let Some((index, handler)) = next else {
            self.head(event);
            return;
        };
        let ctx = HandlerContext::new(Arc::clone(self), Arc::clone(snapshot), index);
        let promise = event.promise().cloned();
        let outcome = catch_unwind(AssertUnwindSafe(|| event.deliver(handler.as_ref(), &ctx)));
        if let Err(payload) = outcome {
            let error = panicked(&snapshot[index].name, payload);
            match promise {
                Some(promise) => {
                    promise.try_fail(error.into_task_error());
                }
                None => self.dispatch_inbound(snapshot, index, InboundEvent::Exception(error)),
            }
        }
    }

    /// 调用 `index` 处的入站回调并兜住 panic。
    fn guarded(
        self: &Arc<Self>,
        snapshot: &Snapshot,
        index: usize,
        handling_exception: bool,
        callback: impl FnOnce(&HandlerContext),
    ) {
        let ctx = HandlerContext::new(Arc::clone(self), Arc::clone(snapshot), index);
        let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&ctx))) else {
            return;
        };
        let entry = &snapshot[index];
        let error = panicked(&entry.name, payload);
        let handler = match (&entry.inbound, handling_exception) {
            (Some(handler), false) => handler,
            _ => {
                self.logger
                    .warn_with("a handler's exception handler panicked; the error is dropped", &error);
                return;
            }
        };
        let reported = error.clone();
        if catch_unwind(AssertUnwindSafe(|| handler.on_exception_caught(&ctx, reported))).is_err() {
            self.logger
                .warn_with("a handler's exception handler panicked; the error is dropped", &error);
        }
    }

    fn tail(&self, event: InboundEvent) {
        match event {
            InboundEvent::Read(msg) => self.sink.on_unhandled_message(msg),
            InboundEvent::Exception(error) => self.sink.on_unhandled_exception(error),
            InboundEvent::User(event) => self.sink.on_unhandled_user_event(event),
            _ => {}
        }
    }

    fn head(&self, event: OutboundEvent) {
        let Some(channel) = self.channel() else {
            event.fail(ChannelError::Closed);
            return;
        };
        let ops = channel.ops();
        match event {
            OutboundEvent::Bind(local, promise) => ops.bind(local, promise),
            OutboundEvent::Connect(remote, local, promise) => ops.connect(remote, local, promise),
            OutboundEvent::Disconnect(promise) => ops.disconnect(promise),
            OutboundEvent::Close(promise) => ops.close(promise),
            OutboundEvent::BeginRead => ops.begin_read(),
            OutboundEvent::Write(msg, promise) => ops.write(msg, promise),
            OutboundEvent::Flush => ops.flush(),
        }
    }
}

fn position_of(entries: &[Arc<HandlerEntry>], name: &str) -> Result<usize> {
    entries
        .iter()
        .position(|entry| entry.name == name)
        .ok_or_else(|| ChannelError::HandlerNotFound(name.to_owned()))
}

fn panicked(name: &str, payload: Box<dyn std::any::Any + Send>) -> ChannelError {
    ChannelError::HandlerPanicked {
        handler: name.to_owned(),
        message: panic_message(payload.as_ref()),
    }
}

impl fmt::Debug for ChannelPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPipeline").field("handlers", &self.names()).finish()
    }
}
