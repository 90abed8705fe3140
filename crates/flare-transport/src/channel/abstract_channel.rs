use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::Wake;

use flare_common::concurrency::{Completion, EventExecutor, Promise};
use flare_common::logging::{self, Logger};

use super::outbound::OutboundBuffer;
use super::transport::Transport;
use super::{Channel, ChannelId, ChannelMetadata, ChannelOps, ChannelState};
use crate::address::Endpoint;
use crate::config::ChannelSettings;
use crate::error::ChannelError;
use crate::pipeline::{ChannelPipeline, PipelineMessage, PolicySink, UnhandledSink};
use crate::resolver::{DefaultNameResolver, NameResolver};

/// 与传输无关的通道骨架。
///
/// # 设计背景（Why）
/// - 状态迁移、生命周期事件的触发顺序、出站缓冲的冲刷与关闭时的清理对所有传输都相同，
///   集中在这里，具体传输只需提供 [`Transport`] 原语。
///
/// # 逻辑（How）
/// - 注册：记录事件循环后把 `do_register` 投递到循环上；成功则 `Open → Active`，
///   依次触发 registered 与 active；
/// - 连接：未解析的远端先交给 [`NameResolver`]（默认 [`DefaultNameResolver`]），解析完成后
///   在事件循环上继续 `do_connect`；
/// - 写入：消息进入 [`OutboundBuffer`] 的未冲刷段；冲刷时整体转入已冲刷段并调用 `do_write`；
/// - 关闭：状态原子地切到 `Closed`，调用 `do_close`，以 [`ChannelError::Closed`] 失败全部待写条目，
///   若此前处于 `Active` 则触发 inactive，最后触发 unregistered 并完成关闭句柄。
///
/// # 契约（What）
/// - [`ChannelOps`] 的方法只由流水线头部在事件循环上调用；
/// - 重复关闭默认幂等，`strict_close` 打开时以 [`ChannelError::AlreadyClosed`] 失败；
/// - 关闭后的写入立即释放消息并以 [`ChannelError::Closed`] 失败。
pub struct AbstractChannel<T: Transport> {
    id: ChannelId,
    self_ref: Weak<Self>,
    state: AtomicU8,
    event_loop: spin::RwLock<Option<Arc<dyn EventExecutor>>>,
    pipeline: Arc<ChannelPipeline>,
    policy_sink: Option<Arc<PolicySink>>,
    outbound: spin::Mutex<OutboundBuffer>,
    local: spin::RwLock<Option<Endpoint>>,
    remote: spin::RwLock<Option<Endpoint>>,
    close_promise: Promise<()>,
    close_completion: spin::Mutex<Option<Completion<()>>>,
    settings: ChannelSettings,
    resolver: spin::RwLock<Arc<dyn NameResolver>>,
    transport: T,
    logger: Arc<dyn Logger>,
}

impl<T: Transport> AbstractChannel<T> {
    /// 以 `settings` 中的尾端策略构造通道。
    pub fn new(transport: T, settings: ChannelSettings) -> Arc<Self> {
        let sink = Arc::new(PolicySink::new(settings.unhandled()));
        Self::build(transport, settings, Arc::clone(&sink) as Arc<dyn UnhandledSink>, Some(sink))
    }

    /// 以自定义尾端接收者构造通道，`settings.unhandled()` 不再生效。
    pub fn with_sink(transport: T, settings: ChannelSettings, sink: Arc<dyn UnhandledSink>) -> Arc<Self> {
        Self::build(transport, settings, sink, None)
    }

    fn build(
        transport: T,
        settings: ChannelSettings,
        sink: Arc<dyn UnhandledSink>,
        policy_sink: Option<Arc<PolicySink>>,
    ) -> Arc<Self> {
        let (close_promise, close_completion) = Promise::pair();
        Arc::new_cyclic(|self_ref: &Weak<Self>| {
            let channel: Weak<dyn Channel> = self_ref.clone();
            Self {
                id: ChannelId::next(),
                self_ref: self_ref.clone(),
                state: AtomicU8::new(ChannelState::Open as u8),
                event_loop: spin::RwLock::new(None),
                pipeline: ChannelPipeline::new(channel, sink),
                policy_sink,
                outbound: spin::Mutex::new(OutboundBuffer::new()),
                local: spin::RwLock::new(None),
                remote: spin::RwLock::new(None),
                close_promise,
                close_completion: spin::Mutex::new(Some(close_completion)),
                settings,
                resolver: spin::RwLock::new(Arc::new(DefaultNameResolver)),
                transport,
                logger: logging::logger("flare.channel"),
            }
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// 替换连接前使用的名称解析器，只影响之后发起的连接。
    pub fn set_resolver(&self, resolver: Arc<dyn NameResolver>) {
        *self.resolver.write() = resolver;
    }

    pub fn resolver(&self) -> Arc<dyn NameResolver> {
        Arc::clone(&self.resolver.read())
    }

    /// 通过 [`AbstractChannel::new`] 构造时的默认尾端接收者。
    pub fn policy_sink(&self) -> Option<&Arc<PolicySink>> {
        self.policy_sink.as_ref()
    }

    /// 取走关闭句柄：通道关闭后完成。只能取走一次。
    pub fn closed(&self) -> Option<Completion<()>> {
        self.close_completion.lock().take()
    }

    pub fn is_writable(&self) -> bool {
        self.is_active()
    }

    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn complete_registration(&self, promise: Promise<()>) {
        if let Err(error) = self.transport.do_register() {
            self.logger.warn_with("transport registration failed; closing the channel", &error);
            self.close_now(None);
            promise.try_fail(error.into_task_error());
            return;
        }
        if !self.transition(ChannelState::Open, ChannelState::Active) {
            promise.try_fail(ChannelError::Closed.into_task_error());
            return;
        }
        promise.try_complete(());
        self.pipeline.fire_channel_registered();
        self.pipeline.fire_channel_active();
    }

    fn connect_resolved(&self, remote: Endpoint, local: Option<Endpoint>, promise: Promise<()>) {
        if !self.is_open() {
            promise.try_fail(ChannelError::Closed.into_task_error());
            return;
        }
        match self.transport.do_connect(&remote, local.as_ref()) {
            Ok(()) => {
                if local.is_some() {
                    *self.local.write() = local;
                }
                *self.remote.write() = Some(remote);
                promise.try_complete(());
            }
            Err(error) => {
                promise.try_fail(error.into_task_error());
            }
        }
    }

    /// 执行关闭；`promise` 为 `None` 时只做清理。
    fn close_now(&self, promise: Option<Promise<()>>) {
        let previous = ChannelState::from_u8(self.state.swap(ChannelState::Closed as u8, Ordering::AcqRel));
        if previous == ChannelState::Closed {
            if let Some(promise) = promise {
                if self.settings.strict_close() {
                    promise.try_fail(ChannelError::AlreadyClosed.into_task_error());
                } else {
                    promise.try_complete(());
                }
            }
            return;
        }
        let outcome = self.transport.do_close();
        self.outbound.lock().fail_all(&ChannelError::Closed);
        if previous == ChannelState::Active {
            self.pipeline.fire_channel_inactive();
        }
        if self.is_registered() {
            self.pipeline.fire_channel_unregistered();
        }
        self.close_promise.try_complete(());
        match (outcome, promise) {
            (Ok(()), Some(promise)) => {
                promise.try_complete(());
            }
            (Err(error), Some(promise)) => {
                promise.try_fail(error.into_task_error());
            }
            (Err(error), None) => self.logger.warn_with("transport close failed", &error),
            (Ok(()), None) => {}
        }
    }
}

impl<T: Transport> Channel for AbstractChannel<T> {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn metadata(&self) -> ChannelMetadata {
        self.transport.metadata()
    }

    fn pipeline(&self) -> &Arc<ChannelPipeline> {
        &self.pipeline
    }

    fn event_loop(&self) -> Option<Arc<dyn EventExecutor>> {
        self.event_loop.read().clone()
    }

    fn local_address(&self) -> Option<Endpoint> {
        self.local.read().clone()
    }

    fn remote_address(&self) -> Option<Endpoint> {
        self.remote.read().clone()
    }

    fn ops(&self) -> &dyn ChannelOps {
        self
    }

    fn register(&self, event_loop: Arc<dyn EventExecutor>) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        if !self.is_open() {
            promise.try_fail(ChannelError::Closed.into_task_error());
            return completion;
        }
        if event_loop.is_shutting_down() {
            promise.try_fail(flare_common::TaskError::ExecutorTerminated);
            return completion;
        }
        {
            let mut slot = self.event_loop.write();
            if slot.is_some() {
                promise.try_fail(ChannelError::AlreadyRegistered.into_task_error());
                return completion;
            }
            *slot = Some(Arc::clone(&event_loop));
        }
        let Some(this) = self.self_ref.upgrade() else {
            promise.try_fail(ChannelError::Closed.into_task_error());
            return completion;
        };
        event_loop.core().execute(move || this.complete_registration(promise));
        completion
    }
}

impl<T: Transport> ChannelOps for AbstractChannel<T> {
    fn bind(&self, local: Endpoint, promise: Promise<()>) {
        if !self.is_open() {
            promise.try_fail(ChannelError::Closed.into_task_error());
            return;
        }
        match self.transport.do_bind(&local) {
            Ok(()) => {
                *self.local.write() = Some(local);
                promise.try_complete(());
            }
            Err(error) => {
                promise.try_fail(error.into_task_error());
            }
        }
    }

    fn connect(&self, remote: Endpoint, local: Option<Endpoint>, promise: Promise<()>) {
        if !self.is_open() {
            promise.try_fail(ChannelError::Closed.into_task_error());
            return;
        }
        let resolver = self.resolver();
        if resolver.is_resolved(&remote) {
            self.connect_resolved(remote, local, promise);
            return;
        }
        let pending = Arc::new(PendingConnect {
            channel: self.self_ref.clone(),
            resolution: spin::Mutex::new(Some(resolver.resolve(&remote))),
            request: spin::Mutex::new(Some((local, promise))),
        });
        pending.poll();
    }

    fn disconnect(&self, promise: Promise<()>) {
        if !self.metadata().has_disconnect() {
            self.close_now(Some(promise));
            return;
        }
        match self.transport.do_disconnect() {
            Ok(()) => {
                *self.remote.write() = None;
                promise.try_complete(());
            }
            Err(error) => {
                promise.try_fail(error.into_task_error());
            }
        }
    }

    fn close(&self, promise: Promise<()>) {
        self.close_now(Some(promise));
    }

    fn begin_read(&self) {
        if !self.is_active() {
            return;
        }
        if let Err(error) = self.transport.do_begin_read() {
            self.pipeline.fire_exception_caught(error);
        }
    }

    fn write(&self, msg: PipelineMessage, promise: Promise<()>) {
        if !self.is_open() {
            msg.safe_release();
            promise.try_fail(ChannelError::Closed.into_task_error());
            return;
        }
        self.outbound.lock().add_message(msg, promise);
    }

    fn flush(&self) {
        let failure = {
            let mut buffer = self.outbound.lock();
            buffer.add_flush();
            match self.state() {
                ChannelState::Active => match self.transport.do_write(&mut buffer) {
                    Ok(()) => None,
                    Err(error) => {
                        buffer.fail_flushed(&error);
                        Some(error)
                    }
                },
                ChannelState::Open => {
                    buffer.fail_flushed(&ChannelError::NotRegistered);
                    None
                }
                ChannelState::Closed => {
                    buffer.fail_flushed(&ChannelError::Closed);
                    None
                }
            }
        };
        if let Some(error) = failure {
            self.pipeline.fire_exception_caught(error);
        }
    }
}

/// 等待名称解析的连接请求。
///
/// 解析句柄就绪时唤醒者把续作投递回通道的事件循环，`do_connect` 因此仍只在循环上执行。
struct PendingConnect<T: Transport> {
    channel: Weak<AbstractChannel<T>>,
    resolution: spin::Mutex<Option<Completion<Endpoint>>>,
    request: spin::Mutex<Option<(Option<Endpoint>, Promise<()>)>>,
}

impl<T: Transport> PendingConnect<T> {
    fn poll(self: &Arc<Self>) {
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        let outcome = {
            let mut slot = self.resolution.lock();
            let Some(resolution) = slot.as_mut() else {
                return;
            };
            match Pin::new(resolution).poll(&mut cx) {
                Poll::Ready(outcome) => {
                    *slot = None;
                    outcome
                }
                Poll::Pending => return,
            }
        };
        let Some((local, promise)) = self.request.lock().take() else {
            return;
        };
        match (outcome, self.channel.upgrade()) {
            (Ok(remote), Some(channel)) => channel.connect_resolved(remote, local, promise),
            (Ok(_), None) => {
                promise.try_fail(ChannelError::Closed.into_task_error());
            }
            (Err(error), _) => {
                promise.try_fail(error);
            }
        }
    }
}

impl<T: Transport> Wake for PendingConnect<T> {
    fn wake(self: Arc<Self>) {
        match self.channel.upgrade().and_then(|channel| channel.event_loop()) {
            Some(event_loop) => event_loop.core().execute(move || self.poll()),
            None => self.poll(),
        }
    }
}

impl<T: Transport> fmt::Debug for AbstractChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractChannel")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("local", &self.local_address())
            .field("remote", &self.remote_address())
            .finish()
    }
}
