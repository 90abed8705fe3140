use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use flare_common::concurrency::{Completion, EventExecutor};
use flare_common::logging::{self, Logger};
use flare_common::time::Ticks;

use super::event_loop::EmbeddedEventLoop;
use crate::address::Endpoint;
use crate::channel::{AbstractChannel, Channel, ChannelMetadata, ChannelState, OutboundBuffer, Transport};
use crate::config::ChannelSettings;
use crate::error::{ChannelError, Result};
use crate::pipeline::{
    ChannelInitializer, ChannelPipeline, Handler, PipelineMessage, UnhandledSink, handler_from_inbound,
};

/// 嵌入式通道的传输：绑定与读取是空操作，写出的消息进入出站队列。
pub struct EmbeddedTransport {
    metadata: ChannelMetadata,
    outbound: spin::Mutex<VecDeque<PipelineMessage>>,
}

impl EmbeddedTransport {
    fn new(has_disconnect: bool) -> Self {
        Self {
            metadata: ChannelMetadata::new(has_disconnect),
            outbound: spin::Mutex::new(VecDeque::new()),
        }
    }
}

impl Transport for EmbeddedTransport {
    fn metadata(&self) -> ChannelMetadata {
        self.metadata
    }

    fn do_register(&self) -> Result<()> {
        Ok(())
    }

    fn do_bind(&self, _local: &Endpoint) -> Result<()> {
        Ok(())
    }

    fn do_connect(&self, _remote: &Endpoint, _local: Option<&Endpoint>) -> Result<()> {
        Ok(())
    }

    fn do_disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn do_close(&self) -> Result<()> {
        Ok(())
    }

    fn do_begin_read(&self) -> Result<()> {
        Ok(())
    }

    fn do_write(&self, buffer: &mut OutboundBuffer) -> Result<()> {
        let mut queue = self.outbound.lock();
        for _ in 0..buffer.flushed_len() {
            if let Some(message) = buffer.remove() {
                queue.push_back(message);
            }
        }
        Ok(())
    }
}

/// 尾端接收者：未消费的入站消息进入入站队列，异常只保留第一个。
struct EmbeddedSink {
    inbound: spin::Mutex<VecDeque<PipelineMessage>>,
    exception: spin::Mutex<Option<ChannelError>>,
    logger: Arc<dyn Logger>,
}

impl EmbeddedSink {
    fn new() -> Self {
        Self {
            inbound: spin::Mutex::new(VecDeque::new()),
            exception: spin::Mutex::new(None),
            logger: logging::logger("flare.embedded"),
        }
    }

    fn record_exception(&self, error: ChannelError) {
        let mut slot = self.exception.lock();
        if slot.is_none() {
            *slot = Some(error);
            return;
        }
        drop(slot);
        self.logger.warn_with(
            "More than one exception was raised. Will report only the first one and log others.",
            &error,
        );
    }
}

impl UnhandledSink for EmbeddedSink {
    fn on_unhandled_message(&self, message: PipelineMessage) {
        self.inbound.lock().push_back(message);
    }

    fn on_unhandled_exception(&self, error: ChannelError) {
        self.record_exception(error);
    }
}

/// 同步驱动、无真实 I/O 的回环通道，用于确定性地测试 handler 链。
///
/// # 设计背景（Why）
/// - 协议 handler 的大部分正确性（事件顺序、缓冲释放、异常传播）与网络无关；
///   把入站消息直接从头部灌入、把出站消息在头部截留，测试即可逐条断言。
///
/// # 逻辑（How）
/// - 构造时安装一个初始化器把用户 handler 加入流水线，随后注册到 [`EmbeddedEventLoop`]
///   并同步运行到空闲；
/// - 流到链尾的入站消息进入入站队列，传输写出的消息进入出站队列；
/// - 链尾异常与写失败被记录，只保留第一个，其余记录告警；下一次
///   [`check_exception`](Self::check_exception) 把它重新抛出。
///
/// # 契约（What）
/// - `write_inbound`/`write_outbound` 在通道关闭后返回 [`ChannelError::Closed`]，传入的消息被释放；
/// - `finish` 关闭通道并返回是否仍有未读取的消息；`finish_and_release_all` 额外释放它们；
/// - `ChannelSettings::unhandled` 对嵌入式通道不生效，链尾总是进入入站队列。
pub struct EmbeddedChannel {
    channel: Arc<AbstractChannel<EmbeddedTransport>>,
    event_loop: Arc<EmbeddedEventLoop>,
    sink: Arc<EmbeddedSink>,
}

impl EmbeddedChannel {
    /// 以给定 handler（按顺序命名为 `handler-0`、`handler-1`……）构造并注册通道。
    pub fn new<I>(handlers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Handler>>,
    {
        Self::with_options(false, ChannelSettings::default(), handlers)
    }

    pub fn with_options<I>(has_disconnect: bool, settings: ChannelSettings, handlers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Handler>>,
    {
        let event_loop = EmbeddedEventLoop::new()?;
        let sink = Arc::new(EmbeddedSink::new());
        let channel = AbstractChannel::with_sink(
            EmbeddedTransport::new(has_disconnect),
            settings,
            Arc::clone(&sink) as Arc<dyn UnhandledSink>,
        );
        let handlers: Vec<Arc<dyn Handler>> = handlers.into_iter().collect();
        let initializer = ChannelInitializer::new(move |pipeline| {
            for (index, handler) in handlers.iter().enumerate() {
                pipeline.add_last(&format!("handler-{index}"), Arc::clone(handler))?;
            }
            Ok(())
        });
        channel
            .pipeline()
            .add_last("initializer", handler_from_inbound(initializer))?;

        let embedded = Self {
            channel,
            event_loop,
            sink,
        };
        let registration = embedded
            .channel
            .register(Arc::clone(&embedded.event_loop) as Arc<dyn EventExecutor>);
        embedded.run_pending_tasks();
        if let Some(error) = registration.error() {
            return Err(ChannelError::from_task(error));
        }
        Ok(embedded)
    }

    pub fn channel(&self) -> &Arc<AbstractChannel<EmbeddedTransport>> {
        &self.channel
    }

    pub fn pipeline(&self) -> &Arc<ChannelPipeline> {
        self.channel.pipeline()
    }

    pub fn event_loop(&self) -> &Arc<EmbeddedEventLoop> {
        &self.event_loop
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn is_active(&self) -> bool {
        self.channel.is_active()
    }

    /// 从链尾入站队列取出一条消息。
    pub fn read_inbound(&self) -> Option<PipelineMessage> {
        self.sink.inbound.lock().pop_front()
    }

    /// 从出站队列取出一条传输写出的消息。
    pub fn read_outbound(&self) -> Option<PipelineMessage> {
        self.channel.transport().outbound.lock().pop_front()
    }

    pub fn inbound_len(&self) -> usize {
        self.sink.inbound.lock().len()
    }

    pub fn outbound_len(&self) -> usize {
        self.channel.transport().outbound.lock().len()
    }

    /// 从头部写入入站消息并运行到空闲，返回入站队列是否非空。
    pub fn write_inbound<I>(&self, messages: I) -> Result<bool>
    where
        I: IntoIterator<Item = PipelineMessage>,
    {
        let messages = self.ensure_open(messages)?;
        if messages.is_empty() {
            return Ok(self.inbound_len() > 0);
        }
        let pipeline = self.pipeline();
        for message in messages {
            pipeline.fire_read(message);
        }
        pipeline.fire_read_complete();
        self.run_pending_tasks();
        self.check_exception()?;
        Ok(self.inbound_len() > 0)
    }

    /// 从尾部写入出站消息并冲刷，返回出站队列是否非空。
    pub fn write_outbound<I>(&self, messages: I) -> Result<bool>
    where
        I: IntoIterator<Item = PipelineMessage>,
    {
        let messages = self.ensure_open(messages)?;
        if messages.is_empty() {
            return Ok(self.outbound_len() > 0);
        }
        let pipeline = self.pipeline();
        let writes: Vec<Completion<()>> = messages.into_iter().map(|message| pipeline.write(message)).collect();
        self.run_pending_tasks();
        pipeline.flush();
        self.run_pending_tasks();
        for write in writes {
            if let Some(error) = write.error() {
                self.sink.record_exception(ChannelError::from_task(error));
            }
        }
        self.check_exception()?;
        Ok(self.outbound_len() > 0)
    }

    /// 关闭通道，返回是否仍有未读取的消息。
    pub fn finish(&self) -> Result<bool> {
        self.finish_inner(false)
    }

    /// 关闭通道并释放所有未读取的消息，返回释放前是否存在未读取的消息。
    pub fn finish_and_release_all(&self) -> Result<bool> {
        self.finish_inner(true)
    }

    fn finish_inner(&self, release_all: bool) -> Result<bool> {
        let _ = self.close();
        let checked = self.check_exception();
        let pending = self.inbound_len() > 0 || self.outbound_len() > 0;
        if release_all {
            self.release_inbound();
            self.release_outbound();
        }
        checked.map(|()| pending)
    }

    /// 释放入站队列中的全部消息，返回队列此前是否非空。
    pub fn release_inbound(&self) -> bool {
        release_all(&self.sink.inbound)
    }

    pub fn release_outbound(&self) -> bool {
        release_all(&self.channel.transport().outbound)
    }

    /// 运行全部即时任务与已到期的定时任务。
    pub fn run_pending_tasks(&self) {
        self.event_loop.run_tasks();
        if self.event_loop.run_scheduled_tasks() > 0 {
            self.event_loop.run_tasks();
        }
    }

    /// 只运行已到期的定时任务，返回下一个定时截止时间。
    pub fn run_scheduled_pending_tasks(&self) -> Option<Ticks> {
        self.event_loop.run_scheduled_tasks();
        self.event_loop.run_tasks();
        self.event_loop.next_scheduled_task()
    }

    pub fn advance_time(&self, delta: Duration) -> Ticks {
        self.event_loop.advance_time(delta)
    }

    /// 重新抛出记录的第一个异常并清除它。
    pub fn check_exception(&self) -> Result<()> {
        match self.sink.exception.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// 运行挂起任务后关闭通道，再运行一次挂起任务并取消全部定时任务。
    pub fn close(&self) -> Completion<()> {
        self.run_pending_tasks();
        let completion = self.channel.close();
        self.run_pending_tasks();
        self.event_loop.cancel_scheduled_tasks();
        completion
    }

    /// 与 [`close`](Self::close) 相同但保留定时任务；不支持断开的传输会直接关闭。
    pub fn disconnect(&self) -> Completion<()> {
        self.run_pending_tasks();
        let completion = self.channel.disconnect();
        self.run_pending_tasks();
        completion
    }

    fn ensure_open<I>(&self, messages: I) -> Result<Vec<PipelineMessage>>
    where
        I: IntoIterator<Item = PipelineMessage>,
    {
        let messages: Vec<PipelineMessage> = messages.into_iter().collect();
        if self.is_open() {
            return Ok(messages);
        }
        for message in messages {
            message.safe_release();
        }
        self.sink.record_exception(ChannelError::Closed);
        self.check_exception()?;
        Err(ChannelError::Closed)
    }
}

fn release_all(queue: &spin::Mutex<VecDeque<PipelineMessage>>) -> bool {
    let drained: Vec<PipelineMessage> = queue.lock().drain(..).collect();
    let had_any = !drained.is_empty();
    for message in drained {
        message.safe_release();
    }
    had_any
}

impl fmt::Debug for EmbeddedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedChannel")
            .field("channel", &self.channel)
            .field("inbound", &self.inbound_len())
            .field("outbound", &self.outbound_len())
            .finish()
    }
}
