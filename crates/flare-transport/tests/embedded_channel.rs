//! 嵌入式通道的端到端行为：回显、结束与释放、异常记录、关闭后的写入、定时任务与关闭语义。
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flare_buffer::ByteBuf;
use flare_common::concurrency::ExecutorExt;
use flare_common::time::Ticks;
use flare_transport::pipeline::{Context, InboundHandler, PipelineMessage, UserEvent, handler_from_inbound};
use flare_transport::{ChannelError, ChannelSettings, ChannelState, DatagramPacket, EmbeddedChannel, Endpoint};
use futures::executor::block_on;
use tracing_test::traced_test;

fn buf(text: &str) -> PipelineMessage {
    ByteBuf::from_slice(text.as_bytes()).into()
}

fn text_of(msg: PipelineMessage) -> String {
    let buffer = msg.into_buffer().expect("应为字节缓冲");
    let bytes = buffer.to_vec().expect("缓冲可读");
    String::from_utf8(bytes).expect("UTF-8 内容")
}

struct Echo;

impl InboundHandler for Echo {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let _ = ctx.write_and_flush(msg);
    }
}

#[test]
fn echo_handler_turns_reads_into_writes() {
    let channel = EmbeddedChannel::new([handler_from_inbound(Arc::new(Echo))]).expect("构造应成功");
    assert_eq!(channel.state(), ChannelState::Active);

    let has_inbound = channel.write_inbound([buf("ping")]).expect("写入应成功");
    assert!(!has_inbound);
    let echoed = channel.read_outbound().expect("应有回显");
    assert_eq!(text_of(echoed), "ping");
    assert!(channel.read_outbound().is_none());
    assert!(!channel.finish().expect("结束应成功"));
}

#[test]
fn unread_messages_are_reported_and_released_on_finish() {
    let channel = EmbeddedChannel::new(Vec::new()).expect("构造应成功");
    let observer = ByteBuf::from_slice(b"left over");
    assert!(
        channel
            .write_inbound([observer.duplicate().into()])
            .expect("写入应成功")
    );
    assert_eq!(channel.inbound_len(), 1);

    assert!(channel.finish_and_release_all().expect("结束应成功"));
    assert!(observer.is_released());
    assert_eq!(channel.inbound_len(), 0);
    assert!(!channel.is_open());
}

#[test]
fn outbound_messages_pass_through_to_the_transport() {
    let channel = EmbeddedChannel::new(Vec::new()).expect("构造应成功");
    let recipient = Endpoint::Socket("127.0.0.1:9000".parse().expect("地址合法"));
    let packet = DatagramPacket::to(ByteBuf::from_slice(b"dgram"), recipient.clone()).expect("收件人存在");

    assert!(channel.write_outbound([buf("first"), packet.into()]).expect("写入应成功"));
    assert_eq!(channel.outbound_len(), 2);
    assert_eq!(text_of(channel.read_outbound().expect("第一条")), "first");
    let datagram = channel
        .read_outbound()
        .expect("第二条")
        .into_datagram()
        .expect("应为数据报");
    assert_eq!(datagram.recipient(), Some(recipient));
    assert_eq!(
        datagram.with_content(|content| content.to_vec()).expect("未释放").expect("可读"),
        b"dgram".to_vec()
    );
    assert!(!channel.finish_and_release_all().expect("结束应成功"));
}

struct Faulty;

impl InboundHandler for Faulty {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        msg.safe_release();
        ctx.fire_exception_caught(ChannelError::Transport("first".into()));
        ctx.fire_exception_caught(ChannelError::Transport("second".into()));
    }
}

#[test]
#[traced_test]
fn only_the_first_exception_is_rethrown() {
    let channel = EmbeddedChannel::new([handler_from_inbound(Arc::new(Faulty))]).expect("构造应成功");
    let error = channel.write_inbound([buf("boom")]).expect_err("应重新抛出异常");
    assert!(matches!(error, ChannelError::Transport(ref reason) if reason == "first"));
    assert!(logs_contain("More than one exception was raised"));
    channel.check_exception().expect("异常只抛出一次");
}

#[test]
fn writes_after_close_fail_and_release() {
    let channel = EmbeddedChannel::new(Vec::new()).expect("构造应成功");
    let closed = channel.close();
    assert!(closed.is_completed());
    assert_eq!(channel.state(), ChannelState::Closed);

    let inbound = ByteBuf::from_slice(b"in");
    let error = channel
        .write_inbound([inbound.duplicate().into()])
        .expect_err("关闭后写入应失败");
    assert!(matches!(error, ChannelError::Closed));
    assert!(inbound.is_released());

    let outbound = ByteBuf::from_slice(b"out");
    let error = channel
        .write_outbound([outbound.duplicate().into()])
        .expect_err("关闭后写入应失败");
    assert!(matches!(error, ChannelError::Closed));
    assert!(outbound.is_released());
    channel.check_exception().expect("失败已被取走");
}

#[test]
fn strict_close_rejects_a_second_close() {
    let settings = ChannelSettings::default().with_strict_close(true);
    let channel = EmbeddedChannel::with_options(false, settings, Vec::new()).expect("构造应成功");
    assert!(channel.close().is_completed());
    let second = channel.close();
    let error = ChannelError::from_task(second.error().expect("第二次关闭应失败"));
    assert!(matches!(error, ChannelError::AlreadyClosed));
}

#[test]
fn lenient_close_is_idempotent() {
    let channel = EmbeddedChannel::new(Vec::new()).expect("构造应成功");
    assert!(channel.close().is_completed());
    block_on(channel.close()).expect("重复关闭默认幂等");
    let closed = channel.channel().closed().expect("关闭句柄只取一次");
    block_on(closed).expect("关闭句柄已完成");
    assert!(channel.channel().closed().is_none());
}

#[test]
fn disconnect_closes_unless_the_transport_supports_it() {
    let channel = EmbeddedChannel::new(Vec::new()).expect("构造应成功");
    assert!(channel.disconnect().is_completed());
    assert!(!channel.is_open());

    let channel = EmbeddedChannel::with_options(true, ChannelSettings::default(), Vec::new()).expect("构造应成功");
    assert!(channel.disconnect().is_completed());
    assert!(channel.is_active());
}

#[derive(Default)]
struct Ticker {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl InboundHandler for Ticker {
    fn on_channel_active(&self, ctx: &dyn Context) {
        if let Some(executor) = ctx.executor() {
            let pipeline = Arc::clone(ctx.pipeline());
            let _ = executor.schedule(
                move || pipeline.fire_user_event(UserEvent::new("tick")),
                Duration::from_millis(10),
            );
        }
        ctx.fire_channel_active();
    }

    fn on_user_event(&self, _ctx: &dyn Context, event: UserEvent) {
        if let Some(label) = event.downcast_ref::<&'static str>() {
            self.events.lock().expect("事件锁").push(*label);
        }
    }
}

#[test]
fn scheduled_events_follow_the_manual_clock() {
    let ticker = Arc::new(Ticker::default());
    let events = Arc::clone(&ticker.events);
    let channel = EmbeddedChannel::new([handler_from_inbound(ticker)]).expect("构造应成功");

    channel.run_pending_tasks();
    assert!(events.lock().expect("事件锁").is_empty());
    assert_eq!(
        channel.run_scheduled_pending_tasks(),
        Some(Ticks::ZERO + Duration::from_millis(10))
    );

    channel.advance_time(Duration::from_millis(10));
    channel.run_pending_tasks();
    assert_eq!(*events.lock().expect("事件锁"), vec!["tick"]);
    assert_eq!(channel.run_scheduled_pending_tasks(), None);
}

#[test]
fn close_cancels_scheduled_work() {
    let ticker = Arc::new(Ticker::default());
    let events = Arc::clone(&ticker.events);
    let channel = EmbeddedChannel::new([handler_from_inbound(ticker)]).expect("构造应成功");
    assert!(channel.event_loop().next_scheduled_task().is_some());

    let _ = channel.close();
    assert_eq!(channel.event_loop().next_scheduled_task(), None);
    channel.advance_time(Duration::from_millis(50));
    channel.run_pending_tasks();
    assert!(events.lock().expect("事件锁").is_empty());
}
