//! 流水线调度：事件顺序、链路变更、panic 兜底与初始化器。
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flare_buffer::{BufferPoolSettings, ByteBuf, PooledByteBufAllocator};
use flare_common::concurrency::Promise;
use flare_transport::pipeline::{
    ChannelInitializer, Context, Handler, InboundHandler, OutboundHandler, PipelineMessage, handler_from_duplex,
    handler_from_inbound,
};
use flare_transport::{ChannelError, EmbeddedChannel};
use proptest::prelude::*;

type Journal = Arc<Mutex<Vec<String>>>;

fn buf(text: &str) -> PipelineMessage {
    ByteBuf::from_slice(text.as_bytes()).into()
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("日志锁").clone()
}

struct Tracer {
    label: &'static str,
    journal: Journal,
}

impl Tracer {
    fn handler(label: &'static str, journal: &Journal) -> Arc<dyn Handler> {
        handler_from_duplex(Arc::new(Self {
            label,
            journal: Arc::clone(journal),
        }))
    }

    fn note(&self, direction: &str) {
        self.journal
            .lock()
            .expect("日志锁")
            .push(format!("{direction}:{}", self.label));
    }
}

impl InboundHandler for Tracer {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        self.note("in");
        ctx.fire_read(msg);
    }
}

impl OutboundHandler for Tracer {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage, promise: Promise<()>) {
        self.note("out");
        ctx.write_with(msg, promise);
    }
}

#[test]
fn inbound_runs_head_to_tail_and_outbound_tail_to_head() {
    let journal = Journal::default();
    let channel = EmbeddedChannel::new(["A", "B", "C"].map(|label| Tracer::handler(label, &journal)))
        .expect("构造应成功");

    assert!(channel.write_inbound([buf("x")]).expect("入站写入应成功"));
    assert!(channel.write_outbound([buf("y")]).expect("出站写入应成功"));
    assert_eq!(entries(&journal), ["in:A", "in:B", "in:C", "out:C", "out:B", "out:A"]);
    assert!(channel.finish_and_release_all().expect("结束应成功"));
}

static LABELS: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

proptest! {
    #[test]
    fn dispatch_order_mirrors_registration_order(count in 1usize..=8) {
        let journal = Journal::default();
        let labels = &LABELS[..count];
        let channel = EmbeddedChannel::new(labels.iter().map(|label| Tracer::handler(*label, &journal)))
            .expect("构造应成功");
        channel.write_inbound([buf("x")]).expect("入站写入应成功");
        channel.write_outbound([buf("y")]).expect("出站写入应成功");

        let expected: Vec<String> = labels
            .iter()
            .map(|label| format!("in:{label}"))
            .chain(labels.iter().rev().map(|label| format!("out:{label}")))
            .collect();
        prop_assert_eq!(entries(&journal), expected);
        prop_assert!(channel.finish_and_release_all().expect("结束应成功"));
    }
}

struct Passthrough;

impl InboundHandler for Passthrough {}

fn passthrough() -> Arc<dyn Handler> {
    handler_from_inbound(Arc::new(Passthrough))
}

#[test]
fn names_are_unique_and_mutations_keep_order() {
    let channel = EmbeddedChannel::new([passthrough()]).expect("构造应成功");
    let pipeline = channel.pipeline();
    assert_eq!(pipeline.names(), ["handler-0"]);

    let error = pipeline.add_last("handler-0", passthrough()).expect_err("名称重复");
    assert!(matches!(error, ChannelError::DuplicateHandler(ref name) if name == "handler-0"));

    pipeline.add_before("handler-0", "first", passthrough()).expect("插入应成功");
    pipeline.add_after("handler-0", "last", passthrough()).expect("插入应成功");
    assert_eq!(pipeline.names(), ["first", "handler-0", "last"]);

    pipeline.replace("handler-0", "middle", passthrough()).expect("替换应成功");
    assert_eq!(pipeline.names(), ["first", "middle", "last"]);
    let error = pipeline.replace("first", "last", passthrough()).map(|_| ()).expect_err("新名称重复");
    assert!(matches!(error, ChannelError::DuplicateHandler(_)));

    pipeline.remove("middle").expect("移除应成功");
    assert!(!pipeline.contains("middle"));
    let error = pipeline.remove("missing").map(|_| ()).expect_err("不存在的名称");
    assert!(matches!(error, ChannelError::HandlerNotFound(ref name) if name == "missing"));
    let error = pipeline.add_before("missing", "x", passthrough()).expect_err("基准不存在");
    assert!(matches!(error, ChannelError::HandlerNotFound(_)));
    assert_eq!(pipeline.len(), 2);
}

struct Lifecycle {
    journal: Journal,
}

impl Lifecycle {
    fn note(&self, event: &str) {
        self.journal.lock().expect("日志锁").push(event.to_owned());
    }
}

impl InboundHandler for Lifecycle {
    fn on_handler_added(&self, _ctx: &dyn Context) {
        self.note("added");
    }

    fn on_handler_removed(&self, _ctx: &dyn Context) {
        self.note("removed");
    }

    fn on_channel_registered(&self, ctx: &dyn Context) {
        self.note("registered");
        ctx.fire_channel_registered();
    }

    fn on_channel_active(&self, ctx: &dyn Context) {
        self.note("active");
        ctx.fire_channel_active();
    }

    fn on_channel_inactive(&self, ctx: &dyn Context) {
        self.note("inactive");
        ctx.fire_channel_inactive();
    }

    fn on_channel_unregistered(&self, ctx: &dyn Context) {
        self.note("unregistered");
        ctx.fire_channel_unregistered();
    }
}

#[test]
fn lifecycle_events_arrive_in_order() {
    let journal = Journal::default();
    let lifecycle = Arc::new(Lifecycle {
        journal: Arc::clone(&journal),
    });
    let channel = EmbeddedChannel::new([handler_from_inbound(lifecycle)]).expect("构造应成功");
    assert_eq!(entries(&journal), ["added", "registered", "active"]);
    assert!(!channel.pipeline().contains("initializer"));

    assert!(!channel.finish().expect("结束应成功"));
    assert_eq!(
        entries(&journal),
        ["added", "registered", "active", "inactive", "unregistered"]
    );

    channel.pipeline().remove("handler-0").expect("移除应成功");
    assert_eq!(entries(&journal).last().map(String::as_str), Some("removed"));
}

struct Panicky;

impl InboundHandler for Panicky {
    fn on_read(&self, _ctx: &dyn Context, msg: PipelineMessage) {
        msg.safe_release();
        panic!("boom");
    }
}

#[test]
fn a_panicking_handler_becomes_an_exception() {
    let channel = EmbeddedChannel::new([handler_from_inbound(Arc::new(Panicky))]).expect("构造应成功");
    let error = channel.write_inbound([buf("x")]).expect_err("panic 应转为异常");
    match error {
        ChannelError::HandlerPanicked { handler, message } => {
            assert_eq!(handler, "handler-0");
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(channel.is_active());
}

struct PanickyWriter;

impl OutboundHandler for PanickyWriter {
    fn on_write(&self, _ctx: &dyn Context, msg: PipelineMessage, _promise: Promise<()>) {
        msg.safe_release();
        panic!("write failed");
    }
}

#[test]
fn an_outbound_panic_fails_the_write() {
    let channel = EmbeddedChannel::new([flare_transport::pipeline::handler_from_outbound(Arc::new(PanickyWriter))])
        .expect("构造应成功");
    let error = channel.write_outbound([buf("x")]).expect_err("写入应失败");
    assert!(matches!(error, ChannelError::HandlerPanicked { .. }));
    assert_eq!(channel.outbound_len(), 0);
}

struct PanicsHolding;

impl InboundHandler for PanicsHolding {
    fn on_read(&self, _ctx: &dyn Context, _msg: PipelineMessage) {
        panic!("lost the message");
    }
}

#[test]
fn a_message_abandoned_by_a_panic_returns_its_pooled_storage() {
    let allocator = PooledByteBufAllocator::new(BufferPoolSettings::default()).expect("配置合法");
    let channel = EmbeddedChannel::new([handler_from_inbound(Arc::new(PanicsHolding))]).expect("构造应成功");
    let error = channel
        .write_inbound([PipelineMessage::from(allocator.buffer_from(b"INVITE"))])
        .expect_err("panic 应转为异常");
    assert!(matches!(error, ChannelError::HandlerPanicked { .. }));
    assert_eq!(allocator.pooled(), 1, "未释放的池化存储应在句柄析构时归还");
}

#[derive(Default)]
struct OneShot {
    seen: AtomicUsize,
}

impl InboundHandler for OneShot {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        ctx.pipeline().remove(ctx.name()).expect("移除自身应成功");
        ctx.fire_read(msg);
    }
}

#[test]
fn a_handler_can_remove_itself_mid_event() {
    let journal = Journal::default();
    let one_shot = Arc::new(OneShot::default());
    let channel = EmbeddedChannel::new([
        handler_from_inbound(Arc::clone(&one_shot) as Arc<dyn InboundHandler>),
        Tracer::handler("tail", &journal),
    ])
    .expect("构造应成功");

    channel.write_inbound([buf("a")]).expect("写入应成功");
    channel.write_inbound([buf("b")]).expect("写入应成功");
    assert_eq!(one_shot.seen.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&journal), ["in:tail", "in:tail"]);
    assert_eq!(channel.pipeline().names(), ["handler-1"]);
    assert_eq!(channel.inbound_len(), 2);
    assert!(channel.finish_and_release_all().expect("结束应成功"));
}

#[test]
fn a_nested_initializer_installs_handlers_once() {
    let journal = Journal::default();
    let installs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&installs);
    let setup_journal = Arc::clone(&journal);
    let initializer = ChannelInitializer::new(move |pipeline| {
        counter.fetch_add(1, Ordering::SeqCst);
        pipeline.add_last("tracer", Tracer::handler("nested", &setup_journal))
    });
    let channel = EmbeddedChannel::new([handler_from_inbound(initializer)]).expect("构造应成功");

    assert_eq!(installs.load(Ordering::SeqCst), 1);
    assert_eq!(channel.pipeline().names(), ["tracer"]);
    channel.write_inbound([buf("z")]).expect("写入应成功");
    assert_eq!(entries(&journal), ["in:nested"]);
    assert!(channel.finish_and_release_all().expect("结束应成功"));
}

#[test]
fn a_failing_initializer_closes_the_channel() {
    let initializer = ChannelInitializer::new(|_pipeline| Err(ChannelError::Transport("bad setup".into())));
    let channel = EmbeddedChannel::new([handler_from_inbound(initializer)]).expect("注册本身应成功");

    assert!(!channel.is_open());
    let error = channel.check_exception().expect_err("装配失败应被记录");
    assert!(matches!(error, ChannelError::Transport(ref reason) if reason == "bad setup"));
}
