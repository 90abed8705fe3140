use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::context::Context;
use super::handler::InboundHandler;
use super::pipeline::ChannelPipeline;
use crate::error::Result;

type Setup = dyn Fn(&Arc<ChannelPipeline>) -> Result<()> + Send + Sync;

/// 注册时装配流水线、随后移除自身的入站 handler。
///
/// # 逻辑（How）
/// - 通道已注册时在 `on_handler_added` 中立即装配，否则等到 `on_channel_registered`；
/// - 装配闭包只运行一次；装配完成后先把 registered 事件转发给新加入的 handler，再移除自身；
/// - 装配失败时把错误交给后续 handler 并关闭通道。
pub struct ChannelInitializer {
    setup: Box<Setup>,
    initialized: AtomicBool,
}

impl ChannelInitializer {
    pub fn new<F>(setup: F) -> Arc<Self>
    where
        F: Fn(&Arc<ChannelPipeline>) -> Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            setup: Box::new(setup),
            initialized: AtomicBool::new(false),
        })
    }

    /// 返回本次调用是否真正执行了装配。
    fn initialize(&self, ctx: &dyn Context) -> bool {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(error) = (self.setup)(ctx.pipeline()) {
            ctx.fire_exception_caught(error);
            let _ = ctx.close();
        }
        true
    }

    fn remove_self(&self, ctx: &dyn Context) {
        if let Err(error) = ctx.pipeline().remove(ctx.name()) {
            ctx.logger().warn_with("failed to remove channel initializer", &error);
        }
    }
}

impl InboundHandler for ChannelInitializer {
    fn on_handler_added(&self, ctx: &dyn Context) {
        let registered = ctx.channel().is_some_and(|channel| channel.is_registered());
        if registered && self.initialize(ctx) {
            self.remove_self(ctx);
        }
    }

    fn on_channel_registered(&self, ctx: &dyn Context) {
        let initialized_now = self.initialize(ctx);
        ctx.fire_channel_registered();
        if initialized_now {
            self.remove_self(ctx);
        }
    }
}
