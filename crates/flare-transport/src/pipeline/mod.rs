//! Pipeline：通道上有序的 handler 链。
//!
//! - `handler`：入站/出站 handler 契约与统一槽位封装；
//! - `context`：handler 回调拿到的上下文，负责相对转发；
//! - `pipeline`：写时复制的链路、调度与 panic 兜底；
//! - `unhandled`：链尾策略；
//! - `initializer`：注册时装配链路的一次性 handler。
mod context;
mod event;
mod handler;
mod initializer;
mod message;
#[allow(clippy::module_inception)]
mod pipeline;
mod unhandled;

pub use context::Context;
pub use handler::{
    Handler, HandlerDirection, InboundHandler, OutboundHandler, handler_from_duplex, handler_from_inbound,
    handler_from_outbound,
};
pub use initializer::ChannelInitializer;
pub use message::{PipelineMessage, UserEvent};
pub use pipeline::ChannelPipeline;
pub use unhandled::{PolicySink, UnhandledPolicy, UnhandledSink};
