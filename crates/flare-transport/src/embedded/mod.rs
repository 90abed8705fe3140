//! 同步驱动的嵌入式通道，供 handler 单元测试使用。
mod channel;
mod event_loop;

pub use channel::{EmbeddedChannel, EmbeddedTransport};
pub use event_loop::EmbeddedEventLoop;
