use crate::address::Endpoint;
use crate::error::{ChannelError, Result};

use super::ChannelMetadata;
use super::outbound::OutboundBuffer;

/// 具体传输实现的原语。
///
/// # 设计背景（Why）
/// - 生命周期编排（状态迁移、事件触发、出站缓冲）对所有传输都一样，
///   差异只在“真正做 I/O 的那几步”，因此传输只需实现本 trait，交给 [`AbstractChannel`] 驱动。
///
/// # 契约（What）
/// - 所有方法只会在通道绑定的事件循环上被调用，不会并发；
/// - 原语不得阻塞事件循环，需要等待的 I/O 应以非阻塞方式发起并通过 `execute` 续作；
/// - [`do_write`](Self::do_write) 每次调用只处理调用时已冲刷的条目：
///   消费一条就 `remove` 一条，不能假设之后的写入同步可见。
///
/// [`AbstractChannel`]: super::AbstractChannel
pub trait Transport: Send + Sync + 'static {
    fn metadata(&self) -> ChannelMetadata {
        ChannelMetadata::default()
    }

    fn do_register(&self) -> Result<()>;

    fn do_bind(&self, local: &Endpoint) -> Result<()>;

    fn do_connect(&self, remote: &Endpoint, local: Option<&Endpoint>) -> Result<()> {
        let _ = local;
        Err(ChannelError::Transport(format!("connect to {remote} is not supported by this transport")))
    }

    fn do_disconnect(&self) -> Result<()>;

    fn do_close(&self) -> Result<()>;

    fn do_begin_read(&self) -> Result<()>;

    fn do_write(&self, buffer: &mut OutboundBuffer) -> Result<()>;
}
