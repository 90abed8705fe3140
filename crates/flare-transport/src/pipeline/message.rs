//! 流水线上流动的消息与用户事件。
//!
//! # 设计背景（Why）
//! - 读写路径上绝大多数消息是引用计数资源（缓冲、数据报），少数是编解码后的业务对象；
//!   用一个封闭枚举承载前者、用 `Any` 承载后者，尾端与出站缓冲区即可统一地释放未消费的消息。
//!
//! # 契约（What）
//! - 引用计数变体遵循“谁持有谁释放”：转交给下一个 handler 即转移所有权；
//! - [`PipelineMessage::release`] 对非引用计数变体是无操作，返回 `Ok(false)`。
use core::any::Any;
use core::fmt;
use std::sync::Arc;

use flare_buffer::ByteBuf;
use flare_common::error::Result;
use flare_common::refcount::{ReferenceCounted, safe_release};

use crate::socket::DatagramPacket;

/// 流水线消息。
pub enum PipelineMessage {
    Buffer(ByteBuf),
    Datagram(DatagramPacket),
    User(Box<dyn Any + Send + Sync>),
}

impl PipelineMessage {
    pub fn user<T: Any + Send + Sync>(value: T) -> Self {
        Self::User(Box::new(value))
    }

    /// 引用计数变体的计数视图。
    pub fn as_reference_counted(&self) -> Option<&dyn ReferenceCounted> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            Self::Datagram(packet) => Some(packet),
            Self::User(_) => None,
        }
    }

    pub fn retain(&self) -> Result<()> {
        match self.as_reference_counted() {
            Some(resource) => resource.retain(),
            None => Ok(()),
        }
    }

    pub fn release(&self) -> Result<bool> {
        match self.as_reference_counted() {
            Some(resource) => resource.release(),
            None => Ok(false),
        }
    }

    /// 释放并吞掉错误（记录告警），用于丢弃路径。
    pub fn safe_release(self) {
        if let Some(resource) = self.as_reference_counted() {
            safe_release(resource);
        }
    }

    pub fn as_buffer(&self) -> Option<&ByteBuf> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn into_buffer(self) -> core::result::Result<ByteBuf, Self> {
        match self {
            Self::Buffer(buffer) => Ok(buffer),
            other => Err(other),
        }
    }

    pub fn into_datagram(self) -> core::result::Result<DatagramPacket, Self> {
        match self {
            Self::Datagram(packet) => Ok(packet),
            other => Err(other),
        }
    }

    pub fn downcast_user<T: Any>(&self) -> Option<&T> {
        match self {
            Self::User(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<ByteBuf> for PipelineMessage {
    fn from(buffer: ByteBuf) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<DatagramPacket> for PipelineMessage {
    fn from(packet: DatagramPacket) -> Self {
        Self::Datagram(packet)
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(buffer).finish(),
            Self::Datagram(packet) => f.debug_tuple("Datagram").field(packet).finish(),
            Self::User(_) => f.write_str("User(..)"),
        }
    }
}

/// 用户自定义事件，沿入站方向传播。
#[derive(Clone)]
pub struct UserEvent(Arc<dyn Any + Send + Sync>);

impl UserEvent {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserEvent(..)")
    }
}
