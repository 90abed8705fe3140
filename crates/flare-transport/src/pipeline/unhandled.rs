//! 流水线尾端策略。
//!
//! # 设计背景（Why）
//! - 入站消息或异常走到链尾仍未被消费，几乎总是 handler 链装配错误的信号；
//!   静默丢弃会让问题无从排查，因此尾端必须执行一个可配置的终结动作。
//!
//! # 契约（What）
//! - `Log`：记录告警并释放消息；
//! - `Queue`：缓存消息与异常，供调用方取出检查；
//! - `Raise`：消息按 `Log` 处理，异常被记录下来，下一次 [`PolicySink::check`] 重新抛出。
use std::collections::VecDeque;
use std::sync::Arc;

use flare_common::logging::{self, Logger};
use serde::Deserialize;

use super::message::{PipelineMessage, UserEvent};
use crate::error::ChannelError;

/// 尾端策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnhandledPolicy {
    #[default]
    Log,
    Queue,
    Raise,
}

/// 流水线尾端的接收者。
///
/// 通道可以安装自己的实现，例如嵌入式通道把尾端消息放进入站队列。
#[allow(unused_variables)]
pub trait UnhandledSink: Send + Sync + 'static {
    fn on_unhandled_message(&self, message: PipelineMessage);

    fn on_unhandled_exception(&self, error: ChannelError);

    fn on_unhandled_user_event(&self, event: UserEvent) {}
}

/// 按 [`UnhandledPolicy`] 处理尾端事件的默认接收者。
pub struct PolicySink {
    policy: UnhandledPolicy,
    messages: spin::Mutex<VecDeque<PipelineMessage>>,
    exceptions: spin::Mutex<VecDeque<ChannelError>>,
    logger: Arc<dyn Logger>,
}

impl PolicySink {
    pub fn new(policy: UnhandledPolicy) -> Self {
        Self {
            policy,
            messages: spin::Mutex::new(VecDeque::new()),
            exceptions: spin::Mutex::new(VecDeque::new()),
            logger: logging::logger("flare.pipeline.tail"),
        }
    }

    pub fn policy(&self) -> UnhandledPolicy {
        self.policy
    }

    /// 取出一条缓存的消息（仅 `Queue` 策略会缓存）。
    pub fn take_message(&self) -> Option<PipelineMessage> {
        self.messages.lock().pop_front()
    }

    /// 取出一条缓存的异常（`Queue` 与 `Raise` 策略会缓存）。
    pub fn take_exception(&self) -> Option<ChannelError> {
        self.exceptions.lock().pop_front()
    }

    /// `Raise` 策略下重新抛出最早记录的异常。
    pub fn check(&self) -> Result<(), ChannelError> {
        if self.policy != UnhandledPolicy::Raise {
            return Ok(());
        }
        match self.take_exception() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// 释放全部缓存的消息，返回是否存在缓存。
    pub fn release_all(&self) -> bool {
        let drained: Vec<_> = self.messages.lock().drain(..).collect();
        let had_any = !drained.is_empty();
        for message in drained {
            message.safe_release();
        }
        had_any
    }

    fn discard(&self, message: PipelineMessage) {
        if self.logger.is_enabled(logging::LogSeverity::Debug) {
            self.logger.debug(&format!(
                "discarded inbound message {message:?} that reached the tail of the pipeline"
            ));
        }
        message.safe_release();
    }
}

impl UnhandledSink for PolicySink {
    fn on_unhandled_message(&self, message: PipelineMessage) {
        match self.policy {
            UnhandledPolicy::Queue => self.messages.lock().push_back(message),
            UnhandledPolicy::Log | UnhandledPolicy::Raise => self.discard(message),
        }
    }

    fn on_unhandled_exception(&self, error: ChannelError) {
        match self.policy {
            UnhandledPolicy::Log => self.logger.warn_with(
                "an exception reached the tail of the pipeline; no handler dealt with it",
                &error,
            ),
            UnhandledPolicy::Queue | UnhandledPolicy::Raise => self.exceptions.lock().push_back(error),
        }
    }
}

impl Default for PolicySink {
    fn default() -> Self {
        Self::new(UnhandledPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_buffer::ByteBuf;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn log_policy_releases_and_reports() {
        let sink = PolicySink::new(UnhandledPolicy::Log);
        let observer = ByteBuf::from_slice(b"lost");
        sink.on_unhandled_message(observer.duplicate().into());
        sink.on_unhandled_exception(ChannelError::Transport("reset".into()));
        assert!(observer.is_released());
        assert!(sink.take_exception().is_none());
        assert!(logs_contain("reached the tail of the pipeline"));
    }

    #[test]
    fn queue_policy_buffers_for_inspection() {
        let sink = PolicySink::new(UnhandledPolicy::Queue);
        sink.on_unhandled_message(PipelineMessage::user(1_u8));
        sink.on_unhandled_exception(ChannelError::Closed);
        assert!(sink.check().is_ok());
        assert_eq!(sink.take_message().expect("消息应被缓存").downcast_user::<u8>(), Some(&1));
        assert!(matches!(sink.take_exception(), Some(ChannelError::Closed)));
    }

    #[test]
    fn raise_policy_rethrows_on_check() {
        let sink = PolicySink::new(UnhandledPolicy::Raise);
        sink.on_unhandled_exception(ChannelError::NotRegistered);
        assert!(matches!(sink.check(), Err(ChannelError::NotRegistered)));
        assert!(sink.check().is_ok());
    }
}
