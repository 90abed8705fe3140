//! 传输层错误。
//!
//! # 设计背景（Why）
//! - 通道生命周期、流水线装配与传输原语各有失败路径，需要统一的错误类型才能经由
//!   出站完成句柄与 `exceptionCaught` 两条路径传播；
//! - 与 `flare-common` 相同，每个变体对应一个稳定错误码，便于日志检索。
//!
//! # 契约（What）
//! - [`ChannelError`] 可 `Clone`，因为同一故障可能同时写入完成句柄并沿流水线传递；
//! - 通过完成句柄传播时包装为 [`TaskError::Failed`]，可用 [`ChannelError::from_task`] 还原。
use flare_common::{CommonError, TaskError};
use thiserror::Error;

/// 稳定错误码。
pub mod codes {
    pub const CHANNEL_CLOSED: &str = "channel.closed";
    pub const CHANNEL_ALREADY_CLOSED: &str = "channel.already_closed";
    pub const CHANNEL_NOT_REGISTERED: &str = "channel.not_registered";
    pub const CHANNEL_ALREADY_REGISTERED: &str = "channel.already_registered";
    pub const PIPELINE_DUPLICATE_HANDLER: &str = "pipeline.duplicate_handler";
    pub const PIPELINE_HANDLER_NOT_FOUND: &str = "pipeline.handler_not_found";
    pub const PIPELINE_HANDLER_PANICKED: &str = "pipeline.handler_panicked";
    pub const TRANSPORT_FAILED: &str = "transport.failed";
    pub const RESOLVE_FAILED: &str = "resolve.failed";
}

/// 通道、流水线与传输原语的统一错误。
#[derive(Clone, Debug, Error)]
pub enum ChannelError {
    /// 通道已关闭，写入或其他出站操作被拒绝。
    #[error("channel is closed")]
    Closed,

    /// 严格关闭语义下对已关闭通道再次调用 close。
    #[error("channel was already closed")]
    AlreadyClosed,

    #[error("channel is not registered with an event loop")]
    NotRegistered,

    #[error("channel is already registered with an event loop")]
    AlreadyRegistered,

    #[error("duplicate handler name `{0}`")]
    DuplicateHandler(String),

    #[error("no handler named `{0}`")]
    HandlerNotFound(String),

    /// Handler 方法 panic，已被流水线捕获。
    #[error("handler `{handler}` panicked: {message}")]
    HandlerPanicked { handler: String, message: String },

    /// 传输原语失败，携带具体原因。
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("name resolution failed: {0}")]
    Resolve(String),

    #[error(transparent)]
    Task(TaskError),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl ChannelError {
    /// 返回稳定错误码；包装的下层错误沿用其自身的错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Closed => codes::CHANNEL_CLOSED,
            Self::AlreadyClosed => codes::CHANNEL_ALREADY_CLOSED,
            Self::NotRegistered => codes::CHANNEL_NOT_REGISTERED,
            Self::AlreadyRegistered => codes::CHANNEL_ALREADY_REGISTERED,
            Self::DuplicateHandler(_) => codes::PIPELINE_DUPLICATE_HANDLER,
            Self::HandlerNotFound(_) => codes::PIPELINE_HANDLER_NOT_FOUND,
            Self::HandlerPanicked { .. } => codes::PIPELINE_HANDLER_PANICKED,
            Self::Transport(_) => codes::TRANSPORT_FAILED,
            Self::Resolve(_) => codes::RESOLVE_FAILED,
            Self::Task(error) => error.code(),
            Self::Common(error) => error.code(),
        }
    }

    /// 转换为可写入完成句柄的故障。
    pub fn into_task_error(self) -> TaskError {
        match self {
            Self::Task(error) => error,
            other => TaskError::failed(other),
        }
    }

    /// 从完成句柄的故障还原通道错误。
    pub fn from_task(error: TaskError) -> Self {
        if let TaskError::Failed(inner) = &error
            && let Some(channel) = inner.downcast_ref::<ChannelError>()
        {
            return channel.clone();
        }
        Self::Task(error)
    }
}

impl From<TaskError> for ChannelError {
    fn from(error: TaskError) -> Self {
        Self::from_task(error)
    }
}

/// 传输层结果别名。
pub type Result<T, E = ChannelError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_errors_survive_a_completion_round_trip() {
        let task = ChannelError::Closed.into_task_error();
        assert_eq!(task.code(), flare_common::error::codes::TASK_FAILED);
        let restored = ChannelError::from_task(task);
        assert!(matches!(restored, ChannelError::Closed));
        assert_eq!(restored.code(), codes::CHANNEL_CLOSED);
    }

    #[test]
    fn wrapped_errors_keep_their_codes() {
        let cancelled = ChannelError::from(TaskError::Cancelled);
        assert_eq!(cancelled.code(), flare_common::error::codes::TASK_CANCELLED);
        assert!(matches!(cancelled.clone().into_task_error(), TaskError::Cancelled));
        let common = ChannelError::from(CommonError::IllegalReferenceCount { count: 0, delta: -1 });
        assert_eq!(common.code(), flare_common::error::codes::REFCOUNT_ILLEGAL);
    }
}
