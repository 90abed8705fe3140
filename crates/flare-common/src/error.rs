//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义运行时基础设施的错误语义：引用计数违规、参数违规、配置错误以及任务故障；
//! - 每个变体对应一个稳定错误码（见 [`codes`]），便于日志检索与上层映射。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 [`thiserror::Error`]，可 `Clone` 并跨线程传播；
//! - 引用计数违规属于调用方逻辑错误，不可重试，且触发操作不得改变资源状态；
//! - 任务故障（[`TaskError`]）只通过完成句柄报告，永远不会中断事件循环。
use std::borrow::Cow;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// 稳定错误码，遵循 `<领域>.<语义>` 命名约定。
pub mod codes {
    /// 引用计数非法变更（过度释放、归零后复活、溢出）。
    pub const REFCOUNT_ILLEGAL: &str = "refcount.illegal";
    /// 参数前置条件违规。
    pub const ARGUMENT_INVALID: &str = "argument.invalid";
    /// 配置解析或校验失败。
    pub const CONFIG_INVALID: &str = "config.invalid";
    /// 任务在运行前被取消。
    pub const TASK_CANCELLED: &str = "task.cancelled";
    /// 任务体发生 panic。
    pub const TASK_PANICKED: &str = "task.panicked";
    /// 任务体返回错误。
    pub const TASK_FAILED: &str = "task.failed";
    /// 执行器已终止，任务未被接受。
    pub const EXECUTOR_TERMINATED: &str = "executor.terminated";
}

/// 基础设施层的通用错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommonError {
    /// 引用计数非法变更。
    ///
    /// - **契约 (What)**：`count` 为观测到的计数，`delta` 为请求的增减量（释放为负数）；
    ///   触发该错误时资源状态保持不变。
    #[error("illegal reference count: {count}, delta: {delta}")]
    IllegalReferenceCount { count: usize, delta: i64 },

    /// 参数不满足前置条件，例如非正的 retain/release 增量或零周期。
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: Cow<'static, str>,
    },

    /// 配置文本无法解析或取值非法。
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CommonError {
    /// 便捷构造参数错误。
    pub fn invalid_argument(name: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalReferenceCount { .. } => codes::REFCOUNT_ILLEGAL,
            Self::InvalidArgument { .. } => codes::ARGUMENT_INVALID,
            Self::Config(_) => codes::CONFIG_INVALID,
        }
    }
}

/// 完成句柄携带的故障原因。
///
/// # 契约（What）
/// - `Cancelled`：任务在开始执行前被取消；
/// - `Panicked`：任务体 panic，携带 panic 负载中的文本；
/// - `Failed`：任务体返回的错误，以 `Arc` 共享以保持 `Clone`；
/// - `ExecutorTerminated`：执行器已经终止，任务未被执行。
#[derive(Clone, Debug, Error)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync>),
    #[error("executor has terminated")]
    ExecutorTerminated,
}

impl TaskError {
    /// 将任意错误包装为 [`TaskError::Failed`]。
    pub fn failed<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Cancelled => codes::TASK_CANCELLED,
            Self::Panicked(_) => codes::TASK_PANICKED,
            Self::Failed(_) => codes::TASK_FAILED,
            Self::ExecutorTerminated => codes::EXECUTOR_TERMINATED,
        }
    }

    /// 从 `catch_unwind` 的负载中提取可读信息。
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

/// 提取 panic 负载中的文本；非字符串负载给出固定描述。
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

impl From<CommonError> for TaskError {
    fn from(error: CommonError) -> Self {
        Self::failed(error)
    }
}

/// 基础设施层的 `Result` 别名。
pub type Result<T, E = CommonError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let error = CommonError::IllegalReferenceCount { count: 0, delta: -1 };
        assert_eq!(error.code(), codes::REFCOUNT_ILLEGAL);
        assert_eq!(error.to_string(), "illegal reference count: 0, delta: -1");
        assert_eq!(
            CommonError::invalid_argument("increment", "must be positive").code(),
            codes::ARGUMENT_INVALID
        );
        assert_eq!(TaskError::Cancelled.code(), codes::TASK_CANCELLED);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert!(matches!(TaskError::from_panic(payload), TaskError::Panicked(m) if m == "boom"));
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert!(matches!(TaskError::from_panic(payload), TaskError::Panicked(m) if m == "owned"));
    }
}
