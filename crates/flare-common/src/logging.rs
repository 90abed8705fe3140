//! 分级日志能力。
//!
//! # 设计背景（Why）
//! - 运行时核心只在异常与诊断路径上输出日志（任务 panic、尾部丢弃的消息、重复异常等），
//!   不应绑死某个日志后端；
//! - 默认实现桥接到 `tracing`，宿主只需安装 `tracing-subscriber` 即可看到输出；
//!   对日志完全无感的场景可注入 [`NoopLogger`]。
//!
//! # 契约（What）
//! - [`Logger::is_enabled`] 必须廉价，调用方在拼装昂贵消息前先行判断；
//! - [`Logger::log`] 不得 panic，也不得阻塞事件循环；
//! - 进程级工厂只能设置一次，之后的 [`logger`] 调用都经由该工厂。
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::Level;

/// 日志级别。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分级日志接口。
pub trait Logger: Send + Sync + 'static {
    /// 日志器名称，通常为组件路径。
    fn name(&self) -> &str;

    /// 判断给定级别是否会被输出。
    fn is_enabled(&self, severity: LogSeverity) -> bool;

    /// 输出一条日志，`error` 为可选的关联错误。
    fn log(&self, severity: LogSeverity, message: &str, error: Option<&(dyn StdError + 'static)>);

    fn trace(&self, message: &str) {
        self.log(LogSeverity::Trace, message, None);
    }

    fn debug(&self, message: &str) {
        self.log(LogSeverity::Debug, message, None);
    }

    fn info(&self, message: &str) {
        self.log(LogSeverity::Info, message, None);
    }

    fn warn(&self, message: &str) {
        self.log(LogSeverity::Warn, message, None);
    }

    fn warn_with(&self, message: &str, error: &(dyn StdError + 'static)) {
        self.log(LogSeverity::Warn, message, Some(error));
    }

    fn error(&self, message: &str) {
        self.log(LogSeverity::Error, message, None);
    }

    fn error_with(&self, message: &str, error: &(dyn StdError + 'static)) {
        self.log(LogSeverity::Error, message, Some(error));
    }
}

macro_rules! emit {
    ($level:expr, $name:expr, $message:expr, $error:expr) => {
        tracing::event!(
            $level,
            logger = $name,
            error = $error,
            "{}",
            $message
        )
    };
}

/// 桥接到 `tracing` 的默认日志器。
///
/// `is_enabled` 直接询问当前订阅者，未安装订阅者时所有级别均视为关闭。
#[derive(Clone, Debug)]
pub struct TracingLogger {
    name: Cow<'static, str>,
}

impl TracingLogger {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into() }
    }
}

impl Logger for TracingLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self, severity: LogSeverity) -> bool {
        match severity {
            LogSeverity::Trace => tracing::enabled!(Level::TRACE),
            LogSeverity::Debug => tracing::enabled!(Level::DEBUG),
            LogSeverity::Info => tracing::enabled!(Level::INFO),
            LogSeverity::Warn => tracing::enabled!(Level::WARN),
            LogSeverity::Error => tracing::enabled!(Level::ERROR),
        }
    }

    fn log(&self, severity: LogSeverity, message: &str, error: Option<&(dyn StdError + 'static)>) {
        let error_text = error.map(ToString::to_string);
        let error_text = error_text.as_deref();
        let name: &str = &self.name;
        match severity {
            LogSeverity::Trace => emit!(Level::TRACE, name, message, error_text),
            LogSeverity::Debug => emit!(Level::DEBUG, name, message, error_text),
            LogSeverity::Info => emit!(Level::INFO, name, message, error_text),
            LogSeverity::Warn => emit!(Level::WARN, name, message, error_text),
            LogSeverity::Error => emit!(Level::ERROR, name, message, error_text),
        }
    }
}

/// 空日志器：所有级别关闭，所有输出均被丢弃。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn name(&self) -> &str {
        "noop"
    }

    fn is_enabled(&self, _severity: LogSeverity) -> bool {
        false
    }

    fn log(&self, _severity: LogSeverity, _message: &str, _error: Option<&(dyn StdError + 'static)>) {}
}

/// 按名称创建日志器的工厂。
pub trait LoggerFactory: Send + Sync + 'static {
    fn logger(&self, name: &str) -> Arc<dyn Logger>;
}

/// 生成 [`TracingLogger`] 的默认工厂。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLoggerFactory;

impl LoggerFactory for TracingLoggerFactory {
    fn logger(&self, name: &str) -> Arc<dyn Logger> {
        Arc::new(TracingLogger::new(name.to_owned()))
    }
}

/// 生成 [`NoopLogger`] 的工厂。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLoggerFactory;

impl LoggerFactory for NoopLoggerFactory {
    fn logger(&self, _name: &str) -> Arc<dyn Logger> {
        Arc::new(NoopLogger)
    }
}

static FACTORY: OnceLock<Arc<dyn LoggerFactory>> = OnceLock::new();

/// 安装进程级日志工厂；已安装过（包括已被默认初始化）时原样返回传入的工厂。
pub fn set_logger_factory(
    factory: Arc<dyn LoggerFactory>,
) -> core::result::Result<(), Arc<dyn LoggerFactory>> {
    FACTORY.set(factory)
}

/// 通过进程级工厂获取日志器，未安装时使用 [`TracingLoggerFactory`]。
pub fn logger(name: &str) -> Arc<dyn Logger> {
    FACTORY
        .get_or_init(|| Arc::new(TracingLoggerFactory))
        .logger(name)
}
