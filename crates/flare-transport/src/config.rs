//! 通道配置。
use flare_common::error::CommonError;
use serde::Deserialize;

use crate::error::Result;
use crate::pipeline::UnhandledPolicy;

/// 通道生命周期与流水线尾端的可调参数。
///
/// # 契约（What）
/// - `strict_close = true` 时，对已关闭通道再次 `close` 以 [`ChannelError::AlreadyClosed`]
///   失败；默认关闭是幂等的，重复调用直接完成；
/// - `unhandled` 决定流到尾端仍未被消费的消息与异常如何处理，默认记录日志并释放。
///
/// [`ChannelError::AlreadyClosed`]: crate::ChannelError::AlreadyClosed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSettings {
    strict_close: bool,
    unhandled: UnhandledPolicy,
}

impl ChannelSettings {
    pub const fn new(strict_close: bool, unhandled: UnhandledPolicy) -> Self {
        Self { strict_close, unhandled }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|error| CommonError::Config(error.to_string()).into())
    }

    pub const fn strict_close(&self) -> bool {
        self.strict_close
    }

    pub const fn unhandled(&self) -> UnhandledPolicy {
        self.unhandled
    }

    pub const fn with_strict_close(mut self, strict_close: bool) -> Self {
        self.strict_close = strict_close;
        self
    }

    pub const fn with_unhandled(mut self, unhandled: UnhandledPolicy) -> Self {
        self.unhandled = unhandled;
        self
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::new(false, UnhandledPolicy::Log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_names() {
        let settings = ChannelSettings::from_toml_str("strict_close = true\nunhandled = \"queue\"").expect("解析应成功");
        assert!(settings.strict_close());
        assert_eq!(settings.unhandled(), UnhandledPolicy::Queue);
        assert_eq!(ChannelSettings::from_toml_str("").expect("空配置合法"), ChannelSettings::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = ChannelSettings::from_toml_str("linger = 1").expect_err("未知字段必须失败");
        assert_eq!(error.code(), flare_common::error::codes::CONFIG_INVALID);
    }
}
