//! 执行器配置。
//!
//! # 契约（What）
//! - 所有字段都有默认值，TOML 中缺省的键回落到默认；
//! - [`ExecutorSettings::validate`] 拒绝零容量的任务池；
//! - `max_tasks_per_pass = 0` 表示单次排空不设上限。
use serde::Deserialize;

use crate::error::{CommonError, Result};
use crate::pool::DEFAULT_POOL_CAPACITY;

/// 事件循环执行器的可调参数。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    task_pool_capacity: usize,
    thread_name: String,
    max_tasks_per_pass: usize,
}

impl ExecutorSettings {
    pub fn new(task_pool_capacity: usize, thread_name: impl Into<String>) -> Self {
        Self {
            task_pool_capacity,
            thread_name: thread_name.into(),
            max_tasks_per_pass: 0,
        }
    }

    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).map_err(|error| CommonError::Config(error.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.task_pool_capacity == 0 {
            return Err(CommonError::invalid_argument(
                "task_pool_capacity",
                "task pool capacity must be positive",
            ));
        }
        Ok(())
    }

    pub fn task_pool_capacity(&self) -> usize {
        self.task_pool_capacity
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// 单次排空最多执行的即时任务数，`None` 表示不设上限。
    pub fn max_tasks_per_pass(&self) -> Option<usize> {
        (self.max_tasks_per_pass != 0).then_some(self.max_tasks_per_pass)
    }

    pub fn with_max_tasks_per_pass(mut self, limit: usize) -> Self {
        self.max_tasks_per_pass = limit;
        self
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, "flare-event-loop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let settings = ExecutorSettings::from_toml_str("thread_name = \"io-0\"").expect("解析应成功");
        assert_eq!(settings.thread_name(), "io-0");
        assert_eq!(settings.task_pool_capacity(), DEFAULT_POOL_CAPACITY);
        assert_eq!(settings.max_tasks_per_pass(), None);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let error = ExecutorSettings::from_toml_str("task_pool_capacity = 0").expect_err("零容量非法");
        assert!(matches!(error, CommonError::InvalidArgument { name: "task_pool_capacity", .. }));
    }

    #[test]
    fn unknown_keys_are_config_errors() {
        let error = ExecutorSettings::from_toml_str("threads = 4").expect_err("未知键非法");
        assert!(matches!(error, CommonError::Config(_)));
    }
}
