//! 缓冲池配置。
use flare_common::error::{CommonError, Result};
use flare_common::pool::DEFAULT_POOL_CAPACITY;
use serde::Deserialize;

/// 新建存储块的默认初始容量（字节）。
pub const DEFAULT_INITIAL_BUFFER_CAPACITY: usize = 256;

/// [`PooledByteBufAllocator`](crate::PooledByteBufAllocator) 的可调参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferPoolSettings {
    capacity: usize,
    initial_buffer_capacity: usize,
}

impl BufferPoolSettings {
    pub const fn new(capacity: usize, initial_buffer_capacity: usize) -> Self {
        Self {
            capacity,
            initial_buffer_capacity,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).map_err(|error| CommonError::Config(error.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CommonError::invalid_argument("capacity", "buffer pool capacity must be positive"));
        }
        Ok(())
    }

    /// 空闲列表最多保留的存储块数。
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn initial_buffer_capacity(&self) -> usize {
        self.initial_buffer_capacity
    }
}

impl Default for BufferPoolSettings {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_INITIAL_BUFFER_CAPACITY)
    }
}
