use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use flare_common::error::Result;
use flare_common::pool::{ObjectPool, PoolStats, Recycle};

use crate::byte_buf::ByteBuf;
use crate::config::BufferPoolSettings;

/// 缓冲在最后一次 `release` 时归还存储的入口。
///
/// # 契约（What）
/// - `reclaim` 每个缓冲至多调用一次：计数归零时，或计数未归零但最后一个句柄被 Drop 时；
///   两种情况下都不会再有别名访问该存储；
/// - 实现必须线程安全且不得 panic：释放可能发生在任何持有者线程上。
pub trait BufferRecycler: Send + Sync + 'static {
    fn reclaim(&self, storage: BytesMut);
}

/// 空闲列表中的存储块。
struct Storage(BytesMut);

impl Recycle for Storage {
    fn recycle(&mut self) {
        self.0.clear();
    }
}

struct AllocatorInner {
    pool: ObjectPool<Storage>,
    settings: BufferPoolSettings,
}

impl BufferRecycler for AllocatorInner {
    fn reclaim(&self, storage: BytesMut) {
        if !self.pool.free(Storage(storage)) {
            tracing::trace!(capacity = self.pool.capacity(), "buffer free list is full; storage dropped");
        }
    }
}

/// 以有界空闲列表复用 `BytesMut` 存储的缓冲分配器。
///
/// # 设计背景（Why）
/// - 每个入站读事件都会产生一块缓冲，若每次都向系统申请，分配器会成为吞吐瓶颈；
/// - 缓冲的生命周期由引用计数显式界定，计数归零的瞬间即可安全回收存储，
///   不必等待所有 Rust 侧句柄被 Drop。
///
/// # 逻辑（How）
/// - 空闲列表复用 [`ObjectPool`]：无锁、有界，满了直接丢弃；
/// - 分配时弹出一块存储并按需 `reserve`，连同回收句柄交给 [`ByteBuf`]；
/// - 缓冲最后一次 `release` 时清空存储并经 [`BufferRecycler::reclaim`] 放回空闲列表。
///
/// # 风险（Trade-offs）
/// - 忘记 `release` 的缓冲要等最后一个句柄被 Drop 才归还存储，在此之前存储一直被占用；
///   统计中 `created` 持续增长即是句柄长期滞留的信号。
#[derive(Clone)]
pub struct PooledByteBufAllocator {
    inner: Arc<AllocatorInner>,
}

impl PooledByteBufAllocator {
    pub fn new(settings: BufferPoolSettings) -> Result<Self> {
        settings.validate()?;
        let initial = settings.initial_buffer_capacity();
        let pool = ObjectPool::new(settings.capacity(), move || Storage(BytesMut::with_capacity(initial)))?;
        Ok(Self {
            inner: Arc::new(AllocatorInner { pool, settings }),
        })
    }

    /// 分配一个至少能容纳 `min_capacity` 字节的空缓冲。
    pub fn buffer(&self, min_capacity: usize) -> ByteBuf {
        let Storage(mut storage) = self.inner.pool.take();
        storage.reserve(min_capacity);
        ByteBuf::from_storage(storage, Some(self.recycler()))
    }

    /// 分配缓冲并写入 `data`。
    pub fn buffer_from(&self, data: &[u8]) -> ByteBuf {
        let Storage(mut storage) = self.inner.pool.take();
        storage.extend_from_slice(data);
        ByteBuf::from_storage(storage, Some(self.recycler()))
    }

    /// 空闲列表当前保留的存储块数。
    pub fn pooled(&self) -> usize {
        self.inner.pool.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn settings(&self) -> &BufferPoolSettings {
        &self.inner.settings
    }

    fn recycler(&self) -> Arc<dyn BufferRecycler> {
        self.inner.clone()
    }
}

impl Default for PooledByteBufAllocator {
    fn default() -> Self {
        let settings = BufferPoolSettings::default();
        let initial = settings.initial_buffer_capacity();
        Self {
            inner: Arc::new(AllocatorInner {
                pool: ObjectPool::with_default_capacity(move || Storage(BytesMut::with_capacity(initial))),
                settings,
            }),
        }
    }
}

impl fmt::Debug for PooledByteBufAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledByteBufAllocator")
            .field("settings", &self.inner.settings)
            .field("pooled", &self.pooled())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_common::refcount::ReferenceCounted;

    #[test]
    fn released_storage_is_reused() {
        let allocator = PooledByteBufAllocator::default();
        let first = allocator.buffer_from(b"hello");
        assert!(first.release().expect("释放应成功"));
        assert_eq!(allocator.pooled(), 1);

        let second = allocator.buffer(8);
        assert_eq!(second.readable_bytes().expect("缓冲可访问"), 0);
        assert_eq!(allocator.pooled(), 0);
        let stats = allocator.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn free_list_is_bounded() {
        let allocator = PooledByteBufAllocator::new(BufferPoolSettings::new(2, 16)).expect("配置合法");
        let buffers: Vec<ByteBuf> = (0..5).map(|_| allocator.buffer(4)).collect();
        for buffer in &buffers {
            buffer.release().expect("释放应成功");
        }
        assert_eq!(allocator.pooled(), 2);
        assert_eq!(allocator.stats().discarded, 3);
    }

    #[test]
    fn retained_buffer_returns_storage_on_last_release_only() {
        let allocator = PooledByteBufAllocator::default();
        let buffer = allocator.buffer_from(b"abc");
        buffer.retain().expect("retain 应成功");
        assert!(!buffer.release().expect("释放应成功"));
        assert_eq!(allocator.pooled(), 0);
        assert!(buffer.release().expect("释放应成功"));
        assert_eq!(allocator.pooled(), 1);
    }

    #[test]
    fn dropping_the_last_handle_returns_unreleased_storage() {
        let allocator = PooledByteBufAllocator::default();
        let buffer = allocator.buffer_from(b"leaked");
        let view = buffer.duplicate();
        drop(buffer);
        assert_eq!(allocator.pooled(), 0);
        drop(view);
        assert_eq!(allocator.pooled(), 1);
        assert_eq!(allocator.stats().recycled, 1);
    }
}
