use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use flare_common::error::{CommonError, Result};
use flare_common::refcount::{RefCount, ReferenceCounted};

use crate::allocator::BufferRecycler;

struct Shared {
    refs: RefCount,
    storage: spin::RwLock<Option<BytesMut>>,
    recycler: Option<Arc<dyn BufferRecycler>>,
}

impl Shared {
    fn deallocate(&self) {
        let storage = self.storage.write().take();
        if let (Some(storage), Some(recycler)) = (storage, self.recycler.as_ref()) {
            recycler.reclaim(storage);
        }
    }
}

// 最后一个句柄被 Drop 而计数未归零（例如持有者在 panic 中展开）时，存储同样归还分配器。
impl Drop for Shared {
    fn drop(&mut self) {
        if let (Some(storage), Some(recycler)) = (self.storage.get_mut().take(), self.recycler.as_ref()) {
            recycler.reclaim(storage);
        }
    }
}

/// 引用计数的字节缓冲。
///
/// # 设计背景（Why）
/// - Pipeline 中同一块数据常被多个阶段持有（解码器切片、重试队列、出站缓冲），
///   存储何时可以回收由显式的持有者计数决定，而不是由 Rust 句柄的生命周期决定；
/// - 句柄本身不可 `Clone`，需要共享时必须显式选择 [`duplicate`](Self::duplicate)（共享计数，不增加）
///   或 [`retained_duplicate`](Self::retained_duplicate)（共享计数并加一），让所有权转移在代码中可见。
///
/// # 逻辑（How）
/// - 存储与计数放在共享的 `Arc` 中；每个句柄各自维护读指针与可见窗口，写入总是追加到共享存储末尾；
/// - [`slice`](Self::slice) 产生窗口固定的视图，与原缓冲共享存储与计数；
/// - 计数归零时取走存储：池化缓冲经回收句柄归还分配器，非池化缓冲直接丢弃。
///
/// # 契约（What）
/// - 计数归零后，任何读写都返回 [`CommonError::IllegalReferenceCount`]（`count = 0, delta = 0`）；
/// - 切片视图不可写入；
/// - `copy` 产生与原缓冲无关的新缓冲（计数为 1，非池化）。
pub struct ByteBuf {
    shared: Arc<Shared>,
    reader_index: usize,
    start: usize,
    end: Option<usize>,
}

impl ByteBuf {
    /// 空的非池化缓冲。
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_storage(BytesMut::with_capacity(capacity), None)
    }

    /// 以 `data` 的副本构造非池化缓冲。
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_storage(BytesMut::from(data), None)
    }

    pub(crate) fn from_storage(storage: BytesMut, recycler: Option<Arc<dyn BufferRecycler>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                refs: RefCount::new(),
                storage: spin::RwLock::new(Some(storage)),
                recycler,
            }),
            reader_index: 0,
            start: 0,
            end: None,
        }
    }

    /// 存储是否来自分配器的空闲列表。
    pub fn is_pooled(&self) -> bool {
        self.shared.recycler.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.shared.refs.get() == 0
    }

    /// 读指针相对本视图起点的位置。
    pub fn reader_index(&self) -> usize {
        self.reader_index - self.start
    }

    /// 可读字节数。
    pub fn readable_bytes(&self) -> Result<usize> {
        self.with_storage(|storage| self.limit(storage).saturating_sub(self.reader_index))
    }

    /// 切片视图返回 `true`。
    pub fn is_slice(&self) -> bool {
        self.end.is_some()
    }

    pub fn is_readable(&self) -> bool {
        self.readable_bytes().is_ok_and(|readable| readable > 0)
    }

    /// 在共享存储末尾追加字节。
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.shared.refs.ensure_accessible()?;
        if self.is_slice() {
            return Err(CommonError::invalid_argument("data", "a slice view cannot grow"));
        }
        let mut guard = self.shared.storage.write();
        let storage = guard.as_mut().ok_or_else(released)?;
        storage.put_slice(data);
        Ok(())
    }

    /// 读出 `len` 字节并推进读指针。
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let start = self.reader_index;
        let bytes = self.with_storage(|storage| {
            let end = start.checked_add(len).filter(|end| *end <= self.limit(storage))?;
            Some(storage[start..end].to_vec())
        })?;
        let bytes = bytes.ok_or_else(|| CommonError::invalid_argument("len", "not enough readable bytes"))?;
        self.reader_index += len;
        Ok(bytes)
    }

    pub fn skip_bytes(&mut self, len: usize) -> Result<()> {
        let readable = self.readable_bytes()?;
        if len > readable {
            return Err(CommonError::invalid_argument("len", "not enough readable bytes"));
        }
        self.reader_index += len;
        Ok(())
    }

    /// 可读区域的副本。
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.with_storage(|storage| {
            storage
                .get(self.reader_index..self.limit(storage))
                .unwrap_or_default()
                .to_vec()
        })
    }

    /// 复制可读区域为一个独立的新缓冲。
    pub fn copy(&self) -> Result<ByteBuf> {
        Ok(Self::from_slice(&self.to_vec()?))
    }

    /// 共享存储与计数（不增加计数），拥有独立的读指针。
    pub fn duplicate(&self) -> ByteBuf {
        Self {
            shared: Arc::clone(&self.shared),
            reader_index: self.reader_index,
            start: self.start,
            end: self.end,
        }
    }

    /// 先 `retain` 再 `duplicate`。
    pub fn retained_duplicate(&self) -> Result<ByteBuf> {
        self.shared.refs.retain()?;
        Ok(self.duplicate())
    }

    /// 从本视图起点偏移 `index` 处截取 `len` 字节的只读视图，共享存储与计数（不增加计数）。
    ///
    /// # Errors
    /// 区间越过本视图的末尾时返回 `InvalidArgument`；缓冲已释放时返回 `IllegalReferenceCount`。
    pub fn slice(&self, index: usize, len: usize) -> Result<ByteBuf> {
        let bounds = self.with_storage(|storage| {
            let start = self.start.checked_add(index)?;
            let end = start.checked_add(len).filter(|end| *end <= self.limit(storage))?;
            Some((start, end))
        })?;
        let (start, end) = bounds.ok_or_else(|| CommonError::invalid_argument("index", "slice is out of bounds"))?;
        Ok(Self {
            shared: Arc::clone(&self.shared),
            reader_index: start,
            start,
            end: Some(end),
        })
    }

    /// 先 `retain` 再 `slice`；越界时计数保持不变。
    pub fn retained_slice(&self, index: usize, len: usize) -> Result<ByteBuf> {
        let view = self.slice(index, len)?;
        self.shared.refs.retain()?;
        Ok(view)
    }

    /// 两个句柄是否指向同一存储。
    pub fn shares_storage_with(&self, other: &ByteBuf) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn limit(&self, storage: &BytesMut) -> usize {
        self.end.map_or(storage.len(), |end| end.min(storage.len()))
    }

    fn with_storage<R>(&self, read: impl FnOnce(&BytesMut) -> R) -> Result<R> {
        self.shared.refs.ensure_accessible()?;
        let guard = self.shared.storage.read();
        let storage = guard.as_ref().ok_or_else(released)?;
        Ok(read(storage))
    }
}

fn released() -> CommonError {
    CommonError::IllegalReferenceCount { count: 0, delta: 0 }
}

impl Default for ByteBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceCounted for ByteBuf {
    fn reference_count(&self) -> usize {
        self.shared.refs.get()
    }

    fn retain_n(&self, increment: usize) -> Result<()> {
        self.shared.refs.retain_n(increment)
    }

    fn release_n(&self, decrement: usize) -> Result<bool> {
        let reached_zero = self.shared.refs.release_n(decrement)?;
        if reached_zero {
            self.shared.deallocate();
        }
        Ok(reached_zero)
    }

    fn touch_hint(&self, hint: &dyn fmt::Debug) {
        tracing::trace!(refs = self.shared.refs.get(), hint = ?hint, "ByteBuf touched");
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("refs", &self.shared.refs.get())
            .field("reader_index", &self.reader_index())
            .field("slice", &self.is_slice())
            .field("readable", &self.readable_bytes().ok())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
