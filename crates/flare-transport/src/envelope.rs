//! 地址信封：带发送方/接收方地址的引用计数负载。
//!
//! # 设计背景（Why）
//! - 无连接传输（数据报）每条消息都带地址，负载本身又是引用计数资源；信封把两者绑成
//!   一个资源，释放信封即释放负载，持有方只需要关心一层计数；
//! - 数据报路径上每条消息都要一个信封，[`EnvelopePool`] 让信封外壳在最后一次释放后回到
//!   有界空闲列表，稳定状态下不再为信封分配。
//!
//! # 逻辑（How）
//! - 信封拥有独立的 [`RefCount`]；计数归零时取出负载执行一次 `release`，同时清空两个地址；
//! - 来自池的信封在归零时把外壳（共享状态）交还 [`ObjectPool`]，清空动作由 [`Recycle`] 完成；
//! - 取用外壳时只有在没有任何旧句柄仍指向它（`Arc` 独占）时才复用，否则丢弃并新建，
//!   旧句柄因此永远只会看到“已释放”的状态；
//! - `duplicate` 共享同一份计数与负载，与 `ByteBuf::duplicate` 的语义一致。
//!
//! # 契约（What）
//! - 构造时发送方与接收方至少提供一个；
//! - 计数归零后访问负载或地址返回 `IllegalReferenceCount { count: 0, delta: 0 }` 或 `None`；
//! - 空闲列表中的外壳数永远不超过池容量，复用的外壳不保留上一轮的负载与地址。
use core::fmt;
use std::sync::{Arc, Weak};

use flare_common::error::{CommonError, Result};
use flare_common::pool::{ObjectPool, PoolStats, Recycle};
use flare_common::refcount::{RefCount, ReferenceCounted, safe_release};

use crate::address::Endpoint;

struct Parts<T> {
    content: T,
    sender: Option<Endpoint>,
    recipient: Option<Endpoint>,
}

struct Shared<T> {
    refs: RefCount,
    parts: spin::Mutex<Option<Parts<T>>>,
    pool: Weak<ObjectPool<Shell<T>>>,
}

impl<T: ReferenceCounted> Shared<T> {
    fn vacant() -> Self {
        Self {
            refs: RefCount::new(),
            parts: spin::Mutex::new(None),
            pool: Weak::new(),
        }
    }

    fn occupied(parts: Parts<T>, pool: Weak<ObjectPool<Shell<T>>>) -> Self {
        Self {
            refs: RefCount::new(),
            parts: spin::Mutex::new(Some(parts)),
            pool,
        }
    }

    /// 取出负载并释放，同时清空地址。
    fn clear(&self) {
        let parts = self.parts.lock().take();
        if let Some(parts) = parts {
            safe_release(&parts.content);
        }
    }

    fn deallocate(this: &Arc<Self>) {
        match this.pool.upgrade() {
            Some(pool) => {
                if !pool.free(Shell(Arc::clone(this))) {
                    tracing::trace!(capacity = pool.capacity(), "envelope free list is full; shell dropped");
                }
            }
            None => this.clear(),
        }
    }
}

/// 空闲列表中的信封外壳。
struct Shell<T>(Arc<Shared<T>>);

impl<T: ReferenceCounted> Recycle for Shell<T> {
    fn recycle(&mut self) {
        self.0.clear();
    }
}

fn check_addresses<T: ReferenceCounted>(content: &T, sender: &Option<Endpoint>, recipient: &Option<Endpoint>) -> Result<()> {
    if sender.is_none() && recipient.is_none() {
        safe_release(content);
        return Err(CommonError::invalid_argument(
            "recipient",
            "an envelope needs a sender or a recipient",
        ));
    }
    Ok(())
}

/// 复用信封外壳的有界池。
///
/// # 风险（Trade-offs）
/// - 计数归零后仍被持有的旧句柄会让对应外壳无法复用：取用时遇到这样的外壳会丢弃它并新建，
///   统计中的 `reused` 因此可能略高于真正复用的次数。
pub struct EnvelopePool<T: ReferenceCounted> {
    free: Arc<ObjectPool<Shell<T>>>,
}

impl<T: ReferenceCounted + 'static> EnvelopePool<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            free: Arc::new(ObjectPool::new(capacity, || Shell(Arc::new(Shared::vacant())))?),
        })
    }

    pub fn with_default_capacity() -> Self {
        Self {
            free: Arc::new(ObjectPool::with_default_capacity(|| Shell(Arc::new(Shared::vacant())))),
        }
    }

    /// 从池中取一个信封，负载的一份引用转移给信封。
    ///
    /// # Errors
    /// 发送方与接收方都缺失时返回 `InvalidArgument`；此时转移进来的那份负载引用会被释放。
    pub fn acquire(&self, content: T, sender: Option<Endpoint>, recipient: Option<Endpoint>) -> Result<AddressedEnvelope<T>> {
        check_addresses(&content, &sender, &recipient)?;
        let parts = Parts {
            content,
            sender,
            recipient,
        };
        let Shell(mut shared) = self.free.take();
        match Arc::get_mut(&mut shared) {
            Some(slot) => {
                slot.refs = RefCount::new();
                *slot.parts.get_mut() = Some(parts);
                slot.pool = Arc::downgrade(&self.free);
            }
            None => shared = Arc::new(Shared::occupied(parts, Arc::downgrade(&self.free))),
        }
        Ok(AddressedEnvelope { shared })
    }

    pub fn to(&self, content: T, recipient: Endpoint) -> Result<AddressedEnvelope<T>> {
        self.acquire(content, None, Some(recipient))
    }
}

impl<T: ReferenceCounted> EnvelopePool<T> {
    /// 空闲列表中的外壳数。
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    pub fn stats(&self) -> PoolStats {
        self.free.stats()
    }
}

impl<T: ReferenceCounted> Clone for EnvelopePool<T> {
    fn clone(&self) -> Self {
        Self {
            free: Arc::clone(&self.free),
        }
    }
}

impl<T: ReferenceCounted> fmt::Debug for EnvelopePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopePool")
            .field("pooled", &self.free.len())
            .field("capacity", &self.free.capacity())
            .field("stats", &self.free.stats())
            .finish()
    }
}

/// 带地址的引用计数负载。
pub struct AddressedEnvelope<T: ReferenceCounted> {
    shared: Arc<Shared<T>>,
}

impl<T: ReferenceCounted> AddressedEnvelope<T> {
    /// 构造不属于任何池的信封，负载的一份引用转移给信封。
    ///
    /// # Errors
    /// 发送方与接收方都缺失时返回 `InvalidArgument`；此时转移进来的那份负载引用会被释放。
    pub fn new(content: T, sender: Option<Endpoint>, recipient: Option<Endpoint>) -> Result<Self> {
        check_addresses(&content, &sender, &recipient)?;
        Ok(Self {
            shared: Arc::new(Shared::occupied(
                Parts {
                    content,
                    sender,
                    recipient,
                },
                Weak::new(),
            )),
        })
    }

    pub fn to(content: T, recipient: Endpoint) -> Result<Self> {
        Self::new(content, None, Some(recipient))
    }

    /// 信封所属的池；非池化信封或池已被丢弃时返回 `None`。
    pub fn pool(&self) -> Option<EnvelopePool<T>> {
        self.shared.pool.upgrade().map(|free| EnvelopePool { free })
    }

    pub fn sender(&self) -> Option<Endpoint> {
        self.shared.parts.lock().as_ref().and_then(|parts| parts.sender.clone())
    }

    pub fn recipient(&self) -> Option<Endpoint> {
        self.shared.parts.lock().as_ref().and_then(|parts| parts.recipient.clone())
    }

    /// 在持锁状态下访问负载。
    pub fn with_content<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut parts = self.shared.parts.lock();
        match parts.as_mut() {
            Some(parts) => Ok(f(&mut parts.content)),
            None => Err(CommonError::IllegalReferenceCount { count: 0, delta: 0 }),
        }
    }

    pub fn is_released(&self) -> bool {
        self.shared.refs.get() == 0
    }

    /// 共享计数与负载的新句柄，计数不变。
    pub fn duplicate(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn retained_duplicate(&self) -> Result<Self> {
        self.shared.refs.retain()?;
        Ok(self.duplicate())
    }
}

impl<T: ReferenceCounted> ReferenceCounted for AddressedEnvelope<T> {
    fn reference_count(&self) -> usize {
        self.shared.refs.get()
    }

    fn retain_n(&self, increment: usize) -> Result<()> {
        self.shared.refs.retain_n(increment)
    }

    fn release_n(&self, decrement: usize) -> Result<bool> {
        let reached_zero = self.shared.refs.release_n(decrement)?;
        if reached_zero {
            Shared::deallocate(&self.shared);
        }
        Ok(reached_zero)
    }

    fn touch_hint(&self, hint: &dyn fmt::Debug) {
        tracing::trace!(refs = self.shared.refs.get(), hint = ?hint, "AddressedEnvelope touched");
    }
}

impl<T: ReferenceCounted + fmt::Debug> fmt::Debug for AddressedEnvelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.shared.parts.lock();
        let mut debug = f.debug_struct("AddressedEnvelope");
        debug.field("refs", &self.shared.refs.get());
        if let Some(parts) = parts.as_ref() {
            debug
                .field("sender", &parts.sender)
                .field("recipient", &parts.recipient)
                .field("content", &parts.content);
        }
        debug.finish()
    }
}
