use std::fmt;
use std::sync::Arc;

use flare_common::error::Result;
use flare_common::refcount::{RefCount, ReferenceCounted, safe_release};

use crate::byte_buf::ByteBuf;

struct Shared {
    refs: RefCount,
    components: spin::RwLock<Vec<ByteBuf>>,
}

impl Shared {
    fn deallocate(&self) {
        let components = core::mem::take(&mut *self.components.write());
        for component in &components {
            safe_release(component);
        }
    }
}

/// 由多个 [`ByteBuf`] 拼接而成的逻辑缓冲，不复制组件的字节。
///
/// # 设计背景（Why）
/// - 协议编码常把帧头与负载分别生成，再作为一条消息写出；拼接视图避免为此复制负载。
///
/// # 逻辑（How）
/// - 组合缓冲持有每个组件的一份引用，并维护自己的计数；
/// - 计数归零时逐个释放组件，池化组件的存储因此回到各自的分配器。
///
/// # 契约（What）
/// - [`add_component`](Self::add_component) 转移组件的一份引用；组合缓冲已释放时该引用被立即释放并返回错误；
/// - 可读内容为各组件可读区域按加入顺序的拼接。
pub struct CompositeByteBuf {
    shared: Arc<Shared>,
}

impl CompositeByteBuf {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                refs: RefCount::new(),
                components: spin::RwLock::new(Vec::new()),
            }),
        }
    }

    /// 依次加入组件；任何一个加入失败时返回错误，已加入的组件随组合缓冲一起释放。
    pub fn from_components<I>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = ByteBuf>,
    {
        let composite = Self::new();
        for component in components {
            composite.add_component(component)?;
        }
        Ok(composite)
    }

    pub fn add_component(&self, component: ByteBuf) -> Result<()> {
        let mut components = self.shared.components.write();
        if let Err(error) = self.shared.refs.ensure_accessible() {
            drop(components);
            safe_release(&component);
            return Err(error);
        }
        components.push(component);
        Ok(())
    }

    pub fn num_components(&self) -> usize {
        self.shared.components.read().len()
    }

    /// 第 `index` 个组件的共享视图（不增加计数）。
    pub fn component(&self, index: usize) -> Option<ByteBuf> {
        self.shared.components.read().get(index).map(ByteBuf::duplicate)
    }

    pub fn readable_bytes(&self) -> Result<usize> {
        self.shared.refs.ensure_accessible()?;
        let mut total = 0;
        for component in self.shared.components.read().iter() {
            total += component.readable_bytes()?;
        }
        Ok(total)
    }

    /// 拼接后的可读内容。
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.shared.refs.ensure_accessible()?;
        let components = self.shared.components.read();
        let mut bytes = Vec::new();
        for component in components.iter() {
            bytes.extend_from_slice(&component.to_vec()?);
        }
        Ok(bytes)
    }

    /// 把拼接内容复制到一个独立的连续缓冲。
    pub fn copy(&self) -> Result<ByteBuf> {
        Ok(ByteBuf::from_slice(&self.to_vec()?))
    }

    pub fn is_released(&self) -> bool {
        self.shared.refs.get() == 0
    }

    /// 共享组件与计数的新句柄，计数不变。
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

impl Default for CompositeByteBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceCounted for CompositeByteBuf {
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
        tracing::trace!(refs = self.shared.refs.get(), hint = ?hint, "CompositeByteBuf touched");
    }
}

impl fmt::Debug for CompositeByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeByteBuf")
            .field("refs", &self.shared.refs.get())
            .field("components", &self.num_components())
            .finish()
    }
}
