//! 引用计数契约。
//!
//! # 设计背景（Why）
//! - 池化缓冲与地址信封会在多个 Pipeline 阶段、甚至多个事件循环之间移交，
//!   需要一个显式的“持有者计数”决定何时把存储归还对象池；
//! - `Arc` 的强引用计数无法表达“归零后回收到池中再复用”，也无法在过度释放时报告错误，
//!   因此单独维护一个原子计数并以 CAS 循环线性化所有增减。
//!
//! # 契约（What）
//! - 创建时计数为 1；
//! - `retain(n)`：`n` 必须为正；计数已为零（复活）或相加溢出时返回
//!   [`CommonError::IllegalReferenceCount`]，状态不变；
//! - `release(n)`：`n` 必须为正；`n` 超过当前计数时返回错误且状态不变；
//!   恰好归零时返回 `true`，调用方据此执行且仅执行一次释放逻辑；
//! - `touch` 只用于调试追踪，不改变计数。
//!
//! # 风险（Trade-offs）
//! - 计数与对象所有权解耦：计数归零后仍持有句柄的别名会在访问时得到错误而不是悬垂指针，
//!   代价是每次访问多一次原子读。
#[cfg(not(any(loom, flare_loom)))]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(any(loom, flare_loom))]
use loom::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{CommonError, Result};

/// CAS 驱动的原子引用计数。
#[derive(Debug)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    /// 以计数 1 创建。
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(1),
        }
    }

    /// 当前计数的快照。
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// 复用池化对象时把计数重置为 1。
    ///
    /// 只允许在计数为零、且调用方是唯一所有者时调用。
    pub fn reset(&self) {
        debug_assert_eq!(self.get(), 0, "只能重置已经释放完毕的引用计数");
        self.count.store(1, Ordering::Release);
    }

    pub fn retain(&self) -> Result<()> {
        self.retain_n(1)
    }

    pub fn retain_n(&self, increment: usize) -> Result<()> {
        if increment == 0 {
            return Err(CommonError::invalid_argument(
                "increment",
                "retain increment must be positive",
            ));
        }
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(increment) {
                Some(next) if current != 0 => next,
                _ => {
                    return Err(CommonError::IllegalReferenceCount {
                        count: current,
                        delta: delta_of(increment, false),
                    });
                }
            };
            match self
                .count
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// 释放一次，归零时返回 `true`。
    pub fn release(&self) -> Result<bool> {
        self.release_n(1)
    }

    pub fn release_n(&self, decrement: usize) -> Result<bool> {
        if decrement == 0 {
            return Err(CommonError::invalid_argument(
                "decrement",
                "release decrement must be positive",
            ));
        }
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current < decrement {
                return Err(CommonError::IllegalReferenceCount {
                    count: current,
                    delta: delta_of(decrement, true),
                });
            }
            let next = current - decrement;
            match self
                .count
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(next == 0),
                Err(observed) => current = observed,
            }
        }
    }

    /// 访问前校验资源仍然存活。
    pub fn ensure_accessible(&self) -> Result<()> {
        match self.get() {
            0 => Err(CommonError::IllegalReferenceCount { count: 0, delta: 0 }),
            _ => Ok(()),
        }
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

fn delta_of(amount: usize, negative: bool) -> i64 {
    let magnitude = i64::try_from(amount).unwrap_or(i64::MAX);
    if negative { -magnitude } else { magnitude }
}

/// 引用计数资源的统一接口。
///
/// # 契约（What）
/// - `retain`/`release` 语义同模块文档；`release` 归零时实现方必须恰好执行一次 deallocate，
///   并先释放其包裹的嵌套资源，再把自身归还对象池；
/// - `touch` 默认空操作，实现方可用于泄漏追踪。
pub trait ReferenceCounted: Send + Sync {
    fn reference_count(&self) -> usize;

    fn retain_n(&self, increment: usize) -> Result<()>;

    fn release_n(&self, decrement: usize) -> Result<bool>;

    fn retain(&self) -> Result<()> {
        self.retain_n(1)
    }

    fn release(&self) -> Result<bool> {
        self.release_n(1)
    }

    fn touch(&self) {}

    fn touch_hint(&self, _hint: &dyn core::fmt::Debug) {}
}

/// 释放资源并记录而不是传播错误，用于丢弃路径。
pub fn safe_release(resource: &dyn ReferenceCounted) {
    if let Err(error) = resource.release() {
        crate::logging::logger("flare.refcount")
            .warn_with("failed to release reference-counted resource", &error);
    }
}

#[cfg(all(test, not(any(loom, flare_loom))))]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one_and_reaches_zero_once() {
        let count = RefCount::new();
        count.retain_n(2).expect("retain 应成功");
        assert_eq!(count.get(), 3);
        assert!(!count.release_n(2).expect("release 应成功"));
        assert!(count.release().expect("最后一次 release 应成功"));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn over_release_leaves_state_unchanged() {
        let count = RefCount::new();
        let error = count.release_n(2).expect_err("过度释放必须失败");
        assert_eq!(error, CommonError::IllegalReferenceCount { count: 1, delta: -2 });
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn resurrection_is_rejected() {
        let count = RefCount::new();
        assert!(count.release().expect("release 应成功"));
        let error = count.retain().expect_err("归零后 retain 必须失败");
        assert_eq!(error, CommonError::IllegalReferenceCount { count: 0, delta: 1 });
        assert!(count.ensure_accessible().is_err());
    }

    #[test]
    fn overflow_is_rejected() {
        let count = RefCount::new();
        let error = count.retain_n(usize::MAX).expect_err("溢出必须失败");
        assert!(matches!(error, CommonError::IllegalReferenceCount { count: 1, .. }));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn zero_delta_is_an_argument_error() {
        let count = RefCount::new();
        assert!(matches!(
            count.retain_n(0),
            Err(CommonError::InvalidArgument { name: "increment", .. })
        ));
        assert!(matches!(
            count.release_n(0),
            Err(CommonError::InvalidArgument { name: "decrement", .. })
        ));
    }

    #[test]
    fn reset_revives_a_released_counter() {
        let count = RefCount::new();
        assert!(count.release().expect("release 应成功"));
        count.reset();
        assert_eq!(count.get(), 1);
    }
}
