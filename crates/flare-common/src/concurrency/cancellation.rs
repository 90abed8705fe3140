use std::sync::Arc;

#[cfg(not(any(loom, flare_loom)))]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(any(loom, flare_loom))]
use loom::sync::atomic::{AtomicBool, Ordering};

/// 提交任务时可附带的取消令牌。
///
/// # 设计背景（Why）
/// - `submit` 返回的完成句柄只能在任务运行前被取消；调用方常常在别处（例如连接关闭回调）
///   才得知结果已不再需要，因此需要一个可在任意线程共享的取消位。
///
/// # 逻辑（How）
/// - 内部是一个 [`AtomicBool`]，克隆体共享同一原子位；
/// - 执行器在运行任务体之前检查令牌，已取消则把句柄置为 Cancelled 并跳过任务体。
///
/// # 契约（What）
/// - `cancel` 首次成功设置时返回 `true`，重复调用返回 `false`；
/// - 令牌不会打断已经开始执行的任务体。
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    pub fn cancel(&self) -> bool {
        self.inner
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
