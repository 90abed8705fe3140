//! 单调 Tick 时间：调度器里所有截止时间运算的唯一单位。
//!
//! # 设计背景（Why）
//! - 定时任务的截止时间若直接使用墙上时钟，系统时间回拨会让任务提前或无限期推迟；
//! - 以“进程内固定纪元起的纳秒计数”表达时间点，比较与加减都退化为整数运算，排序稳定且可序列化。
//!
//! # 契约（What）
//! - [`Ticks`]：纪元起的有符号纳秒计数，全序；`Ticks - Ticks` 得到带符号的 [`TickDelta`]；
//! - [`TickSource`]：时间来源抽象，生产环境使用 [`MonotonicTicks`]，测试使用可手动推进的 [`ManualTicks`]；
//! - 纪元在第一次读取 [`MonotonicTicks`] 时固定，之后只读取 [`Instant`]，从不读取墙上时钟。
use core::fmt;
use core::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// 单调时间点，单位为纳秒，起点为进程内固定的纪元。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(i64);

impl Ticks {
    /// 纪元本身。
    pub const ZERO: Ticks = Ticks(0);
    /// 可表示的最远时间点，用作“永不到期”的哨兵。
    pub const MAX: Ticks = Ticks(i64::MAX);

    /// 以纪元起的纳秒数构造时间点。
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// 返回纪元起的纳秒数。
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// 读取系统单调时钟的当前时间点。
    pub fn now() -> Self {
        MonotonicTicks.now()
    }

    /// 计算 `now + delay` 形式的截止时间。
    pub fn deadline(delay: Duration) -> Self {
        Self::now().saturating_add(delay)
    }

    /// 饱和加法，溢出时停在 [`Ticks::MAX`]。
    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_nanos(delta)))
    }

    /// 饱和减法。
    pub fn saturating_sub(self, delta: Duration) -> Self {
        Self(self.0.saturating_sub(duration_to_nanos(delta)))
    }

    /// 返回自 `earlier` 起经过的时间；若 `earlier` 更晚则返回零。
    pub fn saturating_duration_since(self, earlier: Ticks) -> Duration {
        (self - earlier).to_duration().unwrap_or(Duration::ZERO)
    }
}

impl Add<Duration> for Ticks {
    type Output = Ticks;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl AddAssign<Duration> for Ticks {
    fn add_assign(&mut self, rhs: Duration) {
        *self = self.saturating_add(rhs);
    }
}

impl Add<TickDelta> for Ticks {
    type Output = Ticks;

    fn add(self, rhs: TickDelta) -> Self::Output {
        Ticks(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Ticks {
    type Output = TickDelta;

    fn sub(self, rhs: Ticks) -> Self::Output {
        TickDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Sub<Duration> for Ticks {
    type Output = Ticks;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// 两个 [`Ticks`] 之差，可以为负。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickDelta(i64);

impl TickDelta {
    pub const ZERO: TickDelta = TickDelta(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration_to_nanos(duration))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// 非负差值转换为 [`Duration`]，负值返回 `None`。
    pub fn to_duration(self) -> Option<Duration> {
        u64::try_from(self.0).ok().map(Duration::from_nanos)
    }
}

/// 时间来源抽象。
///
/// # 契约（What）
/// - `now` 必须单调不减；
/// - 实现需为 `Send + Sync`，执行器会在提交线程与工作线程上同时读取。
pub trait TickSource: Send + Sync + 'static {
    /// 返回当前时间点。
    fn now(&self) -> Ticks;
}

/// 基于 [`Instant`] 的系统单调时间源。
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicTicks;

impl TickSource for MonotonicTicks {
    fn now(&self) -> Ticks {
        let epoch = *EPOCH.get_or_init(Instant::now);
        Ticks(duration_to_nanos(Instant::now().saturating_duration_since(epoch)))
    }
}

/// 手动推进的时间源。
///
/// # 设计背景（Why）
/// - 固定速率/固定延迟的重排测试需要精确控制“执行完成时刻”，真实时间会引入抖动；
/// - 克隆体共享同一计数器，测试持有一份、执行器持有一份即可联动。
///
/// # 契约（What）
/// - [`advance`](Self::advance) 只能向前推进；
/// - [`set`](Self::set) 若目标早于当前值则保持不变，维持单调性。
#[derive(Clone, Debug, Default)]
pub struct ManualTicks {
    nanos: Arc<AtomicI64>,
}

impl ManualTicks {
    pub fn new() -> Self {
        Self::starting_at(Ticks::ZERO)
    }

    pub fn starting_at(start: Ticks) -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(start.as_nanos())),
        }
    }

    /// 向前推进给定时长，返回推进后的时间点。
    pub fn advance(&self, delta: Duration) -> Ticks {
        let delta = duration_to_nanos(delta);
        let previous = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta))
            })
            .unwrap_or_else(|current| current);
        Ticks(previous.saturating_add(delta))
    }

    pub fn set(&self, target: Ticks) {
        self.nanos.fetch_max(target.as_nanos(), Ordering::AcqRel);
    }
}

impl TickSource for ManualTicks {
    fn now(&self) -> Ticks {
        Ticks(self.nanos.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_yields_signed_delta() {
        let early = Ticks::from_nanos(100);
        let late = Ticks::from_nanos(350);
        assert_eq!((late - early).as_nanos(), 250);
        assert!((early - late).is_negative());
        assert_eq!((early - late).to_duration(), None);
        assert_eq!(late.saturating_duration_since(early), Duration::from_nanos(250));
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }

    #[test]
    fn deadline_arithmetic_saturates() {
        assert_eq!(Ticks::MAX + Duration::from_secs(1), Ticks::MAX);
        let start = Ticks::from_nanos(10);
        assert_eq!(start + Duration::from_nanos(5), Ticks::from_nanos(15));
        assert_eq!(start + TickDelta::from_nanos(-4), Ticks::from_nanos(6));
    }

    #[test]
    fn monotonic_source_never_goes_backwards() {
        let first = Ticks::now();
        let second = Ticks::now();
        assert!(second >= first);
        assert!(Ticks::deadline(Duration::from_millis(5)) > first);
    }

    #[test]
    fn manual_source_advances_only_forward() {
        let ticks = ManualTicks::new();
        let shared = ticks.clone();
        assert_eq!(ticks.advance(Duration::from_nanos(40)), Ticks::from_nanos(40));
        assert_eq!(shared.now(), Ticks::from_nanos(40));
        shared.set(Ticks::from_nanos(10));
        assert_eq!(ticks.now(), Ticks::from_nanos(40));
        shared.set(Ticks::from_nanos(90));
        assert_eq!(ticks.now(), Ticks::from_nanos(90));
    }
}
