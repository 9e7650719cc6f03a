// 教案级说明：虚拟时钟是全部模拟行为的唯一驱动者。
//
// - **意图 (Why)**：定时器、延迟与超时取消在测试中必须完全确定，不能依赖后台线程或真实睡眠；
//   调用方显式调用 `advance_time`，时钟按“最近事件优先”的离散步长推进所有活跃实体。
// - **契约 (What)**：只有 `advance_time` 会触发定时器与延迟；`set_current_time` 仅改写逻辑时间，
//   不做任何结算；`dispose` 是硬重置，清空活跃集合但不投递任何通知。
// - **实现提示 (How)**：每一步推进前复制活跃集合快照，回调中对集合的增删只写入实时集合，
//   下一轮循环重新取快照时才可见，从而保证正在遍历的快照不被破坏。
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cancellation::Cancellation;
use crate::delay::{Delay, VirtualDelay};
use crate::error::{Result, ensure_interval};
use crate::options::VirtualClockOptions;
use crate::source::VirtualCancellationSource;
use crate::timer::VirtualTimer;

/// 虚拟时钟：通过手动推进时间以在测试中复现确定性的触发序列。
///
/// # 设计动机（Why）
/// - 周期任务、超时与取消逻辑需要在 CI 中保证 100% 可重复；
/// - 虚拟时钟允许测试显式控制时间推进，并同步触发对应回调，避免真实时间的抖动。
///
/// # 行为概览（How）
/// - 内部维护逻辑时间、自构造起累计推进的时长，以及活跃定时器/延迟集合；
/// - `create_timer`/`create_delay` 将实体登记为活跃，释放或结算时自动移出；
/// - `advance_time` 逐步跳到最近的触发点，保证跨实体的触发顺序与真实时间一致。
///
/// # 契约说明（What）
/// - 句柄可廉价克隆，所有克隆共享同一时钟；
/// - 推进期间执行的回调可以重入时钟的任意操作（创建/释放定时器、创建延迟、取消取消源）；
/// - `advance_time` 永远不会让逻辑时间倒退。
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    state: Mutex<ClockState>,
}

struct ClockState {
    current_time: SystemTime,
    elapsed: Duration,
    default_timer_interval: Duration,
    active_timers: Vec<VirtualTimer>,
    active_delays: Vec<VirtualDelay>,
    next_delay_id: u64,
}

impl VirtualClock {
    /// 以默认配置创建时钟（起始时间 2020-10-27T12:00:00Z）。
    pub fn new() -> Self {
        let options = VirtualClockOptions::default();
        Self::from_parts(options.start_time(), options.default_timer_interval())
    }

    /// 以指定起始时间构造虚拟时钟，便于在测试中固定初始时刻。
    pub fn with_start(start: SystemTime) -> Self {
        let options = VirtualClockOptions::default();
        Self::from_parts(start, options.default_timer_interval())
    }

    pub fn builder() -> VirtualClockBuilder {
        VirtualClockBuilder::default()
    }

    fn from_parts(start: SystemTime, default_timer_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    current_time: start,
                    elapsed: Duration::ZERO,
                    default_timer_interval,
                    active_timers: Vec::new(),
                    active_delays: Vec::new(),
                    next_delay_id: 0,
                }),
            }),
        }
    }

    /// 当前逻辑时间。
    pub fn current_time(&self) -> SystemTime {
        self.inner.state.lock().current_time
    }

    /// `current_time` 的别名，便于以 `clock.now()` 的写法注入“当前时间”能力。
    pub fn now(&self) -> SystemTime {
        self.current_time()
    }

    /// 改写逻辑时间；不会结算任何定时器或延迟。
    pub fn set_current_time(&self, time: SystemTime) {
        self.inner.state.lock().current_time = time;
    }

    /// 自构造起经由 `advance_time` 累计推进的虚拟时长。
    pub fn elapsed(&self) -> Duration {
        self.inner.state.lock().elapsed
    }

    pub fn active_timer_count(&self) -> usize {
        self.inner.state.lock().active_timers.len()
    }

    pub fn active_delay_count(&self) -> usize {
        self.inner.state.lock().active_delays.len()
    }

    /// 创建处于禁用状态的定时器并登记为活跃。
    ///
    /// 定时器释放时通过释放通知自行移出活跃集合；通知闭包只持有时钟的弱引用。
    pub fn create_timer(&self) -> VirtualTimer {
        let timer = {
            let mut state = self.inner.state.lock();
            let timer = VirtualTimer::with_interval(state.default_timer_interval);
            state.active_timers.push(timer.clone());
            timer
        };

        let clock = Arc::downgrade(&self.inner);
        timer.on_disposing(move |disposed| {
            if let Some(clock) = clock.upgrade() {
                clock
                    .state
                    .lock()
                    .active_timers
                    .retain(|timer| !timer.ptr_eq(disposed));
            }
        });
        debug!(interval = ?timer.interval(), "virtual timer created");
        timer
    }

    /// 创建在累计推进 `duration` 后完成的延迟。
    ///
    /// # 契约说明（What）
    /// - `duration` 为零时同步返回已完成的句柄，不登记为活跃；
    /// - `cancellation` 触发时句柄以 [`TimeError::Cancelled`](crate::TimeError::Cancelled) 结算，与虚拟时间推进无关；
    /// - 完成或取消后延迟自动移出活跃集合。
    pub fn create_delay(&self, duration: Duration, cancellation: &Cancellation) -> Delay {
        if duration.is_zero() {
            return Delay::completed();
        }

        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_delay_id;
            state.next_delay_id += 1;
            id
        };
        let (delay, handle) = VirtualDelay::new(id, duration, cancellation);
        if delay.is_settled() {
            return handle;
        }

        self.inner.state.lock().active_delays.push(delay.clone());
        let clock = Arc::downgrade(&self.inner);
        delay.on_settled(move || {
            if let Some(clock) = clock.upgrade() {
                clock
                    .state
                    .lock()
                    .active_delays
                    .retain(|delay| delay.id() != id);
            }
        });
        debug!(id, ?duration, "virtual delay created");
        handle
    }

    /// 创建在 `timeout` 后自动取消的取消源。
    pub fn create_cancellation_source(
        &self,
        timeout: Duration,
    ) -> Result<VirtualCancellationSource> {
        VirtualCancellationSource::with_timeout(self.clone(), timeout)
    }

    /// 推进虚拟时间。
    ///
    /// # 逻辑解析（How）
    /// 1. 复制活跃定时器与延迟的快照；
    /// 2. 取“最近一次定时器触发”“最近一次延迟到期”“剩余推进量”三者的最小值作为本步步长；
    /// 3. 先推进逻辑时间，再依次推进快照中的定时器与延迟（回调中读取的当前时间即为事件时刻）；
    /// 4. 扣减剩余量，回到第 1 步，直至剩余量为零。
    ///
    /// # 契约说明（What）
    /// - `duration` 为零时立即返回，不触发任何实体，也不改变逻辑时间；
    /// - 回调中新建、启动、停止或释放的实体只在下一步的快照中生效。
    pub fn advance_time(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let (timers, delays) = {
                let state = self.inner.state.lock();
                (state.active_timers.clone(), state.active_delays.clone())
            };

            let next_tick = timers
                .iter()
                .filter_map(VirtualTimer::time_until_next_tick)
                .min();
            let next_completion = delays.iter().map(VirtualDelay::time_remaining).min();
            let step = next_tick
                .into_iter()
                .chain(next_completion)
                .fold(remaining, Duration::min);

            let now = {
                let mut state = self.inner.state.lock();
                if let Some(next) = state.current_time.checked_add(step) {
                    state.current_time = next;
                }
                state.elapsed = state.elapsed.saturating_add(step);
                state.current_time
            };
            trace!(
                ?step,
                ?remaining,
                timers = timers.len(),
                delays = delays.len(),
                ?now,
                "virtual clock step"
            );

            for timer in &timers {
                timer.advance(step);
            }
            for delay in &delays {
                delay.advance(step);
            }

            remaining -= step;
        }
    }

    /// 硬重置：清空活跃集合，不投递释放或完成通知。
    ///
    /// 未结算的延迟句柄此后只能通过其取消信号结算。
    pub fn dispose(&self) {
        let mut state = self.inner.state.lock();
        debug!(
            timers = state.active_timers.len(),
            delays = state.active_delays.len(),
            "virtual clock disposed"
        );
        state.active_timers.clear();
        state.active_delays.clear();
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("VirtualClock")
            .field("current_time", &state.current_time)
            .field("elapsed", &state.elapsed)
            .field("active_timers", &state.active_timers.len())
            .field("active_delays", &state.active_delays.len())
            .finish()
    }
}

/// [`VirtualClock`] 构建器，在 `build` 时完成参数校验。
#[derive(Clone, Debug, Default)]
pub struct VirtualClockBuilder {
    options: VirtualClockOptions,
    start_time: Option<SystemTime>,
    default_timer_interval: Option<Duration>,
}

impl VirtualClockBuilder {
    /// 设置逻辑时间起点，优先于配置中的 `start_unix_ms`。
    pub fn with_start_time(mut self, start: SystemTime) -> Self {
        self.start_time = Some(start);
        self
    }

    /// 设置新建定时器的默认间隔，优先于配置中的 `default_timer_interval_ms`，保留亚毫秒精度。
    pub fn with_default_timer_interval(mut self, interval: Duration) -> Self {
        self.default_timer_interval = Some(interval);
        self
    }

    /// 整体替换配置。
    pub fn with_options(mut self, options: VirtualClockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<VirtualClock> {
        let interval = self
            .default_timer_interval
            .unwrap_or_else(|| self.options.default_timer_interval());
        ensure_interval("default_timer_interval", interval)?;
        let start = self
            .start_time
            .unwrap_or_else(|| self.options.start_time());
        Ok(VirtualClock::from_parts(start, interval))
    }
}
