//! 虚拟定时器：由调用方显式推进的重复/单次定时器。
//!
//! # 设计背景（Why）
//! - 业务代码中的周期任务需要在测试里“瞬间”跑完数小时的节律，同时保持触发次数与顺序精确；
//! - 定时器本身不感知真实时间，只在 [`VirtualTimer::advance`] 被调用时结算跨过的间隔边界。
//!
//! # 状态机（What）
//! - `Disabled --start--> Enabled --stop--> Disabled`；
//! - `auto_reset = false` 时，首次触发前自动回到 `Disabled`；
//! - 任意状态 `--dispose--> Disposed`（终态）：先投递释放通知，再标记释放，此后 `start` 返回 [`TimeError::ObjectDisposed`]。
//!
//! # 结算逻辑（How）
//! - 累计自启用以来的耗时，`floor(累计耗时 / 间隔) - 已触发次数` 即为本次需要触发的次数；
//! - 使用整数纳秒运算，避免浮点累计误差导致边界处少触发或多触发；
//! - 每次触发前重新检查启用状态：回调可能在同一次推进中停止定时器，后续触发必须随之终止。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, TimeError, ensure_interval};
use crate::event::{HandlerId, HandlerList};

/// 未显式设置间隔时采用的默认值。
pub const DEFAULT_TIMER_INTERVAL: Duration = Duration::from_millis(100);

/// 由虚拟时间驱动的定时器句柄。
///
/// 句柄可廉价克隆，所有克隆共享同一定时器；相等性以底层分配为准（见 [`VirtualTimer::ptr_eq`]）。
/// 回调以 `&VirtualTimer` 形式接收触发者，因此在回调中重新 `start`/`stop` 不需要额外捕获句柄。
#[derive(Clone)]
pub struct VirtualTimer {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    state: Mutex<TimerState>,
}

struct TimerState {
    interval: Duration,
    auto_reset: bool,
    enabled: bool,
    disposing: bool,
    disposed: bool,
    elapsed_since_enable: Duration,
    ticks_fired_since_enable: u128,
    elapsed_handlers: HandlerList<VirtualTimer>,
    disposing_handlers: HandlerList<VirtualTimer>,
}

impl TimerState {
    /// 切换启用状态；仅在 `false -> true` 的跃迁上清零计数器。
    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.elapsed_since_enable = Duration::ZERO;
            self.ticks_fired_since_enable = 0;
        }
    }
}

impl VirtualTimer {
    /// 创建未登记到任何时钟的独立定时器，初始为禁用状态。
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_TIMER_INTERVAL)
    }

    pub(crate) fn with_interval(interval: Duration) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                state: Mutex::new(TimerState {
                    interval,
                    auto_reset: true,
                    enabled: false,
                    disposing: false,
                    disposed: false,
                    elapsed_since_enable: Duration::ZERO,
                    ticks_fired_since_enable: 0,
                    elapsed_handlers: HandlerList::new(),
                    disposing_handlers: HandlerList::new(),
                }),
            }),
        }
    }

    /// 当前触发间隔。
    pub fn interval(&self) -> Duration {
        self.inner.state.lock().interval
    }

    /// 设置触发间隔。
    ///
    /// # 契约说明（What）
    /// - `interval` 必须位于 `(0, MAX_INTERVAL]`，否则返回 [`TimeError::InvalidArgument`] 且不修改状态；
    /// - 修改间隔不会重置已累计的耗时，下一次结算按新间隔重新计算边界。
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        ensure_interval("interval", interval)?;
        self.inner.state.lock().interval = interval;
        Ok(())
    }

    pub fn auto_reset(&self) -> bool {
        self.inner.state.lock().auto_reset
    }

    pub fn set_auto_reset(&self, auto_reset: bool) {
        self.inner.state.lock().auto_reset = auto_reset;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// 启用定时器；从禁用切换到启用时清零累计耗时与触发计数。
    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(TimeError::ObjectDisposed {
                object: "VirtualTimer",
            });
        }
        state.set_enabled(true);
        Ok(())
    }

    /// 停用定时器。对已释放的定时器同样安全，保持无操作。
    pub fn stop(&self) {
        self.inner.state.lock().set_enabled(false);
    }

    /// 登记触发回调，按登记顺序同步调用。
    pub fn on_elapsed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&VirtualTimer) + Send + Sync + 'static,
    {
        self.inner.state.lock().elapsed_handlers.push(Arc::new(handler))
    }

    pub fn remove_elapsed_handler(&self, id: HandlerId) -> bool {
        self.inner.state.lock().elapsed_handlers.remove(id)
    }

    /// 登记释放通知，仅在首次 [`VirtualTimer::dispose`] 时投递一次。
    pub fn on_disposing<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&VirtualTimer) + Send + Sync + 'static,
    {
        self.inner
            .state
            .lock()
            .disposing_handlers
            .push(Arc::new(handler))
    }

    pub fn remove_disposing_handler(&self, id: HandlerId) -> bool {
        self.inner.state.lock().disposing_handlers.remove(id)
    }

    /// 将定时器向前推进 `step`，并同步触发跨过的每一个间隔边界。
    ///
    /// # 逻辑解析（How）
    /// 1. 禁用时直接返回；
    /// 2. 累加耗时，按 `floor(累计 / 间隔) - 已触发` 求出本次触发次数；
    /// 3. 逐次触发：先检查仍处于启用状态，再递增已触发计数（回调内查询剩余时间即可看到本次触发），
    ///    `auto_reset = false` 时在调用回调前禁用自身；
    /// 4. 触发次数在第 2 步即确定，回调中重新 `start` 的单次定时器会在同一次推进内继续触发剩余次数。
    ///
    /// # 并发约束
    /// - 回调执行期间不持有任何内部锁，回调可以重入本定时器的全部公开方法。
    pub fn advance(&self, step: Duration) {
        let ticks_to_fire = {
            let mut state = self.inner.state.lock();
            if !state.enabled {
                return;
            }
            state.elapsed_since_enable = state.elapsed_since_enable.saturating_add(step);
            let due = state.elapsed_since_enable.as_nanos() / state.interval.as_nanos();
            due.saturating_sub(state.ticks_fired_since_enable)
        };

        for _ in 0..ticks_to_fire {
            let handlers = {
                let mut state = self.inner.state.lock();
                if !state.enabled {
                    break;
                }
                state.ticks_fired_since_enable += 1;
                if !state.auto_reset {
                    state.set_enabled(false);
                }
                let tick = u64::try_from(state.ticks_fired_since_enable).unwrap_or(u64::MAX);
                trace!(interval = ?state.interval, tick, "virtual timer elapsed");
                state.elapsed_handlers.snapshot()
            };

            for handler in handlers {
                handler(self);
            }
        }
    }

    /// 距离下一次触发还需推进的时长；禁用或已释放时返回 `None`（视为无穷远）。
    pub fn time_until_next_tick(&self) -> Option<Duration> {
        let state = self.inner.state.lock();
        if !state.enabled || state.disposed {
            return None;
        }
        // interval - (elapsed - fired * interval) == (fired + 1) * interval - elapsed
        let next_boundary = (state.ticks_fired_since_enable + 1) * state.interval.as_nanos();
        let remaining = next_boundary.saturating_sub(state.elapsed_since_enable.as_nanos());
        Some(duration_from_nanos(remaining))
    }

    /// 释放定时器。
    ///
    /// # 契约说明（What）
    /// - 首次调用时先按登记顺序投递释放通知，通知期间定时器仍未标记为已释放；
    ///   通知结束后才停用并标记为已释放，此后 `start` 返回 [`TimeError::ObjectDisposed`]；
    /// - 重复调用（包括在释放通知中重入）为无操作，因此释放通知严格只投递一次；
    /// - 通知投递完毕后清空全部回调，切断回调闭包对外部对象的持有。
    pub fn dispose(&self) {
        let handlers = {
            let mut state = self.inner.state.lock();
            if state.disposing || state.disposed {
                return;
            }
            state.disposing = true;
            state.disposing_handlers.snapshot()
        };
        debug!(handlers = handlers.len(), "virtual timer disposed");

        for handler in handlers {
            handler(self);
        }

        let mut state = self.inner.state.lock();
        state.disposed = true;
        state.set_enabled(false);
        state.elapsed_handlers.clear();
        state.disposing_handlers.clear();
    }

    /// 判断两个句柄是否指向同一定时器。
    pub fn ptr_eq(&self, other: &VirtualTimer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for VirtualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("VirtualTimer")
            .field("interval", &state.interval)
            .field("auto_reset", &state.auto_reset)
            .field("enabled", &state.enabled)
            .field("disposed", &state.disposed)
            .field("elapsed_since_enable", &state.elapsed_since_enable)
            .field("ticks_fired_since_enable", &state.ticks_fired_since_enable)
            .finish()
    }
}

pub(crate) fn duration_from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}
