//! 虚拟延迟：在累计推进时长达到目标后完成的一次性等待。
//!
//! # 设计背景（Why）
//! - 业务代码中的 `sleep`/超时等待需要在测试中由虚拟时钟驱动完成，而取消必须与虚拟时间无关，
//!   随时由外部取消信号触发；
//! - 完成与取消两条结算路径可能在不同线程上竞争，首个结算生效，后续结算静默忽略。
//!
//! # 结构概览（What）
//! - [`VirtualDelay`]：时钟持有的推进端，负责扣减剩余时间；
//! - [`Delay`]：交给调用方的完成句柄，实现 [`Future`]，也可通过 [`Delay::outcome`] 轮询结果。

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::task::AtomicWaker;
use parking_lot::Mutex;
use tracing::trace;

use crate::cancellation::{Cancellation, CancellationRegistration};
use crate::error::{Result, TimeError};

type SettledHook = Box<dyn FnOnce() + Send + 'static>;

struct DelayShared {
    state: Mutex<DelayState>,
    waker: AtomicWaker,
    // 取消登记在结算后释放；回调只持有弱引用，因此此处的强持有不构成环。
    registration: Mutex<Option<CancellationRegistration>>,
}

struct DelayState {
    time_remaining: Duration,
    outcome: Option<Result<()>>,
    settled_hooks: Vec<SettledHook>,
}

impl DelayShared {
    fn new(time_remaining: Duration, outcome: Option<Result<()>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DelayState {
                time_remaining,
                outcome,
                settled_hooks: Vec::new(),
            }),
            waker: AtomicWaker::new(),
            registration: Mutex::new(None),
        })
    }

    /// 写入结局；仅首次调用生效，返回是否由本次调用完成结算。
    fn settle(&self, outcome: Result<()>) -> bool {
        let hooks = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            mem::take(&mut state.settled_hooks)
        };

        drop(self.registration.lock().take());
        self.waker.wake();
        for hook in hooks {
            hook();
        }
        true
    }

    fn outcome(&self) -> Option<Result<()>> {
        self.state.lock().outcome.clone()
    }
}

/// 时钟内部持有的延迟推进端。
#[derive(Clone)]
pub(crate) struct VirtualDelay {
    id: u64,
    shared: Arc<DelayShared>,
}

impl VirtualDelay {
    /// 创建延迟并登记到取消信号上，返回推进端与完成句柄。
    ///
    /// 取消信号若已处于取消状态，返回的延迟立即以 [`TimeError::Cancelled`] 结算。
    pub(crate) fn new(id: u64, duration: Duration, cancellation: &Cancellation) -> (Self, Delay) {
        let shared = DelayShared::new(duration, None);
        let weak = Arc::downgrade(&shared);
        let registration = cancellation.register(move || {
            if let Some(shared) = weak.upgrade() {
                if shared.settle(Err(TimeError::Cancelled)) {
                    trace!("virtual delay cancelled");
                }
            }
        });
        if shared.outcome().is_none() {
            *shared.registration.lock() = Some(registration);
        }

        let delay = Delay {
            shared: Arc::clone(&shared),
        };
        (Self { id, shared }, delay)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn time_remaining(&self) -> Duration {
        self.shared.state.lock().time_remaining
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// 登记结算通知；已结算时立即执行。
    pub(crate) fn on_settled<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if state.outcome.is_none() {
                state.settled_hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// 扣减剩余时间；以扣减前的剩余值与 `step` 比较，恰好到期同样视为完成。
    pub(crate) fn advance(&self, step: Duration) {
        let due = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return;
            }
            let due = state.time_remaining <= step;
            state.time_remaining = state.time_remaining.saturating_sub(step);
            due
        };

        if due && self.shared.settle(Ok(())) {
            trace!(id = self.id, "virtual delay completed");
        }
    }
}

impl fmt::Debug for VirtualDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDelay")
            .field("id", &self.id)
            .field("time_remaining", &self.time_remaining())
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// 延迟的完成句柄。
///
/// # 契约说明（What）
/// - 作为 [`Future`] 等待时输出 `Ok(())`（虚拟时间到期）或 `Err(TimeError::Cancelled)`（取消信号先触发）；
/// - 结局一旦确定便不再变化，重复轮询返回相同结果；
/// - 不依赖执行器也可通过 [`Delay::outcome`] 查询当前结局。
pub struct Delay {
    shared: Arc<DelayShared>,
}

impl Delay {
    /// 已成功完成的句柄，用于零时长延迟。
    pub(crate) fn completed() -> Self {
        Self {
            shared: DelayShared::new(Duration::ZERO, Some(Ok(()))),
        }
    }

    /// 当前结局：`None` 表示仍在等待。
    pub fn outcome(&self) -> Option<Result<()>> {
        self.shared.outcome()
    }

    /// 是否已结算（完成或取消）。
    pub fn is_completed(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// 是否以取消结算。
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Err(TimeError::Cancelled)))
    }
}

impl Future for Delay {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.shared.outcome() {
            return Poll::Ready(outcome);
        }

        self.shared.waker.register(cx.waker());
        match self.shared.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("outcome", &self.outcome())
            .finish()
    }
}
