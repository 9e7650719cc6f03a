//! 虚拟取消源：在虚拟时间到达超时点时自动触发取消。
//!
//! # 设计背景（Why）
//! - 业务代码常以“N 秒后取消”表达超时，测试需要让这一超时跟随虚拟时钟而非真实时钟；
//! - 取消源懒创建一个由时钟管理的定时器，定时器触发即取消；手动取消与超时取消共用同一路径。
//!
//! # 并发约束
//! - 定时器槽位使用 [`ArcSwapOption`]，并发的首次 `cancel_after` 通过 CAS 决出唯一胜者，
//!   落败方立即释放自己多建的定时器，因此时钟中至多存在一个属于本取消源的定时器；
//! - `cancel_after` 与 `cancel` 竞争时，前者可能对已释放的定时器调用 `start`，该错误被视为“已取消”而忽略；
//! - `cancel_after` 与 `dispose` 竞争时，`cancel_after` 在启动后复查释放标记并回收定时器；
//!   定时器触发时若取消源已释放或已丢弃，定时器释放自身，不会滞留在时钟中。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, trace};

use crate::cancellation::Cancellation;
use crate::clock::VirtualClock;
use crate::error::{Result, TimeError, ensure_interval};
use crate::timer::VirtualTimer;

const OBJECT_NAME: &str = "VirtualCancellationSource";

/// 受虚拟时钟驱动的取消源。
///
/// # 契约说明（What）
/// - [`token`](Self::token) 返回的 [`Cancellation`] 可交给任意消费者（例如 [`VirtualClock::create_delay`]）；
/// - `cancel_after` 以最近一次调用为准重新计时，已取消时为无操作；
/// - 释放（显式 [`dispose`](Self::dispose) 或丢弃句柄）会释放内部定时器，但不会触发取消；
/// - 释放后 `cancel` 与 `cancel_after` 均返回 [`TimeError::ObjectDisposed`]。
pub struct VirtualCancellationSource {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    clock: VirtualClock,
    token: Cancellation,
    timer: ArcSwapOption<VirtualTimer>,
    disposed: AtomicBool,
}

impl SourceInner {
    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TimeError::ObjectDisposed {
                object: OBJECT_NAME,
            });
        }
        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        if let Some(timer) = self.timer.swap(None) {
            timer.dispose();
        }
        if self.token.cancel() {
            debug!("virtual cancellation requested");
        }
        Ok(())
    }

    /// 取出已安装的定时器；槽位为空时创建新定时器并以 CAS 安装。
    fn timer(self: &Arc<Self>) -> Arc<VirtualTimer> {
        if let Some(timer) = self.timer.load_full() {
            return timer;
        }

        let fresh = Arc::new(self.clock.create_timer());
        let source = Arc::downgrade(self);
        fresh.on_elapsed(move |timer| match source.upgrade() {
            Some(source) => {
                if let Err(err) = source.cancel() {
                    trace!(code = err.code(), "timeout fired after source disposal");
                    timer.dispose();
                }
            }
            // 取消源已丢弃：定时器不再有归属，自行移出时钟。
            None => timer.dispose(),
        });

        let empty: Option<Arc<VirtualTimer>> = None;
        let previous = self
            .timer
            .compare_and_swap(&empty, Some(Arc::clone(&fresh)));
        match &*previous {
            None => fresh,
            Some(winner) => {
                fresh.dispose();
                Arc::clone(winner)
            }
        }
    }
}

impl VirtualCancellationSource {
    /// 创建尚未安排超时的取消源。
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                clock,
                token: Cancellation::new(),
                timer: ArcSwapOption::empty(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn with_timeout(clock: VirtualClock, timeout: Duration) -> Result<Self> {
        let source = Self::new(clock);
        source.cancel_after(timeout)?;
        Ok(source)
    }

    /// 在虚拟时间推进 `delay` 后取消；重复调用以最后一次为准。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`delay` 位于 `(0, i32::MAX 毫秒]`，否则返回 [`TimeError::InvalidArgument`]；
    /// - 取消源已释放时返回 [`TimeError::ObjectDisposed`]；
    /// - 已取消时直接返回 `Ok(())`，不创建定时器。
    pub fn cancel_after(&self, delay: Duration) -> Result<()> {
        ensure_interval("delay", delay)?;
        self.inner.ensure_not_disposed()?;
        if self.inner.token.is_cancelled() {
            return Ok(());
        }

        let timer = self.inner.timer();
        timer.stop();
        timer.set_interval(delay)?;
        if timer.start().is_err() {
            // 并发的 cancel 已释放定时器，取消已经发生。
            trace!("cancel_after raced with cancel");
            return Ok(());
        }
        if self.inner.disposed.load(Ordering::Acquire) {
            // 并发的 dispose 可能在安装前清空了槽位，由本次调用回收刚安装的定时器。
            if let Some(timer) = self.inner.timer.swap(None) {
                timer.dispose();
            }
            return Err(TimeError::ObjectDisposed {
                object: OBJECT_NAME,
            });
        }
        debug!(?delay, "virtual cancellation scheduled");
        Ok(())
    }

    /// 立即取消；重复调用为无操作。
    pub fn cancel(&self) -> Result<()> {
        self.inner.cancel()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// 返回共享取消位的令牌。
    pub fn token(&self) -> Cancellation {
        self.inner.token.child()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// 释放取消源与内部定时器；不触发取消，可重复调用。
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(timer) = self.inner.timer.swap(None) {
            timer.dispose();
        }
        trace!("virtual cancellation source disposed");
    }
}

impl Drop for VirtualCancellationSource {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for VirtualCancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualCancellationSource")
            .field("cancelled", &self.is_cancellation_requested())
            .field("disposed", &self.is_disposed())
            .field("timer_installed", &self.inner.timer.load().is_some())
            .finish()
    }
}
