//! 取消信号：可共享的取消位加按序投递的回调列表。
//!
//! # 设计背景（Why）
//! - 虚拟延迟与超时取消源都需要“信号触发时立即通知下游”的能力，且通知不能被虚拟时间门控；
//! - 取消可能来自任意真实线程，因此取消位使用原子变量，回调列表由互斥锁保护。

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;
use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// 取消原语，统一表达跨组件的可中断性契约。
///
/// # 逻辑解析（How）
/// - 内部使用 [`AtomicBool`] 表达取消状态，并通过 [`Arc`] 支持多方共享；
/// - `cancel` 在首次成功设置取消位时返回 `true`，并在调用线程上按登记顺序执行全部回调；
/// - `register` 在已取消的令牌上登记时立即执行回调，不会丢失通知。
///
/// # 契约说明（What）
/// - **前置条件**：构造时无需额外参数，默认处于“未取消”状态；
/// - **后置条件**：一旦 `cancel` 成功，`is_cancelled` 全局可见，所有已登记回调恰好执行一次；
/// - 回调执行期间不持有内部锁，回调可以再次登记或取消其他令牌。
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

struct CancellationState {
    flag: AtomicBool,
    callbacks: Mutex<CallbackSlots>,
}

#[derive(Default)]
struct CallbackSlots {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的取消令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                flag: AtomicBool::new(false),
                callbacks: Mutex::new(CallbackSlots::default()),
            }),
        }
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 将当前令牌标记为取消。
    ///
    /// 返回值为 `true` 表示本次调用首次触发取消；返回 `false` 表示之前已被取消，此时不会重复执行回调。
    pub fn cancel(&self) -> bool {
        if self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // 取消位先于取锁设置：与 `register` 的“持锁检查取消位”配合，保证回调不会遗漏。
        let callbacks = mem::take(&mut self.inner.callbacks.lock().entries);
        for (_, callback) in callbacks {
            callback();
        }
        true
    }

    /// 登记取消回调。
    ///
    /// # 契约说明（What）
    /// - 令牌尚未取消时，回调在首次 `cancel` 的线程上执行；
    /// - 令牌已取消时，回调在当前线程立即执行，返回的登记句柄为空操作；
    /// - 丢弃返回的 [`CancellationRegistration`] 即撤销尚未执行的回调。
    pub fn register<F>(&self, callback: F) -> CancellationRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut slots = self.inner.callbacks.lock();
            if !self.is_cancelled() {
                let id = slots.next_id;
                slots.next_id += 1;
                slots.entries.push((id, Box::new(callback)));
                return CancellationRegistration {
                    id: Some(id),
                    state: Arc::downgrade(&self.inner),
                };
            }
        }

        callback();
        CancellationRegistration {
            id: None,
            state: Weak::new(),
        }
    }

    /// 返回一个在令牌被取消时完成的 Future。
    pub fn cancelled(&self) -> WaitForCancellation {
        WaitForCancellation {
            token: self.clone(),
            waker: Arc::new(AtomicWaker::new()),
            registration: None,
        }
    }

    /// 派生共享同一取消位的子令牌，用于跨组件传播取消语义。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .field("callbacks", &self.inner.callbacks.lock().entries.len())
            .finish()
    }
}

/// 取消回调的登记句柄；丢弃即撤销尚未执行的回调。
#[must_use = "丢弃登记句柄会立即撤销回调"]
pub struct CancellationRegistration {
    id: Option<u64>,
    state: Weak<CancellationState>,
}

impl CancellationRegistration {
    /// 显式撤销回调，等价于丢弃句柄。
    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let (Some(id), Some(state)) = (self.id.take(), self.state.upgrade()) {
            state.callbacks.lock().entries.retain(|(entry, _)| *entry != id);
        }
    }
}

impl fmt::Debug for CancellationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationRegistration")
            .field("id", &self.id)
            .finish()
    }
}

/// [`Cancellation::cancelled`] 返回的 Future。
///
/// 首次轮询时登记唤醒回调，之后只刷新 waker；令牌取消后恒为 `Ready`。
pub struct WaitForCancellation {
    token: Cancellation,
    waker: Arc<AtomicWaker>,
    registration: Option<CancellationRegistration>,
}

impl Future for WaitForCancellation {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(());
        }

        this.waker.register(cx.waker());
        if this.registration.is_none() {
            let waker = Arc::clone(&this.waker);
            this.registration = Some(this.token.register(move || waker.wake()));
        }

        if this.token.is_cancelled() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl fmt::Debug for WaitForCancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForCancellation")
            .field("token", &self.token)
            .finish()
    }
}
