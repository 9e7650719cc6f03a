//! 显式观察者列表：按登记顺序同步投递通知。
//!
//! # 设计背景（Why）
//! - 定时器的“触发”“释放”通知需要在 `advance` 期间确定性地同步投递，顺序必须可复现；
//! - 回调内部可能再次登记或移除观察者，因此投递前先复制快照，投递期间不持有任何锁。
//!
//! # 契约说明（What）
//! - [`HandlerList::snapshot`] 返回登记顺序的回调副本；
//! - 投递由持有者在释放自身锁之后完成，本类型不做同步，由外层 `Mutex` 保护。

use std::fmt;
use std::sync::Arc;

/// 观察者登记标识，用于后续移除。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub(crate) type Handler<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

pub(crate) struct HandlerList<T: ?Sized> {
    next_id: u64,
    entries: Vec<(HandlerId, Handler<T>)>,
}

impl<T: ?Sized> HandlerList<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handler: Handler<T>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, handler));
        id
    }

    /// 移除指定观察者；返回是否确实存在。
    pub(crate) fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        before != self.entries.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Handler<T>> {
        self.entries
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T: ?Sized> fmt::Debug for HandlerList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerList")
            .field("handlers", &self.len())
            .finish()
    }
}
