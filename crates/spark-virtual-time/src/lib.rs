#![deny(unsafe_code)]
#![doc = "spark-virtual-time: 以显式推进驱动定时器、延迟与超时取消的确定性虚拟时钟。"]
#![doc = ""]
#![doc = "== 使用方式 =="]
#![doc = "1. 以 [`VirtualClock`] 创建定时器、延迟与取消源，业务代码只依赖这些句柄；"]
#![doc = "2. 测试调用 [`VirtualClock::advance_time`] 推进逻辑时间，所有到期回调在调用线程上同步执行；"]
#![doc = "3. 每一步都推进到最近的事件边界，回调观察到的 [`VirtualClock::current_time`] 即事件时刻。"]
#![doc = ""]
#![doc = "== 并发约定 =="]
#![doc = "推进由单一驱动者发起；取消可在任意线程触发，且不受虚拟时间门控。"]

mod cancellation;
mod clock;
mod delay;
mod error;
mod event;
mod options;
mod source;
mod timer;

pub use cancellation::{Cancellation, CancellationRegistration, WaitForCancellation};
pub use clock::{VirtualClock, VirtualClockBuilder};
pub use delay::Delay;
pub use error::{MAX_INTERVAL, Result, TimeError};
pub use event::HandlerId;
pub use options::{DEFAULT_START_UNIX_MS, VirtualClockOptions};
pub use source::VirtualCancellationSource;
pub use timer::{DEFAULT_TIMER_INTERVAL, VirtualTimer};
