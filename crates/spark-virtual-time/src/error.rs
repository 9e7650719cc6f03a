//! 虚拟时间组件的统一错误类型。
//!
//! # 设计背景（Why）
//! - 虚拟时钟是测试替身，误用必须尽早暴露：参数越界与操作已释放对象均在调用点同步返回错误；
//! - 延迟句柄的取消属于异步结局，与同步误用共用一个枚举，便于调用方统一 `?` 传播。
//!
//! # 契约说明（What）
//! - 每个变体都对应稳定错误码（[`TimeError::code`]），命名遵循 `spark.time.<kind>`；
//! - 内部从不重试或吞掉错误，所有失败立即返回给调用方。

use std::time::Duration;

use thiserror::Error;

/// 定时器间隔与 `cancel_after` 延迟允许的最大值（`i32::MAX` 毫秒）。
pub const MAX_INTERVAL: Duration = Duration::from_millis(i32::MAX as u64);

const INVALID_ARGUMENT_CODE: &str = "spark.time.invalid_argument";
const OBJECT_DISPOSED_CODE: &str = "spark.time.object_disposed";
const CANCELLED_CODE: &str = "spark.time.cancelled";
const CONFIGURATION_CODE: &str = "spark.time.configuration";

/// 虚拟时间错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    /// 间隔或持续时间为零、或超过 [`MAX_INTERVAL`]。
    #[error("参数 `{name}` 越界：{value:?} 必须大于零且不超过 i32::MAX 毫秒")]
    InvalidArgument { name: &'static str, value: Duration },
    /// 对已释放的定时器或取消源执行操作。
    #[error("对象 `{object}` 已释放，禁止继续操作")]
    ObjectDisposed { object: &'static str },
    /// 延迟在到期前被取消信号打断。
    #[error("延迟在完成前被取消")]
    Cancelled,
    /// 时钟配置无法解析或取值非法。
    #[error("虚拟时钟配置无效：{0}")]
    Configuration(String),
}

impl TimeError {
    /// 返回稳定错误码，供断言与日志检索使用。
    pub fn code(&self) -> &'static str {
        match self {
            TimeError::InvalidArgument { .. } => INVALID_ARGUMENT_CODE,
            TimeError::ObjectDisposed { .. } => OBJECT_DISPOSED_CODE,
            TimeError::Cancelled => CANCELLED_CODE,
            TimeError::Configuration(_) => CONFIGURATION_CODE,
        }
    }

    /// 是否为取消结局。
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TimeError::Cancelled)
    }
}

/// 本 crate 的结果别名，默认错误类型为 [`TimeError`]。
pub type Result<T, E = TimeError> = core::result::Result<T, E>;

/// 校验间隔类参数位于 `(0, MAX_INTERVAL]`。
pub(crate) fn ensure_interval(name: &'static str, value: Duration) -> Result<()> {
    if value.is_zero() || value > MAX_INTERVAL {
        return Err(TimeError::InvalidArgument { name, value });
    }
    Ok(())
}
