//! 虚拟时钟的声明式配置。
//!
//! # 设计背景（Why）
//! - 测试夹具常以 TOML 片段描述初始时间等参数，集中解析可避免各测试手写魔法数；
//! - 与 [`VirtualClockBuilder`](crate::VirtualClockBuilder) 配合：配置负责“读入”，构建器负责“落地”。
//!
//! # 契约说明（What）
//! - 缺省字段取默认值（起始时间 2020-10-27T12:00:00Z，默认定时器间隔 100ms）；
//! - 未知字段视为错误，防止拼写错误被静默忽略；
//! - `default_timer_interval_ms` 必须位于 `(0, i32::MAX]`。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::error::{Result, TimeError, ensure_interval};
use crate::timer::DEFAULT_TIMER_INTERVAL;

/// 默认起始时间：2020-10-27T12:00:00Z 的 Unix 毫秒数。
pub const DEFAULT_START_UNIX_MS: u64 = 1_603_800_000_000;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VirtualClockOptions {
    /// 逻辑时间起点（Unix 毫秒）。
    pub start_unix_ms: u64,
    /// 新建定时器的默认间隔（毫秒）。
    pub default_timer_interval_ms: u64,
}

impl VirtualClockOptions {
    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(source).map_err(|err| TimeError::Configuration(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_interval("default_timer_interval_ms", self.default_timer_interval())
            .map_err(|err| TimeError::Configuration(err.to_string()))
    }

    pub fn start_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.start_unix_ms)
    }

    pub fn default_timer_interval(&self) -> Duration {
        Duration::from_millis(self.default_timer_interval_ms)
    }
}

impl Default for VirtualClockOptions {
    fn default() -> Self {
        Self {
            start_unix_ms: DEFAULT_START_UNIX_MS,
            default_timer_interval_ms: DEFAULT_TIMER_INTERVAL.as_millis() as u64,
        }
    }
}
