//! 获取策略
//!
//! Locker 持有默认策略，创建 Lock 时与覆盖项合并，`acquire_with` 时再合并一次。

use std::time::Duration;

use pals_shared::config::{LockerConfig, StrategyKind};

/// 阻塞获取的实现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStrategy {
    /// 设置会话的 lock_timeout 后调用 pg_advisory_lock，由数据库负责等待
    ///
    /// `acquire_timeout` 为零表示无限等待。
    DatabaseTimeout { acquire_timeout: Duration },
    /// 应用侧循环调用 pg_try_advisory_lock
    PollRetry {
        retry_delay: Duration,
        retry_timeout: Duration,
    },
}

impl AcquireStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::DatabaseTimeout { .. } => StrategyKind::DatabaseTimeout,
            Self::PollRetry { .. } => StrategyKind::PollRetry,
        }
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::DatabaseTimeout { .. } => "database_timeout",
            Self::PollRetry { .. } => "poll_retry",
        }
    }
}

/// 单个锁的生效策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub blocking: bool,
    pub strategy: AcquireStrategy,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from_config(&LockerConfig::default())
    }
}

impl LockPolicy {
    pub fn from_config(config: &LockerConfig) -> Self {
        let strategy = match config.strategy {
            StrategyKind::DatabaseTimeout => AcquireStrategy::DatabaseTimeout {
                acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            },
            StrategyKind::PollRetry => AcquireStrategy::PollRetry {
                retry_delay: Duration::from_millis(config.retry_delay_ms),
                retry_timeout: Duration::from_millis(config.retry_timeout_ms),
            },
        };
        Self {
            blocking: config.blocking,
            strategy,
        }
    }

    /// 把覆盖项合并到当前策略上
    ///
    /// 先替换整个策略（若给出），再覆盖与该策略匹配的单项参数；
    /// 不适用于当前策略的参数被忽略。
    pub fn merge(&self, options: &LockOptions) -> Self {
        let mut strategy = options.strategy.unwrap_or(self.strategy);
        match &mut strategy {
            AcquireStrategy::DatabaseTimeout { acquire_timeout } => {
                if let Some(timeout) = options.acquire_timeout {
                    *acquire_timeout = timeout;
                }
            }
            AcquireStrategy::PollRetry {
                retry_delay,
                retry_timeout,
            } => {
                if let Some(delay) = options.retry_delay {
                    *retry_delay = delay;
                }
                if let Some(timeout) = options.retry_timeout {
                    *retry_timeout = timeout;
                }
            }
        }
        Self {
            blocking: options.blocking.unwrap_or(self.blocking),
            strategy,
        }
    }
}

/// 策略覆盖项，未设置的字段沿用默认值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockOptions {
    pub blocking: Option<bool>,
    pub strategy: Option<AcquireStrategy>,
    pub acquire_timeout: Option<Duration>,
    pub retry_delay: Option<Duration>,
    pub retry_timeout: Option<Duration>,
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = Some(blocking);
        self
    }

    pub fn strategy(mut self, strategy: AcquireStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = Some(timeout);
        self
    }
}
