//! 锁错误类型
//!
//! 锁被占用是正常的控制流，以 `Ok(false)` 表达，不在此列。

use thiserror::Error;

/// PostgreSQL `lock_not_available`，lock_timeout 到期时返回
pub const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

/// 锁错误类型
#[derive(Debug, Error)]
pub enum LockError {
    // ==================== 获取失败 ====================
    /// 仅由作用域获取（`scoped` / `with_lock` / `into_guard`）返回
    #[error("获取锁失败: {name}")]
    AcquireFailure { name: String },

    /// 数据库报告的等待超时，由获取流程转换为 `false`
    #[error("等待锁超时")]
    LockTimeout,

    // ==================== 参数错误 ====================
    #[error("无效的锁名称: {0}")]
    InvalidLockName(String),

    // ==================== 后端错误 ====================
    #[error("数据库错误: {0}")]
    Database(sqlx::Error),

    #[error("连接池获取连接超时")]
    PoolTimedOut,

    #[error("会话已终止: session_id={session_id}")]
    SessionTerminated { session_id: u64 },
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, LockError>;

impl LockError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::AcquireFailure { .. } => "ACQUIRE_FAILURE",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::InvalidLockName(_) => "INVALID_LOCK_NAME",
            Self::Database(_) => "DATABASE_ERROR",
            Self::PoolTimedOut => "POOL_TIMED_OUT",
            Self::SessionTerminated { .. } => "SESSION_TERMINATED",
        }
    }

    /// 是否为数据库报告的锁等待超时
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout)
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquireFailure { .. } | Self::LockTimeout | Self::PoolTimedOut
        )
    }

    /// 是否为会话所在连接已断开
    ///
    /// 包括 IO 错误、admin_shutdown 类 (57P) 与 connection_exception 类 (08)。
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::SessionTerminated { .. } => true,
            Self::Database(sqlx::Error::Io(_)) => true,
            Self::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .is_some_and(|code| code.starts_with("57P") || code.starts_with("08")),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for LockError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolTimedOut,
            sqlx::Error::Database(ref db_err)
                if db_err.code().as_deref() == Some(SQLSTATE_LOCK_NOT_AVAILABLE) =>
            {
                Self::LockTimeout
            }
            other => Self::Database(other),
        }
    }
}
