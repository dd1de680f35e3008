//! 基于 PostgreSQL advisory lock 的分布式锁
//!
//! 多个进程/主机通过共享的 PostgreSQL 实现互斥，无需独立的锁服务。
//!
//! ## 设计理念
//!
//! - **名称即标识**: 锁名（带命名空间）经 SHA-1 映射为 bigint，所有进程计算结果一致
//! - **一锁一连接**: 每个 [`Lock`] 独占一个会话，会话结束时数据库自动释放其锁
//! - **归还兜底**: 连接归还连接池时执行 `pg_advisory_unlock_all()`，
//!   避免遗漏释放的锁随连接复用而长期挂起
//! - **作用域获取**: [`Locker::with_lock`] / [`Lock::scoped`] 保证获取失败时不执行业务代码
//!
//! ## 使用示例
//!
//! ```ignore
//! let locker = Locker::connect(&config.locker, &config.database).await?;
//!
//! locker
//!     .with_lock("nightly-report", || async {
//!         generate_report().await
//!     })
//!     .await??;
//!
//! let mut lock = locker.lock("import")?;
//! if lock.acquire().await? {
//!     import().await?;
//!     lock.release().await?;
//! }
//! ```

pub mod checkin;
pub mod error;
pub mod identifier;
pub mod lock;
pub mod locker;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod session;

pub use checkin::{CheckinHooks, UnlockAllOnCheckin};
pub use error::{LockError, Result};
pub use lock::{Acquisition, Lock, LockGuard};
pub use locker::Locker;
pub use policy::{AcquireStrategy, LockOptions, LockPolicy};
pub use provider::{MemorySession, MemorySessionProvider, PgSession, PgSessionProvider};
pub use session::{AdvisoryConnection, CheckinHook, Session, SessionProvider};
