//! 数据库会话抽象
//!
//! 锁协议只依赖这里定义的能力集，连接池与 SQL 执行层由具体 provider 实现：
//! - [`AdvisoryConnection`]：单个物理连接上的 advisory lock 原语
//! - [`Session`]：从池中取出、由一个 Lock 独占的会话
//! - [`SessionProvider`]：打开会话，并在连接归还连接池时回调 [`CheckinHook`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// 单个物理连接上的 advisory lock 原语
///
/// 语义与 PostgreSQL 会话级 advisory lock 一致：同一会话可重入，
/// 会话结束时自动释放其持有的全部锁。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdvisoryConnection: Send {
    /// `pg_try_advisory_lock`，从不阻塞
    async fn try_advisory_lock(&mut self, lock_id: i64) -> Result<bool>;

    /// 设置会话的 lock_timeout，零表示无限等待
    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// 恢复 lock_timeout 为服务器默认值
    async fn reset_lock_timeout(&mut self) -> Result<()>;

    /// `pg_advisory_lock`
    ///
    /// 超过 lock_timeout 仍未获得时返回 [`LockError::LockTimeout`](crate::LockError::LockTimeout)。
    async fn advisory_lock(&mut self, lock_id: i64) -> Result<()>;

    /// `pg_advisory_unlock`，返回本会话是否确实持有该锁
    async fn advisory_unlock(&mut self, lock_id: i64) -> Result<bool>;

    /// `pg_advisory_unlock_all`
    async fn advisory_unlock_all(&mut self) -> Result<()>;

    /// 连接是否已失效（断开或被终止）
    fn is_closed(&self) -> bool {
        false
    }
}

/// 由单个 Lock 独占的会话
#[async_trait]
pub trait Session: AdvisoryConnection + Sized + 'static {
    /// 关闭会话，底层物理连接归还连接池
    async fn close(self) -> Result<()>;

    /// 在没有异步运行时的情况下同步放弃会话
    ///
    /// 物理连接被直接断开而不是归还连接池，数据库随会话结束释放其全部锁。
    fn abandon(self) {
        drop(self);
    }
}

/// 连接归还连接池时的回调
#[async_trait]
pub trait CheckinHook: Send + Sync + 'static {
    /// 回调标识，同一标识在一个 provider 上只注册一次
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn on_checkin(&self, conn: &mut dyn AdvisoryConnection) -> Result<()>;
}

/// 会话提供者（连接池）
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    type Session: Session;

    /// 从连接池取出一个专用会话，连接池耗尽时阻塞直到超时
    async fn open_session(&self) -> Result<Self::Session>;

    /// 注册连接归还回调，对之后每一次归还生效
    ///
    /// 已注册过同名回调时忽略并返回 `false`。
    fn register_checkin_hook(&self, hook: Arc<dyn CheckinHook>) -> bool;
}
