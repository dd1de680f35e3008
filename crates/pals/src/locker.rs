//! 锁工厂
//!
//! 一个 Locker 对应一个应用命名空间和一个连接池。它只负责把锁名换算成标识、
//! 合并默认策略并创建 [`Lock`]，不跟踪任何已创建的锁。

use std::future::Future;
use std::sync::Arc;

use pals_shared::config::{DatabaseConfig, LockerConfig};
use tracing::{debug, info, instrument};

use crate::checkin::UnlockAllOnCheckin;
use crate::error::{LockError, Result};
use crate::identifier;
use crate::lock::Lock;
use crate::policy::{LockOptions, LockPolicy};
use crate::provider::PgSessionProvider;
use crate::session::SessionProvider;

/// 锁工厂
pub struct Locker<P: SessionProvider> {
    namespace: Option<String>,
    provider: Arc<P>,
    policy: LockPolicy,
}

impl<P: SessionProvider> Clone for Locker<P> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            provider: Arc::clone(&self.provider),
            policy: self.policy,
        }
    }
}

impl<P: SessionProvider> Locker<P> {
    /// 创建锁工厂，并在 provider 上注册连接归还时的解锁回调
    ///
    /// 多个 Locker 共用一个 provider 时回调只注册一次。
    pub fn new(namespace: Option<&str>, provider: Arc<P>, policy: LockPolicy) -> Self {
        if provider.register_checkin_hook(Arc::new(UnlockAllOnCheckin)) {
            debug!("Checkin unlock hook registered");
        }
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            provider,
            policy,
        }
    }

    /// 按配置创建
    pub fn from_config(config: &LockerConfig, provider: Arc<P>) -> Self {
        Self::new(
            config.namespace.as_deref(),
            provider,
            LockPolicy::from_config(config),
        )
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// 默认策略
    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// 锁名对应的标识
    pub fn lock_id(&self, name: &str) -> i64 {
        identifier::lock_id(self.namespace(), name)
    }

    /// 按默认策略创建锁，不访问数据库
    pub fn lock(&self, name: &str) -> Result<Lock<P>> {
        self.lock_with(name, &LockOptions::default())
    }

    /// 创建锁，`options` 覆盖默认策略
    pub fn lock_with(&self, name: &str, options: &LockOptions) -> Result<Lock<P>> {
        if name.is_empty() {
            return Err(LockError::InvalidLockName(
                "lock name must not be empty".to_string(),
            ));
        }

        let qualified = identifier::qualified_name(self.namespace(), name);
        let id = identifier::lock_id_for(&qualified);
        Ok(Lock::new(
            Arc::clone(&self.provider),
            qualified,
            id,
            self.policy.merge(options),
        ))
    }

    /// 在持有名为 `name` 的锁期间执行 `body`
    ///
    /// 获取失败返回 [`LockError::AcquireFailure`] 且 `body` 不执行。
    pub async fn with_lock<F, Fut, T>(&self, name: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut lock = self.lock(name)?;
        lock.scoped(body).await
    }
}

impl Locker<PgSessionProvider> {
    /// 建立 PostgreSQL 连接池并创建锁工厂
    #[instrument(skip_all, fields(namespace = ?config.namespace))]
    pub async fn connect(config: &LockerConfig, database: &DatabaseConfig) -> Result<Self> {
        let provider = PgSessionProvider::connect(database).await?;
        info!(
            max_connections = database.max_connections,
            strategy = ?config.strategy,
            "Locker connected"
        );
        Ok(Self::from_config(config, Arc::new(provider)))
    }
}
