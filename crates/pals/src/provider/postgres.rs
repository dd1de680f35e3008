//! 基于 sqlx `PgPool` 的会话提供者
//!
//! 连接归还回调通过 `PgPoolOptions::after_release` 接入，因此必须在建池时安装，
//! 无法附加到外部已经建好的连接池上。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pals_shared::config::DatabaseConfig;
use pals_shared::database::{Database, pool_options};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::{debug, instrument, warn};

use crate::checkin::CheckinHooks;
use crate::error::Result;
use crate::session::{AdvisoryConnection, CheckinHook, Session, SessionProvider};

/// lock_timeout 的毫秒取值
///
/// PostgreSQL 把 0 当作无限等待，非零的亚毫秒超时向上取整到 1ms。
fn lock_timeout_setting(timeout: Duration) -> String {
    timeout.as_nanos().div_ceil(1_000_000).to_string()
}

// 物理连接的存活无法同步检测，is_closed 沿用默认的 false：
// 已断开的连接在归还时 unlock_all 失败，被标记为 connection_lost 后由连接池关闭。
#[async_trait]
impl AdvisoryConnection for PgConnection {
    async fn try_advisory_lock(&mut self, lock_id: i64) -> Result<bool> {
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(lock_id)
            .fetch_one(&mut *self)
            .await?;
        Ok(acquired)
    }

    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<()> {
        // SET 不支持绑定参数，改用 set_config；单位为毫秒
        sqlx::query("SELECT set_config('lock_timeout', $1, false)")
            .bind(lock_timeout_setting(timeout))
            .execute(&mut *self)
            .await?;
        Ok(())
    }

    async fn reset_lock_timeout(&mut self) -> Result<()> {
        sqlx::query("RESET lock_timeout").execute(&mut *self).await?;
        Ok(())
    }

    async fn advisory_lock(&mut self, lock_id: i64) -> Result<()> {
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(lock_id)
            .execute(&mut *self)
            .await?;
        Ok(())
    }

    async fn advisory_unlock(&mut self, lock_id: i64) -> Result<bool> {
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .fetch_one(&mut *self)
            .await?;
        Ok(released)
    }

    async fn advisory_unlock_all(&mut self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock_all()")
            .execute(&mut *self)
            .await?;
        Ok(())
    }
}

/// 从 `PgPool` 取出的专用会话
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl PgSession {
    /// 后端进程号，便于在 pg_stat_activity / pg_locks 中定位
    pub async fn backend_pid(&mut self) -> Result<i32> {
        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(pid)
    }
}

#[async_trait]
impl AdvisoryConnection for PgSession {
    async fn try_advisory_lock(&mut self, lock_id: i64) -> Result<bool> {
        self.conn.try_advisory_lock(lock_id).await
    }

    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.conn.set_lock_timeout(timeout).await
    }

    async fn reset_lock_timeout(&mut self) -> Result<()> {
        self.conn.reset_lock_timeout().await
    }

    async fn advisory_lock(&mut self, lock_id: i64) -> Result<()> {
        self.conn.advisory_lock(lock_id).await
    }

    async fn advisory_unlock(&mut self, lock_id: i64) -> Result<bool> {
        self.conn.advisory_unlock(lock_id).await
    }

    async fn advisory_unlock_all(&mut self) -> Result<()> {
        self.conn.advisory_unlock_all().await
    }
}

#[async_trait]
impl Session for PgSession {
    async fn close(self) -> Result<()> {
        // 丢弃 PoolConnection 即归还连接池，随后触发 after_release 回调
        drop(self.conn);
        Ok(())
    }

    /// 脱离连接池后直接断开物理连接，不执行归还回调
    ///
    /// 池配置了 min_connections 时 `PoolConnection` 的析构会 spawn 补充连接的任务，
    /// 这里借一个不运行的临时运行时承接，该任务随之丢弃。
    fn abandon(self) {
        let raw = match tokio::runtime::Builder::new_current_thread().build() {
            Ok(rt) => {
                let _enter = rt.enter();
                self.conn.detach()
            }
            Err(e) => {
                warn!(error = %e, "Failed to build runtime for detaching session");
                self.conn.detach()
            }
        };
        debug!("Abandoned session detached from pool");
        drop(raw);
    }
}

/// PostgreSQL 会话提供者
#[derive(Clone)]
pub struct PgSessionProvider {
    db: Database,
    hooks: Arc<CheckinHooks>,
}

impl PgSessionProvider {
    /// 按配置建立连接池
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::connect_with(pool_options(config), &config.url).await
    }

    /// 使用调用方提供的连接池参数建池
    ///
    /// `options` 上已有的 `after_release` 回调会被替换。
    #[instrument(skip(options, url))]
    pub async fn connect_with(options: PgPoolOptions, url: &str) -> Result<Self> {
        let hooks = Arc::new(CheckinHooks::new());
        let release_hooks = Arc::clone(&hooks);

        let options = options.after_release(move |conn, _meta| {
            let hooks = Arc::clone(&release_hooks);
            Box::pin(async move {
                match hooks.run(conn).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.is_connection_lost() => {
                        debug!(error = %e, "Connection lost, closing it");
                        Ok(false)
                    }
                    Err(e) => {
                        // 关闭该连接，会话结束时数据库会释放它持有的全部锁
                        warn!(error = %e, "Checkin hook failed, closing connection");
                        Ok(false)
                    }
                }
            })
        });

        let db = Database::connect_with(options, url).await?;
        debug!("PostgreSQL session provider ready");

        Ok(Self { db, hooks })
    }

    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// 已注册的归还回调数量
    pub fn checkin_hook_count(&self) -> usize {
        self.hooks.len()
    }
}

#[async_trait]
impl SessionProvider for PgSessionProvider {
    type Session = PgSession;

    async fn open_session(&self) -> Result<PgSession> {
        let conn = self.db.pool().acquire().await?;
        Ok(PgSession { conn })
    }

    fn register_checkin_hook(&self, hook: Arc<dyn CheckinHook>) -> bool {
        self.hooks.register(hook)
    }
}
