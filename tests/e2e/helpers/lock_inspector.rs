//! 数据库侧锁状态查询
//!
//! bigint 形式的 advisory lock 在 pg_locks 中拆成 classid（高 32 位）
//! 和 objid（低 32 位），objsubid 固定为 1。

use anyhow::Result;
use sqlx::PgPool;

const HOLDER_FILTER: &str = "locktype = 'advisory' AND granted AND objsubid = 1 \
     AND ((classid::bigint << 32) | objid::bigint) = $1";

/// 锁状态查询工具
#[derive(Clone)]
pub struct LockInspector {
    pool: PgPool,
}

impl LockInspector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 该锁已授予的持有数量（0 或 1）
    pub async fn granted_count(&self, lock_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT count(*) FROM pg_locks WHERE {}", HOLDER_FILTER))
                .bind(lock_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn is_held(&self, lock_id: i64) -> Result<bool> {
        Ok(self.granted_count(lock_id).await? > 0)
    }

    /// 持有该锁的后端进程号
    pub async fn holder_pid(&self, lock_id: i64) -> Result<Option<i32>> {
        let pid: Option<i32> =
            sqlx::query_scalar(&format!("SELECT pid FROM pg_locks WHERE {} LIMIT 1", HOLDER_FILTER))
                .bind(lock_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(pid)
    }

    /// 终止后端进程，模拟会话被管理员强制断开
    pub async fn terminate_backend(&self, pid: i32) -> Result<bool> {
        let terminated: bool = sqlx::query_scalar("SELECT pg_terminate_backend($1)")
            .bind(pid)
            .fetch_one(&self.pool)
            .await?;
        Ok(terminated)
    }

    /// 等待数据库侧释放该锁，超过 `attempts` 次轮询仍未释放返回 false
    pub async fn wait_released(&self, lock_id: i64, attempts: usize) -> Result<bool> {
        for _ in 0..attempts {
            if !self.is_held(lock_id).await? {
                return Ok(true);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        Ok(false)
    }
}
