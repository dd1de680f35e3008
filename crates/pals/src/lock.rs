//! 单个 advisory lock 句柄
//!
//! 每个 Lock 独占一个会话：首次获取时从连接池取出，释放时关闭，
//! 再次获取会打开新的会话。同一 Lock 的获取与释放通过 `&mut self` 串行化，
//! 不同 Lock 之间没有共享状态，可在不同任务中并发使用。
//!
//! ## 获取策略
//!
//! - **DatabaseTimeout**: 非阻塞时单次 `pg_try_advisory_lock`；阻塞时先设置
//!   lock_timeout 再 `pg_advisory_lock`，数据库报告的超时转换为 `false`
//! - **PollRetry**: 始终使用 `pg_try_advisory_lock`，阻塞时按 retry_delay 轮询，
//!   直到累计耗时达到 retry_timeout
//!
//! ## 释放
//!
//! 推荐使用 [`Lock::scoped`] / [`Locker::with_lock`](crate::Locker::with_lock)
//! 或显式调用 [`Lock::release`]。Drop 时的后台释放只是兜底，不保证及时。
//! 没有运行时的 Drop 通过 [`Session::abandon`] 直接断开物理连接。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{LockError, Result};
use crate::metrics;
use crate::policy::{AcquireStrategy, LockOptions, LockPolicy};
use crate::session::{AdvisoryConnection, Session, SessionProvider};

/// 一次获取的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquisition {
    pub acquired: bool,
    /// PollRetry 阻塞模式下的重试次数，其余情况恒为 0
    pub retries: u32,
    pub elapsed: Duration,
}

/// advisory lock 句柄
pub struct Lock<P: SessionProvider> {
    provider: Arc<P>,
    name: String,
    id: i64,
    policy: LockPolicy,
    session: Option<P::Session>,
    held: bool,
}

impl<P: SessionProvider> Lock<P> {
    pub(crate) fn new(provider: Arc<P>, name: String, id: i64, policy: LockPolicy) -> Self {
        Self {
            provider,
            name,
            id,
            policy,
            session: None,
            held: false,
        }
    }

    /// 带命名空间的完整锁名
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// 是否持有一个打开的会话（获取失败后会话也会保留到释放为止）
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// 最近一次获取是否成功且尚未释放
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// 当前会话，仅在获取过之后存在
    pub fn session(&self) -> Option<&P::Session> {
        self.session.as_ref()
    }

    /// 按默认策略获取
    ///
    /// 已经持有时再次调用会重新发起请求（会话内可重入），不做短路。
    pub async fn acquire(&mut self) -> Result<bool> {
        self.acquire_with(&LockOptions::default())
            .await
            .map(|outcome| outcome.acquired)
    }

    /// 按覆盖后的策略获取
    #[instrument(skip(self, options), fields(lock = %self.name, lock_id = self.id))]
    pub async fn acquire_with(&mut self, options: &LockOptions) -> Result<Acquisition> {
        let policy = self.policy.merge(options);
        let lock_id = self.id;
        let started = Instant::now();
        let session = self.open_session().await?;

        let (acquired, retries) = match policy.strategy {
            AcquireStrategy::DatabaseTimeout { acquire_timeout } => {
                let acquired =
                    acquire_database_timeout(session, lock_id, policy.blocking, acquire_timeout)
                        .await?;
                (acquired, 0)
            }
            AcquireStrategy::PollRetry {
                retry_delay,
                retry_timeout,
            } => {
                acquire_poll_retry(
                    session,
                    lock_id,
                    policy.blocking,
                    retry_delay,
                    retry_timeout,
                    started,
                )
                .await?
            }
        };

        self.held |= acquired;
        let elapsed = started.elapsed();
        metrics::record_acquire(policy.strategy.label(), acquired, retries, elapsed);
        debug!(
            acquired,
            retries,
            elapsed_ms = elapsed.as_millis() as u64,
            blocking = policy.blocking,
            "Lock acquire finished"
        );

        Ok(Acquisition {
            acquired,
            retries,
            elapsed,
        })
    }

    /// 释放锁并关闭会话
    ///
    /// 没有会话时直接返回 `false`，不访问数据库；重复调用是安全的。
    /// 返回值为数据库报告的本会话是否确实持有该锁。
    #[instrument(skip(self), fields(lock = %self.name, lock_id = self.id))]
    pub async fn release(&mut self) -> Result<bool> {
        let Some(mut session) = self.session.take() else {
            return Ok(false);
        };
        self.held = false;

        let unlocked = session.advisory_unlock(self.id).await;
        // 无论解锁是否成功都关闭会话，会话结束时数据库会释放剩余的锁
        let closed = session.close().await;
        let released = unlocked?;
        closed?;

        metrics::record_release(released);
        debug!(released, "Lock released");
        Ok(released)
    }

    /// 在持有锁期间执行 `body`
    ///
    /// 获取失败时返回 [`LockError::AcquireFailure`]，`body` 不会执行。
    /// `body` 返回后总会释放；panic 或被取消时由 Drop 兜底。
    pub async fn scoped<F, Fut, T>(&mut self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.acquire().await? {
            self.close_session().await?;
            return Err(LockError::AcquireFailure {
                name: self.name.clone(),
            });
        }

        let output = body().await;
        self.release().await?;
        Ok(output)
    }

    /// 获取锁并转为守卫，获取失败时返回 [`LockError::AcquireFailure`]
    pub async fn into_guard(mut self) -> Result<LockGuard<P>> {
        if !self.acquire().await? {
            self.close_session().await?;
            return Err(LockError::AcquireFailure {
                name: self.name.clone(),
            });
        }
        Ok(LockGuard { lock: self })
    }

    async fn open_session(&mut self) -> Result<&mut P::Session> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.provider.open_session().await?,
        };
        Ok(self.session.insert(session))
    }

    async fn close_session(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

impl<P: SessionProvider> Drop for Lock<P> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        let held = self.held;
        if held {
            warn!(
                lock = %self.name,
                lock_id = self.id,
                "Lock dropped without explicit release, releasing in background"
            );
            metrics::record_drop_cleanup();
        } else {
            // 获取失败后残留的会话，没有锁需要释放
            debug!(lock = %self.name, lock_id = self.id, "Closing idle session on drop");
        }

        let lock_id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // 没有调用方可以处理这里的错误，只记录
                    if held {
                        if let Err(e) = session.advisory_unlock(lock_id).await {
                            debug!(lock_id, error = %e, "Background unlock failed");
                        }
                    }
                    if let Err(e) = session.close().await {
                        debug!(lock_id, error = %e, "Background session close failed");
                    }
                });
            }
            // 没有运行时：断开物理连接，数据库随会话结束释放锁
            Err(_) => session.abandon(),
        }
    }
}

/// 持有中的锁
///
/// 由 [`Lock::into_guard`] 创建。建议调用 [`LockGuard::release`] 显式释放，
/// 直接 drop 时退化为 Lock 的后台释放。
pub struct LockGuard<P: SessionProvider> {
    lock: Lock<P>,
}

impl<P: SessionProvider> LockGuard<P> {
    pub fn lock(&self) -> &Lock<P> {
        &self.lock
    }

    pub fn name(&self) -> &str {
        self.lock.name()
    }

    pub fn id(&self) -> i64 {
        self.lock.id()
    }

    /// 显式释放锁
    pub async fn release(mut self) -> Result<bool> {
        self.lock.release().await
    }
}

/// 数据库超时策略
async fn acquire_database_timeout<S>(
    session: &mut S,
    lock_id: i64,
    blocking: bool,
    acquire_timeout: Duration,
) -> Result<bool>
where
    S: AdvisoryConnection + ?Sized,
{
    if !blocking {
        return session.try_advisory_lock(lock_id).await;
    }

    session.set_lock_timeout(acquire_timeout).await?;
    match session.advisory_lock(lock_id).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_lock_timeout() => {
            debug!(lock_id, "Lock acquire failed due to timeout");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// 轮询重试策略
///
/// 首次尝试总在超时检查之前。返回 (是否获得, 重试次数)。
async fn acquire_poll_retry<S>(
    session: &mut S,
    lock_id: i64,
    blocking: bool,
    retry_delay: Duration,
    retry_timeout: Duration,
    started: Instant,
) -> Result<(bool, u32)>
where
    S: AdvisoryConnection + ?Sized,
{
    let mut retries = 0u32;
    loop {
        let acquired = session.try_advisory_lock(lock_id).await?;
        if acquired || !blocking {
            return Ok((acquired, retries));
        }

        if started.elapsed() >= retry_timeout {
            return Ok((false, retries));
        }

        retries += 1;
        tokio::time::sleep(retry_delay).await;
    }
}
