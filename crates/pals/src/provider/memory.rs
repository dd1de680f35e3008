//! 进程内会话提供者
//!
//! 在内存中复现 PostgreSQL 会话级 advisory lock 与连接池的行为，
//! 用于单元测试和本地开发：
//! - 同一会话可重入，`advisory_unlock` 每次只减一层
//! - `lock_timeout` 为零时无限等待，到期返回 [`LockError::LockTimeout`]
//! - 会话被终止后其持有的锁立即释放，之后的调用返回 [`LockError::SessionTerminated`]
//! - 连接池有容量上限，耗尽时 `open_session` 等待，超时返回 [`LockError::PoolTimedOut`]
//! - 会话关闭或被丢弃时执行归还回调，回调失败则丢弃该物理连接

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pals_shared::config::DatabaseConfig;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::checkin::CheckinHooks;
use crate::error::{LockError, Result};
use crate::session::{AdvisoryConnection, CheckinHook, Session, SessionProvider};

/// 持有者信息
#[derive(Debug, Clone, Copy)]
struct Holder {
    session_id: u64,
    depth: u32,
}

#[derive(Debug, Default)]
struct PoolState {
    next_id: u64,
    /// 空闲与已借出的物理连接总数
    open: usize,
    idle: Vec<u64>,
    terminated: HashSet<u64>,
    holders: HashMap<i64, Holder>,
    /// 物理连接上的 lock_timeout，未设置即为零
    lock_timeouts: HashMap<u64, Duration>,
}

struct Inner {
    state: Mutex<PoolState>,
    lock_released: Notify,
    conn_returned: Notify,
    hooks: CheckinHooks,
    max_connections: usize,
    acquire_timeout: Duration,
}

impl Inner {
    fn checkout(&self) -> Option<u64> {
        let mut state = self.state.lock();
        while let Some(id) = state.idle.pop() {
            if state.terminated.remove(&id) {
                state.open -= 1;
                continue;
            }
            return Some(id);
        }
        if state.open < self.max_connections {
            state.open += 1;
            state.next_id += 1;
            return Some(state.next_id);
        }
        None
    }

    fn ensure_alive(state: &PoolState, session_id: u64) -> Result<()> {
        if state.terminated.contains(&session_id) {
            return Err(LockError::SessionTerminated { session_id });
        }
        Ok(())
    }

    fn try_take(&self, session_id: u64, lock_id: i64) -> Result<bool> {
        let mut state = self.state.lock();
        Self::ensure_alive(&state, session_id)?;
        match state.holders.entry(lock_id) {
            Entry::Vacant(slot) => {
                slot.insert(Holder {
                    session_id,
                    depth: 1,
                });
                Ok(true)
            }
            Entry::Occupied(mut slot) if slot.get().session_id == session_id => {
                slot.get_mut().depth += 1;
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    fn unlock(&self, session_id: u64, lock_id: i64) -> Result<bool> {
        let released = {
            let mut state = self.state.lock();
            Self::ensure_alive(&state, session_id)?;
            match state.holders.entry(lock_id) {
                Entry::Occupied(mut slot) if slot.get().session_id == session_id => {
                    slot.get_mut().depth -= 1;
                    if slot.get().depth == 0 {
                        slot.remove();
                    }
                    true
                }
                _ => false,
            }
        };
        if released {
            self.lock_released.notify_waiters();
        }
        Ok(released)
    }

    fn unlock_all(&self, session_id: u64) -> Result<()> {
        {
            let mut state = self.state.lock();
            Self::ensure_alive(&state, session_id)?;
            state.holders.retain(|_, holder| holder.session_id != session_id);
        }
        self.lock_released.notify_waiters();
        Ok(())
    }

    /// 终止会话：数据库侧释放其全部锁
    fn terminate(&self, session_id: u64) {
        {
            let mut state = self.state.lock();
            state.terminated.insert(session_id);
            state.holders.retain(|_, holder| holder.session_id != session_id);
        }
        self.lock_released.notify_waiters();
    }

    fn set_lock_timeout(&self, session_id: u64, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_alive(&state, session_id)?;
        if timeout.is_zero() {
            state.lock_timeouts.remove(&session_id);
        } else {
            state.lock_timeouts.insert(session_id, timeout);
        }
        Ok(())
    }

    fn lock_timeout(&self, session_id: u64) -> Duration {
        self.state
            .lock()
            .lock_timeouts
            .get(&session_id)
            .copied()
            .unwrap_or_default()
    }

    fn is_terminated(&self, session_id: u64) -> bool {
        self.state.lock().terminated.contains(&session_id)
    }

    /// 丢弃一个已终止的物理连接，释放连接池容量
    fn discard(&self, session_id: u64) {
        {
            let mut state = self.state.lock();
            state.terminated.remove(&session_id);
            state.lock_timeouts.remove(&session_id);
            state.open -= 1;
        }
        self.conn_returned.notify_waiters();
    }

    fn return_idle(&self, session_id: u64) {
        self.state.lock().idle.push(session_id);
        self.conn_returned.notify_waiters();
    }
}

/// 内存连接池中的一个物理连接
#[derive(Clone)]
pub struct MemoryConnection {
    id: u64,
    inner: Arc<Inner>,
}

impl MemoryConnection {
    pub fn session_id(&self) -> u64 {
        self.id
    }

    /// 当前生效的 lock_timeout，零表示无限等待
    ///
    /// 与 PostgreSQL 一致，设置跟随物理连接，归还后仍然保留。
    pub fn lock_timeout(&self) -> Duration {
        self.inner.lock_timeout(self.id)
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("session_id", &self.id)
            .finish()
    }
}

#[async_trait]
impl AdvisoryConnection for MemoryConnection {
    async fn try_advisory_lock(&mut self, lock_id: i64) -> Result<bool> {
        self.inner.try_take(self.id, lock_id)
    }

    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.inner.set_lock_timeout(self.id, timeout)
    }

    async fn reset_lock_timeout(&mut self) -> Result<()> {
        self.inner.set_lock_timeout(self.id, Duration::ZERO)
    }

    async fn advisory_lock(&mut self, lock_id: i64) -> Result<()> {
        let lock_timeout = self.lock_timeout();
        let deadline = (!lock_timeout.is_zero()).then(|| Instant::now() + lock_timeout);

        loop {
            // 先登记等待再检查，避免错过两者之间的释放通知
            let released = self.inner.lock_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.inner.try_take(self.id, lock_id)? {
                return Ok(());
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, released).await.is_err() {
                        return Err(LockError::LockTimeout);
                    }
                }
                None => released.await,
            }
        }
    }

    async fn advisory_unlock(&mut self, lock_id: i64) -> Result<bool> {
        self.inner.unlock(self.id, lock_id)
    }

    async fn advisory_unlock_all(&mut self) -> Result<()> {
        self.inner.unlock_all(self.id)
    }

    fn is_closed(&self) -> bool {
        self.inner.is_terminated(self.id)
    }
}

/// 将物理连接归还连接池
async fn check_in(mut conn: MemoryConnection) {
    let inner = Arc::clone(&conn.inner);

    if inner.is_terminated(conn.id) {
        debug!(session_id = conn.id, "Discarding terminated connection");
        inner.discard(conn.id);
        return;
    }

    match inner.hooks.run(&mut conn).await {
        Ok(()) => inner.return_idle(conn.id),
        Err(e) => {
            warn!(session_id = conn.id, error = %e, "Checkin hook failed, discarding connection");
            inner.terminate(conn.id);
            inner.discard(conn.id);
        }
    }
}

/// 从内存连接池借出的会话
#[derive(Debug)]
pub struct MemorySession {
    conn: MemoryConnection,
    checked_in: bool,
}

impl MemorySession {
    pub fn session_id(&self) -> u64 {
        self.conn.id
    }

    pub fn lock_timeout(&self) -> Duration {
        self.conn.lock_timeout()
    }

    /// 断开物理连接，不经过归还回调
    fn disconnect(&mut self) {
        self.checked_in = true;
        self.conn.inner.terminate(self.conn.id);
        self.conn.inner.discard(self.conn.id);
    }
}

#[async_trait]
impl AdvisoryConnection for MemorySession {
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

    fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn close(mut self) -> Result<()> {
        self.checked_in = true;
        check_in(self.conn.clone()).await;
        Ok(())
    }

    fn abandon(mut self) {
        debug!(session_id = self.conn.id, "Abandoning session without runtime");
        self.disconnect();
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.checked_in {
            return;
        }
        // 与 sqlx 的 PoolConnection 一致：在后台归还连接
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(check_in(self.conn.clone()));
            }
            // 没有运行时，直接断开连接
            Err(_) => self.disconnect(),
        }
    }
}

/// 进程内会话提供者
#[derive(Clone)]
pub struct MemorySessionProvider {
    inner: Arc<Inner>,
}

impl Default for MemorySessionProvider {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(30))
    }
}

impl MemorySessionProvider {
    pub fn new(max_connections: usize, acquire_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState::default()),
                lock_released: Notify::new(),
                conn_returned: Notify::new(),
                hooks: CheckinHooks::new(),
                max_connections,
                acquire_timeout,
            }),
        }
    }

    /// 按数据库配置中的连接池参数创建
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(
            config.max_connections as usize,
            Duration::from_secs(config.connect_timeout_seconds),
        )
    }

    /// 模拟 `pg_terminate_backend`
    pub fn terminate(&self, session_id: u64) {
        self.inner.terminate(session_id);
    }

    /// 当前持有该锁的会话
    pub fn holder_of(&self, lock_id: i64) -> Option<u64> {
        self.inner.state.lock().holders.get(&lock_id).map(|h| h.session_id)
    }

    /// 当前被持有的锁数量
    pub fn held_lock_count(&self) -> usize {
        self.inner.state.lock().holders.len()
    }

    pub fn open_connections(&self) -> usize {
        self.inner.state.lock().open
    }

    pub fn idle_connections(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn checkin_hook_count(&self) -> usize {
        self.inner.hooks.len()
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    type Session = MemorySession;

    async fn open_session(&self) -> Result<MemorySession> {
        let deadline = Instant::now() + self.inner.acquire_timeout;

        loop {
            let returned = self.inner.conn_returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            if let Some(id) = self.inner.checkout() {
                debug!(session_id = id, "Session checked out");
                return Ok(MemorySession {
                    conn: MemoryConnection {
                        id,
                        inner: Arc::clone(&self.inner),
                    },
                    checked_in: false,
                });
            }

            if tokio::time::timeout_at(deadline, returned).await.is_err() {
                return Err(LockError::PoolTimedOut);
            }
        }
    }

    fn register_checkin_hook(&self, hook: Arc<dyn CheckinHook>) -> bool {
        self.inner.hooks.register(hook)
    }
}
