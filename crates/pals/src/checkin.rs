//! 连接归还兜底
//!
//! Lock 的释放如果被遗漏，而其物理连接又被连接池复用，advisory lock 会挂在
//! 一个不再对应任何 Lock 的连接上，表现为其他地方无法定位的死锁。
//! 因此每次归还连接时强制执行 `pg_advisory_unlock_all()`。

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::metrics;
use crate::session::{AdvisoryConnection, CheckinHook};

/// 归还时释放连接上的全部 advisory lock，并恢复 lock_timeout
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlockAllOnCheckin;

#[async_trait]
impl CheckinHook for UnlockAllOnCheckin {
    #[instrument(skip_all)]
    async fn on_checkin(&self, conn: &mut dyn AdvisoryConnection) -> Result<()> {
        // 已终止的会话在数据库侧已经释放了全部锁
        if conn.is_closed() {
            debug!("Connection already closed, skipping advisory unlock");
            metrics::record_checkin_cleanup("skipped");
            return Ok(());
        }

        let cleaned = match conn.advisory_unlock_all().await {
            Ok(()) => conn.reset_lock_timeout().await,
            Err(e) => Err(e),
        };

        match cleaned {
            Ok(()) => {
                debug!("Advisory locks released on checkin");
                metrics::record_checkin_cleanup("ok");
                Ok(())
            }
            // 无法同步检测的断连：返回错误让 provider 丢弃连接，锁已随会话结束释放
            Err(e) if e.is_connection_lost() => {
                debug!(error = %e, "Connection lost before checkin cleanup");
                metrics::record_checkin_cleanup("connection_lost");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Advisory unlock on checkin failed");
                metrics::record_checkin_cleanup("failed");
                Err(e)
            }
        }
    }
}

/// provider 内部使用的回调列表
///
/// 注册与执行可并发进行，执行时读取注册时刻的快照。
#[derive(Default)]
pub struct CheckinHooks {
    hooks: ArcSwap<Vec<Arc<dyn CheckinHook>>>,
}

impl CheckinHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调，同名回调已存在时返回 `false`
    pub fn register(&self, hook: Arc<dyn CheckinHook>) -> bool {
        let mut added = false;
        self.hooks.rcu(|current| {
            added = !current.iter().any(|h| h.name() == hook.name());
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            if added {
                next.push(Arc::clone(&hook));
            }
            next
        });
        added
    }

    pub fn len(&self) -> usize {
        self.hooks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 依次执行全部回调，遇到第一个错误即返回
    ///
    /// 返回错误时调用方应丢弃该物理连接而不是放回连接池。
    pub async fn run(&self, conn: &mut dyn AdvisoryConnection) -> Result<()> {
        let hooks = self.hooks.load_full();
        for hook in hooks.iter() {
            hook.on_checkin(&mut *conn).await?;
        }
        Ok(())
    }
}
