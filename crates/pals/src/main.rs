//! 持锁挂起工具
//!
//! 获取名为 `hang` 的锁后等待输入。运行期间可以在数据库中观察到持锁的后端进程：
//!
//! ```sql
//! select stat.datname, stat.pid, stat.usename, stat.application_name,
//!        stat.state, locks.mode as lockmode, stat.query
//! from pg_stat_activity stat
//! left join pg_locks locks on locks.pid = stat.pid
//! where locktype = 'advisory';
//! ```
//!
//! 然后以任意方式结束本进程（回车、Ctrl-C、kill -9），确认该后端进程及其锁随之消失。

use anyhow::{Result, bail};
use pals::Locker;
use pals_shared::{config::AppConfig, observability};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::info;

const SERVICE_NAME: &str = "pals-hang";
const LOCK_NAME: &str = "hang";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/pals-hang.toml + PALS__ 环境变量
    let mut config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..Default::default()
        }
    });
    if config.locker.namespace.is_none() {
        config.locker.namespace = Some(SERVICE_NAME.to_string());
    }

    // 2. 初始化日志
    let _guard = observability::init(&config.observability)?;
    pals::metrics::describe();

    // 3. 连接数据库并获取锁
    let locker = Locker::connect(&config.locker, &config.database).await?;
    let mut lock = locker.lock(LOCK_NAME)?;

    if !lock.acquire().await? {
        bail!("could not acquire lock {}", lock.name());
    }

    info!(lock = %lock.name(), lock_id = lock.id(), "Lock acquired");
    println!("My pid is: {}", std::process::id());
    println!("Lock {} ({}) acquired, press enter to exit: ", lock.name(), lock.id());

    // 4. 等待回车或 Ctrl-C
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        line = lines.next_line() => {
            line?;
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl-C");
        }
    }

    let released = lock.release().await?;
    info!(released, "Lock released, exiting");

    Ok(())
}
