//! 轮询重试策略测试套件

use std::time::Duration;

use pals::LockOptions;
use pals_shared::config::StrategyKind;

use crate::setup::{TestEnvConfig, TestEnvironment};

fn poll_retry_config() -> TestEnvConfig {
    TestEnvConfig::default().with_locker(|locker| {
        locker.strategy = StrategyKind::PollRetry;
        locker.retry_delay_ms = 100;
        locker.retry_timeout_ms = 300;
    })
}

#[cfg(test)]
mod poll_retry_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_retry_count() {
        let env = TestEnvironment::setup_with_config(poll_retry_config())
            .await
            .unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        let mut lock2 = env.locker.lock("test_it").unwrap();

        assert!(lock1.acquire().await.unwrap());

        let outcome = lock2.acquire_with(&LockOptions::new()).await.unwrap();
        assert!(!outcome.acquired);
        assert_eq!(outcome.retries, 3);
        assert!(outcome.elapsed >= Duration::from_millis(300));

        lock1.release().await.unwrap();
        lock2.release().await.unwrap();
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_non_blocking_does_not_retry() {
        let env = TestEnvironment::setup_with_config(poll_retry_config())
            .await
            .unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        let mut lock2 = env
            .locker
            .lock_with("test_it", &LockOptions::new().blocking(false))
            .unwrap();

        assert!(lock1.acquire().await.unwrap());
        let outcome = lock2.acquire_with(&LockOptions::new()).await.unwrap();
        assert!(!outcome.acquired);
        assert_eq!(outcome.retries, 0);

        lock1.release().await.unwrap();
        lock2.release().await.unwrap();
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_acquires_after_holder_releases() {
        let env = TestEnvironment::setup_with_config(
            poll_retry_config().with_locker(|locker| locker.retry_timeout_ms = 2_000),
        )
        .await
        .unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        assert!(lock1.acquire().await.unwrap());

        let mut lock2 = env.locker.lock("test_it").unwrap();
        let waiter = tokio::spawn(async move {
            let outcome = lock2.acquire_with(&LockOptions::new()).await.unwrap();
            lock2.release().await.unwrap();
            outcome
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(lock1.release().await.unwrap());

        let outcome = waiter.await.unwrap();
        assert!(outcome.acquired);
        assert!(outcome.retries >= 2);
        env.teardown().await;
    }
}
