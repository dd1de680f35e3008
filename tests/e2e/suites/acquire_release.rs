//! 获取与释放测试套件

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pals::{LockError, LockOptions};

use crate::setup::TestEnvironment;

/// 互斥与共存
#[cfg(test)]
mod exclusion_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_same_lock_fails_acquire() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        let mut lock2 = env.locker.lock("test_it").unwrap();

        assert!(lock1.acquire().await.unwrap());

        // 非阻塞立即返回
        let started = Instant::now();
        assert!(
            !lock2
                .acquire_with(&LockOptions::new().blocking(false))
                .await
                .unwrap()
                .acquired
        );
        assert!(started.elapsed() < Duration::from_millis(50));

        // 阻塞版本在超时后失败
        let started = Instant::now();
        let acquired = lock2
            .acquire_with(&LockOptions::new().acquire_timeout(Duration::from_millis(300)))
            .await
            .unwrap()
            .acquired;
        let waited = started.elapsed();

        assert!(!acquired, "锁被占用时不应获取成功");
        assert!(
            waited >= Duration::from_millis(300) && waited < Duration::from_millis(350),
            "等待时间应接近 acquire_timeout: {:?}",
            waited
        );

        assert!(lock1.release().await.unwrap());
        lock2.release().await.unwrap();
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_different_lock_name_both_acquire() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        let mut lock2 = env.locker.lock("test_it2").unwrap();

        assert!(lock1.acquire().await.unwrap());
        assert!(lock2.acquire().await.unwrap());

        assert!(lock1.release().await.unwrap());
        assert!(lock2.release().await.unwrap());
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_exclusion_across_pools() {
        let env = TestEnvironment::setup().await.unwrap();
        let peer = env.peer().await.unwrap();

        let mut ours = env.locker.lock("shared").unwrap();
        let mut theirs = peer
            .lock_with("shared", &LockOptions::new().blocking(false))
            .unwrap();

        assert!(ours.acquire().await.unwrap());
        assert!(!theirs.acquire().await.unwrap());

        assert!(ours.release().await.unwrap());
        assert!(theirs.acquire().await.unwrap());
        assert!(theirs.release().await.unwrap());

        peer.provider().database().close().await;
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_lock_after_release_acquires() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        let mut lock2 = env.locker.lock("test_it").unwrap();

        assert!(lock1.acquire().await.unwrap());
        assert!(lock1.release().await.unwrap());
        assert!(lock2.acquire().await.unwrap());
        assert!(lock2.release().await.unwrap());
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_class_params_used() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        let mut lock2 = env
            .locker
            .lock_with("test_it", &LockOptions::new().blocking(false))
            .unwrap();
        let mut lock3 = env
            .locker
            .lock_with(
                "test_it",
                &LockOptions::new().acquire_timeout(Duration::from_millis(300)),
            )
            .unwrap();

        assert!(lock1.acquire().await.unwrap());

        let started = Instant::now();
        assert!(!lock2.acquire().await.unwrap());
        assert!(started.elapsed() < Duration::from_millis(50));

        let started = Instant::now();
        assert!(!lock3.acquire().await.unwrap());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(350));

        lock1.release().await.unwrap();
        lock2.release().await.unwrap();
        lock3.release().await.unwrap();
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_lock_id_visible_in_pg_locks() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock = env.locker.lock("visible").unwrap();

        assert!(!env.inspector.is_held(lock.id()).await.unwrap());
        assert!(lock.acquire().await.unwrap());
        assert_eq!(env.inspector.granted_count(lock.id()).await.unwrap(), 1);

        assert!(lock.release().await.unwrap());
        assert!(env.inspector.wait_released(lock.id(), 10).await.unwrap());
        env.teardown().await;
    }
}

/// 释放语义
#[cfg(test)]
mod release_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_release_never_acquired() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock = env.locker.lock("never").unwrap();

        assert!(!lock.release().await.unwrap());
        assert!(!lock.has_session());
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_release_twice() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock = env.locker.lock("twice").unwrap();

        assert!(lock.acquire().await.unwrap());
        assert!(lock.release().await.unwrap());
        assert!(!lock.release().await.unwrap());
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_gc_releases_dropped_lock() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut lock1 = env.locker.lock("test_it").unwrap();
        let id = lock1.id();
        assert!(lock1.acquire().await.unwrap());

        drop(lock1);

        assert!(
            env.inspector.wait_released(id, 50).await.unwrap(),
            "被丢弃的锁应在后台释放"
        );

        let mut lock2 = env
            .locker
            .lock_with("test_it", &LockOptions::new().blocking(false))
            .unwrap();
        assert!(lock2.acquire().await.unwrap());
        lock2.release().await.unwrap();
        env.teardown().await;
    }
}

/// 作用域获取
#[cfg(test)]
mod scoped_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_scoped_holds_lock_for_body() {
        let env = TestEnvironment::setup().await.unwrap();
        let id = env.locker.lock_id("test_it");

        let held_inside = env
            .locker
            .with_lock("test_it", || async {
                let mut rival = env
                    .locker
                    .lock_with("test_it", &LockOptions::new().blocking(false))
                    .unwrap();
                let acquired = rival.acquire().await.unwrap();
                rival.release().await.unwrap();
                !acquired
            })
            .await
            .unwrap();

        assert!(held_inside, "作用域内同名锁应被占用");
        assert!(env.inspector.wait_released(id, 10).await.unwrap());
        env.teardown().await;
    }

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_scoped_failure_to_acquire() {
        let env = TestEnvironment::setup().await.unwrap();
        let mut holder = env.locker.lock("test_it").unwrap();
        assert!(holder.acquire().await.unwrap());

        let mut contender = env
            .locker
            .lock_with("test_it", &LockOptions::new().blocking(false))
            .unwrap();
        let ran = AtomicBool::new(false);
        let result = contender
            .scoped(|| async { ran.store(true, Ordering::SeqCst) })
            .await;

        assert!(matches!(result, Err(LockError::AcquireFailure { .. })));
        assert!(!ran.load(Ordering::SeqCst), "获取失败时不应执行作用域代码");
        assert!(!contender.has_session());

        holder.release().await.unwrap();
        env.teardown().await;
    }
}
