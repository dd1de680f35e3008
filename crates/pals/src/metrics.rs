//! 锁指标
//!
//! 通过 metrics 门面记录，未安装 recorder 时为空操作。

use std::time::Duration;

/// 注册指标描述
pub fn describe() {
    metrics::describe_counter!("pals_lock_acquire_total", "Total number of lock acquire calls");
    metrics::describe_histogram!(
        "pals_lock_acquire_duration_seconds",
        "Time spent inside lock acquire calls"
    );
    metrics::describe_histogram!(
        "pals_lock_acquire_retries",
        "Retry iterations per poll/retry acquire"
    );
    metrics::describe_counter!("pals_lock_release_total", "Total number of lock releases");
    metrics::describe_counter!(
        "pals_checkin_cleanup_total",
        "Advisory unlock-all runs on connection checkin"
    );
    metrics::describe_counter!(
        "pals_lock_drop_cleanup_total",
        "Locks released by the drop safety net"
    );
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次获取
#[inline]
pub fn record_acquire(strategy: &'static str, acquired: bool, retries: u32, elapsed: Duration) {
    let result = if acquired { "acquired" } else { "contended" };
    metrics::counter!(
        "pals_lock_acquire_total",
        "strategy" => strategy,
        "result" => result
    )
    .increment(1);

    metrics::histogram!("pals_lock_acquire_duration_seconds", "strategy" => strategy)
        .record(elapsed.as_secs_f64());

    if strategy == "poll_retry" {
        metrics::histogram!("pals_lock_acquire_retries").record(retries as f64);
    }
}

/// 记录一次释放
#[inline]
pub fn record_release(released: bool) {
    let result = if released { "released" } else { "not_held" };
    metrics::counter!("pals_lock_release_total", "result" => result).increment(1);
}

/// 记录连接归还时的清理结果（ok / skipped / connection_lost / failed）
#[inline]
pub fn record_checkin_cleanup(result: &'static str) {
    metrics::counter!("pals_checkin_cleanup_total", "result" => result).increment(1);
}

/// 记录 Drop 兜底释放
#[inline]
pub fn record_drop_cleanup() {
    metrics::counter!("pals_lock_drop_cleanup_total").increment(1);
}
