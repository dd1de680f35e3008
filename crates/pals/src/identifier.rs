//! 锁名称到 advisory lock 标识的映射
//!
//! PostgreSQL 的 advisory lock 以 bigint 寻址。名称经 SHA-1 摘要后取前 8 字节，
//! 按小端序解释为 i64。所有共享同一数据库的进程必须使用同一映射，
//! 字节序一旦变化会在不报错的情况下破坏互斥。

use sha1::{Digest, Sha1};

/// 命名空间与锁名之间的分隔符
pub const NAMESPACE_SEPARATOR: char = '.';

/// 拼接命名空间与锁名
///
/// 命名空间为空时直接使用锁名。
pub fn qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}{}{}", ns, NAMESPACE_SEPARATOR, name),
        _ => name.to_string(),
    }
}

/// 计算限定名对应的锁标识
pub fn lock_id_for(qualified: &str) -> i64 {
    let digest = Sha1::digest(qualified.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(head)
}

/// 计算 `(namespace, name)` 对应的锁标识
pub fn lock_id(namespace: Option<&str>, name: &str) -> i64 {
    lock_id_for(&qualified_name(namespace, name))
}
