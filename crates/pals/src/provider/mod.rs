//! 会话提供者实现

mod memory;
mod postgres;

pub use memory::{MemoryConnection, MemorySession, MemorySessionProvider};
pub use postgres::{PgSession, PgSessionProvider};
