//! 测试环境设置模块


pub use environment::{TestEnvConfig, TestEnvironment};
