//! # Fleet Testing Utils
//!
//! 分发器和编排引擎测试共用的工具。
//!
//! - **Builders**: 带合理默认值的任务、节点、指标和分片结果构建器
//! - **Helpers**: 等待异步条件、集合断言、测试日志初始化
//!
//! ```toml
//! [dev-dependencies]
//! fleet-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;

pub use builders::*;
pub use helpers::*;
