//! 配置管理
//!
//! 分发器与编排引擎的配置在构造时以结构化数据传入，核心不规定文件格式。
//! 二进制入口通过 [`AppConfig::load`] 叠加默认值、TOML 文件和 `FLEET_`
//! 前缀的环境变量。

pub mod models;

pub use models::*;
