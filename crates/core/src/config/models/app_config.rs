use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    distributor::DistributorConfig, logging::LoggingConfig, orchestration::OrchestrationConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub distributor: DistributorConfig,
    pub orchestration: OrchestrationConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration (missing keys fall back to `Default`)
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: FLEET_, nesting: `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/fleet.toml", "fleet.toml", "/etc/fleet/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        // FLEET_DISTRIBUTOR__MAX_CONCURRENT_TASKS=10
        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.distributor
            .validate()
            .context("任务分发器配置验证失败")?;
        self.orchestration
            .validate()
            .context("编排引擎配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.distributor.default_strategy, "resource_aware");
        assert_eq!(config.distributor.completed_task_retention, 1000);
        assert_eq!(config.orchestration.default_aggregation, "concat");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [distributor]
            default_strategy = "least_loaded"
            max_concurrent_tasks = 8

            [orchestration.retry_policy]
            max_retries = 5
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.distributor.default_strategy, "least_loaded");
        assert_eq!(config.distributor.max_concurrent_tasks, 8);
        assert_eq!(config.distributor.node_timeout_seconds, 300);
        let policy = config.orchestration.retry_policy.unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay_ms, 1000);
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let toml_str = r#"
            [distributor]
            default_strategy = "random"
        "#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_values() {
        let mut config = AppConfig::default();
        config.distributor.max_node_latency_ms = 250;
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.distributor.max_node_latency_ms, 250);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[orchestration]\ncoordination_mode = \"hybrid\"\nmax_concurrent_tasks = 4"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.orchestration.coordination_mode, "hybrid");
        assert_eq!(config.orchestration.max_concurrent_tasks, 4);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = AppConfig::from_toml(include_str!("../../../../../config/fleet.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(shipped.to_toml().unwrap(), defaults.to_toml().unwrap());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/fleet.toml")).is_err());
    }
}
