use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 任务分发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// 默认放置策略: "round_robin", "least_loaded", "resource_aware", "latency_based"
    pub default_strategy: String,
    pub max_concurrent_tasks: usize,
    pub task_timeout_seconds: u64,
    /// 失败任务重新入队后的等待时间
    pub retry_delay_seconds: u64,

    pub node_health_check_interval_seconds: u64,
    pub node_timeout_seconds: u64,
    pub max_unhealthy_nodes: usize,

    pub distribution_interval_ms: u64,
    pub metrics_update_interval_seconds: u64,
    pub cleanup_interval_seconds: u64,

    pub min_node_reliability: f64,
    pub max_node_latency_ms: u64,
    pub load_balance_threshold: f64,

    /// 已完成任务缓存上限
    pub completed_task_retention: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            default_strategy: "resource_aware".to_string(),
            max_concurrent_tasks: 1000,
            task_timeout_seconds: 30 * 60,
            retry_delay_seconds: 5,
            node_health_check_interval_seconds: 30,
            node_timeout_seconds: 5 * 60,
            max_unhealthy_nodes: 3,
            distribution_interval_ms: 1000,
            metrics_update_interval_seconds: 10,
            cleanup_interval_seconds: 5 * 60,
            min_node_reliability: 0.8,
            max_node_latency_ms: 100,
            load_balance_threshold: 0.8,
            completed_task_retention: 1000,
        }
    }
}

impl DistributorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_strategies = ["round_robin", "least_loaded", "resource_aware", "latency_based"];
        if !valid_strategies.contains(&self.default_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的放置策略: {}，支持的策略: {:?}",
                self.default_strategy,
                valid_strategies
            ));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.distribution_interval_ms == 0
            || self.metrics_update_interval_seconds == 0
            || self.cleanup_interval_seconds == 0
            || self.node_health_check_interval_seconds == 0
        {
            return Err(anyhow::anyhow!("周期任务间隔必须大于0"));
        }

        if self.node_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("节点超时时间必须大于0"));
        }

        if !(0.0..=1.0).contains(&self.min_node_reliability) {
            return Err(anyhow::anyhow!(
                "最小节点可靠性必须在0.0到1.0之间: {}",
                self.min_node_reliability
            ));
        }

        if !(0.0..=1.0).contains(&self.load_balance_threshold) {
            return Err(anyhow::anyhow!(
                "负载均衡阈值必须在0.0到1.0之间: {}",
                self.load_balance_threshold
            ));
        }

        if self.completed_task_retention == 0 {
            return Err(anyhow::anyhow!("已完成任务缓存上限必须大于0"));
        }

        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_seconds)
    }

    pub fn max_node_latency(&self) -> Duration {
        Duration::from_millis(self.max_node_latency_ms)
    }

    pub fn distribution_interval(&self) -> Duration {
        Duration::from_millis(self.distribution_interval_ms)
    }

    pub fn metrics_update_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_update_interval_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.node_health_check_interval_seconds)
    }
}
