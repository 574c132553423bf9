use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// 基础重试间隔（毫秒）
    pub initial_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_factor: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// 计算第 `retry_count` 次重试前的等待时间
    ///
    /// 初始间隔按退避倍数连乘 `retry_count` 次，到达最大间隔后截断。
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let max_delay = self.max_delay_ms as f64;
        let mut delay = self.initial_delay_ms as f64;
        for _ in 0..retry_count {
            delay *= self.backoff_factor;
            if delay > max_delay {
                delay = max_delay;
                break;
            }
        }
        let delay = delay.min(max_delay);

        let delay = if self.jitter_factor > 0.0 {
            let mut rng = rand::rng();
            let jitter = delay * self.jitter_factor * (rng.random::<f64>() * 2.0 - 1.0);
            (delay + jitter).clamp(0.0, max_delay)
        } else {
            delay
        };

        Duration::from_millis(delay as u64)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backoff_factor < 1.0 {
            return Err(anyhow::anyhow!(
                "退避倍数必须不小于1.0: {}",
                self.backoff_factor
            ));
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!("初始重试间隔不能大于最大重试间隔"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!(
                "抖动范围必须在0.0到1.0之间: {}",
                self.jitter_factor
            ));
        }

        Ok(())
    }
}

/// 编排引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub max_concurrent_tasks: usize,
    /// 单个分区执行超时（秒）
    pub task_timeout_seconds: u64,
    pub retry_policy: Option<RetryPolicy>,
    /// "centralized", "decentralized", "hybrid"
    pub coordination_mode: String,
    pub default_aggregation: String,
    /// 为true时只有全部分区失败才判定执行失败
    pub tolerate_partial_failures: bool,
    pub round_robin_slots: usize,
    pub load_partition_factor: usize,
    pub monitor_interval_seconds: u64,
    pub finished_task_retention: usize,
    pub request_queue_capacity: usize,
    pub shutdown_timeout_seconds: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 100,
            task_timeout_seconds: 5 * 60,
            retry_policy: Some(RetryPolicy::default()),
            coordination_mode: "centralized".to_string(),
            default_aggregation: "concat".to_string(),
            tolerate_partial_failures: false,
            round_robin_slots: 3,
            load_partition_factor: 4,
            monitor_interval_seconds: 10,
            finished_task_retention: 1000,
            request_queue_capacity: 256,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl OrchestrationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发编排任务数必须大于0"));
        }

        if self.task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        let valid_modes = ["centralized", "decentralized", "hybrid"];
        if !valid_modes.contains(&self.coordination_mode.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的协调模式: {}，支持的模式: {:?}",
                self.coordination_mode,
                valid_modes
            ));
        }

        let valid_aggregations = ["concat", "average", "weighted"];
        if !valid_aggregations.contains(&self.default_aggregation.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的聚合策略: {}，支持的策略: {:?}",
                self.default_aggregation,
                valid_aggregations
            ));
        }

        if self.round_robin_slots == 0 || self.load_partition_factor == 0 {
            return Err(anyhow::anyhow!("分区数量参数必须大于0"));
        }

        if self.monitor_interval_seconds == 0 {
            return Err(anyhow::anyhow!("监控间隔必须大于0"));
        }

        if self.request_queue_capacity == 0 {
            return Err(anyhow::anyhow!("请求队列容量必须大于0"));
        }

        if let Some(policy) = &self.retry_policy {
            policy.validate()?;
        }

        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}
