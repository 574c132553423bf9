use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务分发器的滚动指标快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub retry_tasks: u64,
    pub cancelled_tasks: u64,

    pub pending_tasks: usize,
    pub running_tasks: usize,

    pub average_distribution_time_ms: f64,
    pub average_execution_time_ms: f64,
    /// 每秒完成任务数
    pub task_throughput: f64,

    pub active_nodes: usize,
    pub average_node_load: f64,
    pub load_imbalance: f64,

    pub strategy_usage: HashMap<String, u64>,
    pub strategy_success: HashMap<String, f64>,

    pub average_latency_ms: f64,
    pub success_rate: f64,

    pub last_updated: Option<DateTime<Utc>>,
}

/// 编排引擎指标快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationMetrics {
    pub total_tasks: u64,
    pub active_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub retried_tasks: u64,
    pub average_latency_ms: f64,
    pub throughput: f64,
    pub resource_utilization: f64,
    pub error_rate: f64,

    /// 按分区策略统计的使用次数和成功率
    pub strategy_usage: HashMap<String, u64>,
    pub strategy_success: HashMap<String, f64>,

    pub last_updated: Option<DateTime<Utc>>,
}

impl OrchestrationMetrics {
    /// 记录一次完成并更新滚动平均延迟
    pub fn record_completion(&mut self, latency_ms: f64) {
        let previous = self.completed_tasks as f64;
        self.completed_tasks += 1;
        self.average_latency_ms =
            (self.average_latency_ms * previous + latency_ms) / self.completed_tasks as f64;
        self.refresh_error_rate();
    }

    pub fn record_failure(&mut self) {
        self.failed_tasks += 1;
        self.refresh_error_rate();
    }

    fn refresh_error_rate(&mut self) {
        let finished = self.completed_tasks + self.failed_tasks;
        self.error_rate = if finished == 0 {
            0.0
        } else {
            self.failed_tasks as f64 / finished as f64
        };
        self.last_updated = Some(Utc::now());
    }
}
