//! 测试数据构建器

use chrono::{DateTime, Duration, Utc};
use fleet_domain::{
    NodeCapacity, NodeRecord, NodeStatus, PartialResult, ResourceMetrics, ResourceRequirement,
    Task, TaskPriority, TaskStatus,
};

pub const GB: u64 = 1024 * 1024 * 1024;

/// Task 构建器
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let mut task = Task::new("task-1", "test_task", "inference");
        task.requirements = ResourceRequirement::new(1.0, GB, GB);
        Self { task }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_requirements(mut self, cpu_cores: f64, memory_bytes: u64, disk_bytes: u64) -> Self {
        self.task.requirements = ResourceRequirement::new(cpu_cores, memory_bytes, disk_bytes);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.task.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.task
            .metadata
            .insert("strategy".to_string(), serde_json::json!(strategy));
        self
    }

    pub fn with_required_nodes(mut self, nodes: &[&str]) -> Self {
        self.task.constraints.required_nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_excluded_nodes(mut self, nodes: &[&str]) -> Self {
        self.task.constraints.excluded_nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_preferred_nodes(mut self, nodes: &[&str]) -> Self {
        self.task.constraints.preferred_nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.task.constraints.deadline = Some(deadline);
        self
    }

    pub fn with_earliest_start(mut self, earliest_start: DateTime<Utc>) -> Self {
        self.task.constraints.earliest_start = Some(earliest_start);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// NodeRecord 构建器
///
/// 默认节点: 8核、16GB内存、100GB磁盘，空闲且刚刚上报过。
pub struct NodeRecordBuilder {
    node: NodeRecord,
}

impl NodeRecordBuilder {
    pub fn new() -> Self {
        let mut node = NodeRecord::new("node-1").with_capacity(NodeCapacity::new(
            8.0,
            16 * GB,
            100 * GB,
        ));
        node.average_latency_ms = 10.0;
        node.reliability = 0.99;
        Self { node }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.node.node_id = id.to_string();
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.node.status = status;
        self
    }

    pub fn with_capacity(mut self, cpu_cores: f64, memory_bytes: u64, disk_bytes: u64) -> Self {
        self.node.capacity = Some(NodeCapacity::new(cpu_cores, memory_bytes, disk_bytes));
        self
    }

    pub fn with_gpu(mut self, gpu_cores: u32, gpu_memory_bytes: u64) -> Self {
        if let Some(capacity) = self.node.capacity.take() {
            self.node.capacity = Some(capacity.with_gpu(gpu_cores, gpu_memory_bytes));
        }
        self
    }

    pub fn without_capacity(mut self) -> Self {
        self.node.capacity = None;
        self
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.node.features = features.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_region(mut self, region: &str, zone: &str) -> Self {
        if let Some(capacity) = self.node.capacity.take() {
            self.node.capacity = Some(capacity.with_location(region, zone));
        }
        self
    }

    pub fn with_load(mut self, load_score: f64) -> Self {
        self.node.load_score = load_score;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.node.average_latency_ms = latency_ms;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.node.reliability = reliability;
        self
    }

    /// 最后可见时间设置为 `seconds` 秒之前
    pub fn unseen_for(mut self, seconds: i64) -> Self {
        self.node.last_seen = Utc::now() - Duration::seconds(seconds);
        self
    }

    pub fn build(self) -> NodeRecord {
        self.node
    }
}

impl Default for NodeRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// ResourceMetrics 构建器
pub struct ResourceMetricsBuilder {
    metrics: ResourceMetrics,
}

impl ResourceMetricsBuilder {
    pub fn new(node_id: &str) -> Self {
        Self {
            metrics: ResourceMetrics::new(node_id, 10.0, 10.0, 10.0),
        }
    }

    pub fn with_usage(mut self, cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        self.metrics.cpu_usage_percent = cpu_percent;
        self.metrics.memory_usage_percent = memory_percent;
        self.metrics.disk_usage_percent = disk_percent;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.metrics.network_latency_ms = latency_ms;
        self
    }

    pub fn build(self) -> ResourceMetrics {
        self.metrics
    }
}

/// PartialResult 构建器
pub struct PartialResultBuilder {
    result: PartialResult,
}

impl PartialResultBuilder {
    pub fn new(partition_id: &str) -> Self {
        Self {
            result: PartialResult {
                partition_id: partition_id.to_string(),
                node_id: "node-1".to_string(),
                data: serde_json::Value::Null,
                error: None,
                metadata: Default::default(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.result.data = data;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.result.error = Some(error.to_string());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.result
            .metadata
            .insert("weight".to_string(), serde_json::json!(weight));
        self
    }

    pub fn build(self) -> PartialResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = TaskBuilder::new()
            .with_id("t-42")
            .with_priority(TaskPriority::Urgent)
            .with_strategy("round_robin")
            .with_max_retries(5)
            .build();

        assert_eq!(task.id, "t-42");
        assert_eq!(task.priority, TaskPriority::Urgent);
        assert_eq!(task.strategy_hint(), Some("round_robin"));
        assert_eq!(task.max_retries, 5);
    }

    #[test]
    fn test_node_builder() {
        let node = NodeRecordBuilder::new()
            .with_id("gpu-node")
            .with_gpu(2, 16 * GB)
            .with_region("us-east", "1a")
            .unseen_for(60)
            .build();

        let capacity = node.capacity.as_ref().unwrap();
        assert_eq!(node.node_id, "gpu-node");
        assert_eq!(capacity.total_gpu_cores, 2);
        assert_eq!(node.region(), Some("us-east"));
        assert!(node.is_stale(Utc::now(), Duration::seconds(30)));
    }

    #[test]
    fn test_partial_result_builder() {
        let result = PartialResultBuilder::new("p1")
            .with_data(serde_json::json!(10))
            .with_weight(3.0)
            .build();
        assert!(!result.is_error());
        assert_eq!(result.metadata["weight"], serde_json::json!(3.0));
    }
}
