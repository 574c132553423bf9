use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 进入编排引擎的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub id: String,
    pub request_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    pub priority: i32,
    /// 单个分片执行的超时时间，未设置时使用引擎配置
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl OrchestrationRequest {
    pub fn new(request_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_type: request_type.into(),
            payload,
            options: HashMap::new(),
            priority: 0,
            timeout_seconds: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationStatus {
    Pending,
    Partitioned,
    Executing,
    Aggregating,
    Completed,
    Failed,
    Retrying,
}

impl OrchestrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestrationStatus::Completed | OrchestrationStatus::Failed)
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrchestrationStatus::Pending => "pending",
            OrchestrationStatus::Partitioned => "partitioned",
            OrchestrationStatus::Executing => "executing",
            OrchestrationStatus::Aggregating => "aggregating",
            OrchestrationStatus::Completed => "completed",
            OrchestrationStatus::Failed => "failed",
            OrchestrationStatus::Retrying => "retrying",
        };
        write!(f, "{s}")
    }
}

/// 编排引擎驱动的任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationTask {
    pub id: String,
    pub task_type: String,
    pub request: OrchestrationRequest,
    pub partition_plan: Option<PartitionPlan>,
    #[serde(default)]
    pub partial_results: Vec<PartialResult>,
    pub aggregated_result: Option<AggregatedResponse>,
    pub status: OrchestrationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl OrchestrationTask {
    pub fn new(request: OrchestrationRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: request.request_type.clone(),
            request,
            partition_plan: None,
            partial_results: Vec::new(),
            aggregated_result: None,
            status: OrchestrationStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            metadata: HashMap::new(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// 计划中的每个分片都已上报结果
    pub fn all_partitions_reported(&self) -> bool {
        self.partition_plan.as_ref().is_some_and(|plan| {
            plan.partitions.iter().all(|partition| {
                self.partial_results
                    .iter()
                    .any(|r| r.partition_id == partition.id)
            })
        })
    }

    /// 清除上一轮的分片计划和结果，准备重新执行
    pub fn reset_for_retry(&mut self) {
        self.partition_plan = None;
        self.partial_results.clear();
        self.aggregated_result = None;
    }

    pub fn elapsed_ms(&self) -> i64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub id: String,
    pub strategy: String,
    pub partitions: Vec<TaskPartition>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl PartitionPlan {
    pub fn new(strategy: impl Into<String>, partitions: Vec<TaskPartition>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            strategy: strategy.into(),
            partitions,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPartition {
    pub id: String,
    pub node_id: String,
    pub partition_type: String,
    pub data: serde_json::Value,
    /// 依赖的分片ID，仅记录
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskPartition {
    pub fn new(
        id: impl Into<String>,
        node_id: impl Into<String>,
        partition_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            partition_type: partition_type.into(),
            data,
            dependencies: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// 单个分片的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialResult {
    pub partition_id: String,
    pub node_id: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl PartialResult {
    pub fn success(partition: &TaskPartition, data: serde_json::Value) -> Self {
        Self {
            partition_id: partition.id.clone(),
            node_id: partition.node_id.clone(),
            data,
            error: None,
            metadata: partition.metadata.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(partition: &TaskPartition, error: impl Into<String>) -> Self {
        Self {
            partition_id: partition.id.clone(),
            node_id: partition.node_id.clone(),
            data: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: partition.metadata.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationContext {
    pub task_id: String,
    pub strategy: String,
    pub partial_results: Vec<PartialResult>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AggregationContext {
    pub fn new(
        task_id: impl Into<String>,
        strategy: impl Into<String>,
        partial_results: Vec<PartialResult>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            strategy: strategy.into(),
            partial_results,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub task_id: String,
    pub strategy: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// 分区策略看到的节点视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: String,
    /// 0到1之间的负载
    pub load: f64,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ClusterNode {
    pub fn new(node_id: impl Into<String>, load: f64, capabilities: &[&str]) -> Self {
        Self {
            node_id: node_id.into(),
            load,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// 编排任务状态变更事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub from: Option<OrchestrationStatus>,
    pub to: OrchestrationStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_task_from_request() {
        let request = OrchestrationRequest::new("batch_processing", json!({"prompt": "hi"}));
        let task = OrchestrationTask::new(request.clone());

        assert_eq!(task.task_type, "batch_processing");
        assert_eq!(task.status, OrchestrationStatus::Pending);
        assert_eq!(task.request.id, request.id);
        assert_ne!(task.id, request.id);
        assert!(!task.all_partitions_reported());
    }

    #[test]
    fn test_all_partitions_reported() {
        let mut task = OrchestrationTask::new(OrchestrationRequest::new("x", json!(null)));
        let partitions = vec![
            TaskPartition::new("p0", "n1", "compute", json!(1)),
            TaskPartition::new("p1", "n2", "compute", json!(2)),
        ];
        task.partition_plan = Some(PartitionPlan::new("round_robin", partitions.clone()));

        task.partial_results.push(PartialResult::success(&partitions[0], json!(1)));
        assert!(!task.all_partitions_reported());
        // 同一分片重复上报不算覆盖其他分片
        task.partial_results.push(PartialResult::success(&partitions[0], json!(1)));
        assert!(!task.all_partitions_reported());
        task.partial_results.pop();
        task.partial_results.push(PartialResult::failure(&partitions[1], "boom"));
        assert!(task.all_partitions_reported());

        task.reset_for_retry();
        assert!(task.partition_plan.is_none());
        assert!(task.partial_results.is_empty());
    }

    #[test]
    fn test_partial_result_error_flag() {
        let partition = TaskPartition::new("p0", "n1", "compute", json!(null));
        assert!(!PartialResult::success(&partition, json!(3)).is_error());
        assert!(PartialResult::failure(&partition, "timeout").is_error());
        assert!(!PartialResult::failure(&partition, "").is_error());
    }

    #[test]
    fn test_request_options() {
        let request = OrchestrationRequest::new("x", json!(null))
            .with_option("aggregation", json!("average"));
        assert_eq!(request.option_str("aggregation"), Some("average"));
        assert_eq!(request.option_str("missing"), None);
    }

    #[test]
    fn test_terminal_status() {
        assert!(OrchestrationStatus::Completed.is_terminal());
        assert!(OrchestrationStatus::Failed.is_terminal());
        assert!(!OrchestrationStatus::Retrying.is_terminal());
    }
}
