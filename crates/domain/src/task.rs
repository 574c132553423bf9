use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::NodeRecord;
use crate::resources::ResourceRequirement;

/// 可分配的离散任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,

    #[serde(default)]
    pub requirements: ResourceRequirement,
    #[serde(default)]
    pub constraints: TaskConstraints,

    pub assigned_node_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub result: Option<serde_json::Value>,

    pub max_retries: u32,
    pub retry_count: u32,
    pub timeout_seconds: Option<u64>,
    pub last_error: Option<String>,
    /// 重试退避期间，早于该时间不会被分配
    pub not_before: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
    Urgent,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
            TaskPriority::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retrying => "retrying",
        };
        write!(f, "{s}")
    }
}

/// 调度约束
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConstraints {
    #[serde(default)]
    pub required_nodes: Vec<String>,
    #[serde(default)]
    pub excluded_nodes: Vec<String>,
    #[serde(default)]
    pub preferred_nodes: Vec<String>,

    /// 键为 region / zone 时与节点位置比较，其他键要求节点具备 "key=value" 特性
    #[serde(default)]
    pub node_affinity: HashMap<String, String>,
    #[serde(default)]
    pub anti_affinity: Vec<String>,

    pub earliest_start: Option<DateTime<Utc>>,
    pub latest_start: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,

    pub min_reliability: Option<f64>,
    pub max_latency_ms: Option<u64>,
}

impl TaskConstraints {
    /// 节点是否满足硬约束
    pub fn admits(&self, node: &NodeRecord) -> bool {
        let id = node.node_id.as_str();

        if !self.required_nodes.is_empty() && !self.required_nodes.iter().any(|n| n == id) {
            return false;
        }
        if self.excluded_nodes.iter().any(|n| n == id) || self.anti_affinity.iter().any(|n| n == id)
        {
            return false;
        }
        if let Some(min) = self.min_reliability {
            if node.reliability < min {
                return false;
            }
        }
        if let Some(max) = self.max_latency_ms {
            if node.average_latency_ms > max as f64 {
                return false;
            }
        }

        self.node_affinity.iter().all(|(key, value)| match key.as_str() {
            "region" => node.region() == Some(value.as_str()),
            "zone" => node.zone() == Some(value.as_str()),
            _ => node.has_feature(&format!("{key}={value}")),
        })
    }

    pub fn prefers(&self, node_id: &str) -> bool {
        self.preferred_nodes.iter().any(|n| n == node_id)
    }
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, task_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            requirements: ResourceRequirement::default(),
            constraints: TaskConstraints::default(),
            assigned_node_id: None,
            start_time: None,
            end_time: None,
            payload: serde_json::Value::Null,
            dependencies: Vec::new(),
            result: None,
            max_retries: 3,
            retry_count: 0,
            timeout_seconds: None,
            last_error: None,
            not_before: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// 元数据中显式指定的放置策略
    pub fn strategy_hint(&self) -> Option<&str> {
        self.metadata.get("strategy").and_then(|v| v.as_str())
    }

    /// 是否已到可分配时间
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        let backoff_elapsed = self.not_before.is_none_or(|t| now >= t);
        let window_open = self.constraints.earliest_start.is_none_or(|t| now >= t);
        backoff_elapsed && window_open
    }

    /// 截止时间或最晚开始时间已过
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let past_deadline = self.constraints.deadline.is_some_and(|t| now > t);
        let past_latest_start = self.constraints.latest_start.is_some_and(|t| now > t);
        past_deadline || past_latest_start
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// 按优先级降序、创建时间升序排列待处理任务
///
/// 排序稳定，同优先级同创建时间的任务保持提交顺序。
pub fn sort_by_priority(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::Critical);
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn test_sort_by_priority_then_age() {
        let base = Utc::now();
        let mut tasks = Vec::new();
        for (i, priority) in [
            TaskPriority::Low,
            TaskPriority::Urgent,
            TaskPriority::Normal,
            TaskPriority::Urgent,
            TaskPriority::High,
        ]
        .into_iter()
        .enumerate()
        {
            let mut task = Task::new(format!("t{i}"), "task", "inference");
            task.priority = priority;
            task.created_at = base + Duration::seconds(10 - i as i64);
            tasks.push(task);
        }

        sort_by_priority(&mut tasks);

        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        // t3 比 t1 创建得更早
        assert_eq!(ids, vec!["t3", "t1", "t4", "t2", "t0"]);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(json, "\"retrying\"");
        let priority: TaskPriority = serde_json::from_str("\"urgent\"").unwrap();
        assert_eq!(priority, TaskPriority::Urgent);
    }

    #[test]
    fn test_readiness_and_expiry() {
        let now = Utc::now();
        let mut task = Task::new("t1", "task", "inference");
        assert!(task.is_ready(now));

        task.not_before = Some(now + Duration::seconds(5));
        assert!(!task.is_ready(now));
        assert!(task.is_ready(now + Duration::seconds(6)));

        task.constraints.deadline = Some(now - Duration::seconds(1));
        assert!(task.is_expired(now));
    }

    #[test]
    fn test_constraints_admit() {
        let mut node = NodeRecord::new("node-1");
        node.reliability = 0.9;
        node.average_latency_ms = 20.0;
        node.features = vec!["gpu=a100".to_string()];

        let mut constraints = TaskConstraints::default();
        assert!(constraints.admits(&node));

        constraints.required_nodes = vec!["node-2".to_string()];
        assert!(!constraints.admits(&node));
        constraints.required_nodes.clear();

        constraints.anti_affinity = vec!["node-1".to_string()];
        assert!(!constraints.admits(&node));
        constraints.anti_affinity.clear();

        constraints.min_reliability = Some(0.95);
        assert!(!constraints.admits(&node));
        constraints.min_reliability = None;

        constraints.max_latency_ms = Some(10);
        assert!(!constraints.admits(&node));
        constraints.max_latency_ms = None;

        constraints
            .node_affinity
            .insert("gpu".to_string(), "a100".to_string());
        assert!(constraints.admits(&node));
    }

    #[test]
    fn test_strategy_hint() {
        let mut task = Task::new("t1", "task", "inference");
        assert_eq!(task.strategy_hint(), None);
        task.metadata
            .insert("strategy".to_string(), serde_json::json!("least_loaded"));
        assert_eq!(task.strategy_hint(), Some("least_loaded"));
    }
}
