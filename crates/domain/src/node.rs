use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::resources::{NodeCapacity, ResourceMetrics};

const IDLE_LOAD_THRESHOLD: f64 = 0.3;
const BUSY_LOAD_THRESHOLD: f64 = 0.8;
const HEALTHY_SCORE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Idle,
    Busy,
    Draining,
    Unavailable,
    Maintenance,
}

impl NodeStatus {
    /// 由管理员设置的状态，指标上报不会覆盖
    pub fn is_administrative(&self) -> bool {
        matches!(self, NodeStatus::Draining | NodeStatus::Maintenance)
    }

    pub fn accepts_tasks(&self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Idle | NodeStatus::Busy)
    }

    pub fn from_load(load_score: f64) -> Self {
        if load_score < IDLE_LOAD_THRESHOLD {
            NodeStatus::Idle
        } else if load_score < BUSY_LOAD_THRESHOLD {
            NodeStatus::Active
        } else {
            NodeStatus::Busy
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Active => "active",
            NodeStatus::Idle => "idle",
            NodeStatus::Busy => "busy",
            NodeStatus::Draining => "draining",
            NodeStatus::Unavailable => "unavailable",
            NodeStatus::Maintenance => "maintenance",
        };
        write!(f, "{s}")
    }
}

/// 面向任务分发的节点档案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub status: NodeStatus,
    pub last_seen: DateTime<Utc>,

    pub capacity: Option<NodeCapacity>,
    #[serde(default)]
    pub features: Vec<String>,

    pub reliability: f64,
    pub average_latency_ms: f64,
    pub throughput: f64,

    pub running_tasks: u32,
    pub queued_tasks: u32,
    pub load_score: f64,

    pub health_score: f64,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl NodeRecord {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Idle,
            last_seen: Utc::now(),
            capacity: None,
            features: Vec::new(),
            reliability: 1.0,
            average_latency_ms: 0.0,
            throughput: 0.0,
            running_tasks: 0,
            queued_tasks: 0,
            load_score: 0.0,
            health_score: 1.0,
            last_health_check: None,
        }
    }

    pub fn with_capacity(mut self, capacity: NodeCapacity) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// 应用一次指标上报：刷新负载分、延迟和最后可见时间，并重新推导状态
    pub fn apply_metrics(&mut self, metrics: &ResourceMetrics, now: DateTime<Utc>) {
        self.load_score = metrics.load_score();
        if metrics.network_latency_ms > 0.0 {
            self.average_latency_ms = metrics.network_latency_ms;
        }
        self.last_seen = now;

        if !self.status.is_administrative() {
            self.status = NodeStatus::from_load(self.load_score);
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_seen > timeout
    }

    /// 健康分：过期节点为0，否则为可靠性按负载折减
    pub fn compute_health(&self, now: DateTime<Utc>, timeout: Duration) -> f64 {
        if self.is_stale(now, timeout) || self.status == NodeStatus::Unavailable {
            return 0.0;
        }
        (self.reliability * (1.0 - 0.5 * self.load_score.clamp(0.0, 1.0))).clamp(0.0, 1.0)
    }

    pub fn refresh_health(&mut self, now: DateTime<Utc>, timeout: Duration) {
        self.health_score = self.compute_health(now, timeout);
        self.last_health_check = Some(now);
    }

    pub fn is_healthy(&self) -> bool {
        self.health_score >= HEALTHY_SCORE_THRESHOLD
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
            || self
                .capacity
                .as_ref()
                .is_some_and(|c| c.supported_features.iter().any(|f| f == feature))
    }

    pub fn region(&self) -> Option<&str> {
        self.capacity
            .as_ref()
            .map(|c| c.region.as_str())
            .filter(|r| !r.is_empty())
    }

    pub fn zone(&self) -> Option<&str> {
        self.capacity
            .as_ref()
            .map(|c| c.zone.as_str())
            .filter(|z| !z.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_load() {
        assert_eq!(NodeStatus::from_load(0.1), NodeStatus::Idle);
        assert_eq!(NodeStatus::from_load(0.3), NodeStatus::Active);
        assert_eq!(NodeStatus::from_load(0.79), NodeStatus::Active);
        assert_eq!(NodeStatus::from_load(0.8), NodeStatus::Busy);
    }

    #[test]
    fn test_apply_metrics_derives_status() {
        let now = Utc::now();
        let mut node = NodeRecord::new("node-1");
        let mut metrics = ResourceMetrics::new("node-1", 90.0, 90.0, 90.0);
        metrics.network_latency_ms = 42.0;

        node.apply_metrics(&metrics, now);

        assert_eq!(node.status, NodeStatus::Busy);
        assert!((node.load_score - 0.9).abs() < 1e-9);
        assert_eq!(node.average_latency_ms, 42.0);
        assert_eq!(node.last_seen, now);
    }

    #[test]
    fn test_administrative_status_survives_metrics() {
        let mut node = NodeRecord::new("node-1");
        node.status = NodeStatus::Draining;
        node.apply_metrics(&ResourceMetrics::new("node-1", 5.0, 5.0, 5.0), Utc::now());
        assert_eq!(node.status, NodeStatus::Draining);
    }

    #[test]
    fn test_staleness_and_health() {
        let now = Utc::now();
        let mut node = NodeRecord::new("node-1");
        node.last_seen = now - Duration::seconds(600);
        assert!(node.is_stale(now, Duration::seconds(300)));

        node.refresh_health(now, Duration::seconds(300));
        assert_eq!(node.health_score, 0.0);
        assert!(!node.is_healthy());

        node.last_seen = now;
        node.load_score = 0.5;
        node.refresh_health(now, Duration::seconds(300));
        assert!((node.health_score - 0.75).abs() < 1e-9);
        assert!(node.is_healthy());
    }

    #[test]
    fn test_features_from_capacity() {
        let node = NodeRecord::new("node-1").with_capacity(
            NodeCapacity::new(4.0, 1024, 1024)
                .with_features(&["cuda"])
                .with_location("eu-west", "a"),
        );
        assert!(node.has_feature("cuda"));
        assert!(!node.has_feature("tpu"));
        assert_eq!(node.region(), Some("eu-west"));
        assert_eq!(node.zone(), Some("a"));
    }
}
