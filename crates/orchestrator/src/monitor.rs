use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use fleet_core::FleetResult;
use fleet_domain::OrchestrationMetrics;

use crate::cluster::ClusterView;

pub const RESOURCE_UTILIZATION: &str = "resource_utilization";
pub const THROUGHPUT: &str = "throughput";
pub const AVERAGE_LATENCY_MS: &str = "average_latency_ms";

/// 监控周期中采集指标的组件
#[async_trait]
pub trait Monitor: Send + Sync {
    async fn collect(&self) -> FleetResult<HashMap<String, f64>>;

    fn name(&self) -> &str;
}

/// 以集群平均负载作为资源利用率
pub struct ClusterLoadMonitor {
    cluster: Arc<dyn ClusterView>,
}

impl ClusterLoadMonitor {
    pub fn new(cluster: Arc<dyn ClusterView>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl Monitor for ClusterLoadMonitor {
    async fn collect(&self) -> FleetResult<HashMap<String, f64>> {
        let nodes = self.cluster.nodes().await;
        let utilization = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| n.load.clamp(0.0, 1.0)).sum::<f64>() / nodes.len() as f64
        };

        Ok(HashMap::from([(RESOURCE_UTILIZATION.to_string(), utilization)]))
    }

    fn name(&self) -> &str {
        "resource_monitor"
    }
}

/// 把监控采集到的已知指标写入引擎指标，未知键忽略
pub fn apply_monitor_values(metrics: &mut OrchestrationMetrics, values: &HashMap<String, f64>) {
    for (key, value) in values {
        match key.as_str() {
            RESOURCE_UTILIZATION => metrics.resource_utilization = *value,
            THROUGHPUT => metrics.throughput = *value,
            AVERAGE_LATENCY_MS => metrics.average_latency_ms = *value,
            other => debug!("忽略未知监控指标: {}", other),
        }
    }
    metrics.last_updated = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StaticClusterView;
    use fleet_domain::ClusterNode;

    #[tokio::test]
    async fn test_cluster_load_monitor() {
        let view = Arc::new(StaticClusterView::new(vec![
            ClusterNode::new("a", 0.2, &["cpu"]),
            ClusterNode::new("b", 0.6, &["cpu"]),
        ]));
        let monitor = ClusterLoadMonitor::new(view.clone());
        let values = monitor.collect().await.unwrap();
        assert!((values[RESOURCE_UTILIZATION] - 0.4).abs() < 1e-9);
        assert_eq!(monitor.name(), "resource_monitor");

        view.set_nodes(vec![]).await;
        assert_eq!(monitor.collect().await.unwrap()[RESOURCE_UTILIZATION], 0.0);
    }

    #[test]
    fn test_apply_monitor_values() {
        let mut metrics = OrchestrationMetrics::default();
        let values = HashMap::from([
            (RESOURCE_UTILIZATION.to_string(), 0.7),
            (THROUGHPUT.to_string(), 12.0),
            ("unknown".to_string(), 99.0),
        ]);
        apply_monitor_values(&mut metrics, &values);

        assert_eq!(metrics.resource_utilization, 0.7);
        assert_eq!(metrics.throughput, 12.0);
        assert_eq!(metrics.average_latency_ms, 0.0);
        assert!(metrics.last_updated.is_some());
    }
}
