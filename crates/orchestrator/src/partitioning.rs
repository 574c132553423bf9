use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tracing::debug;

use fleet_core::{FleetError, FleetResult};
use fleet_domain::{ClusterNode, OrchestrationRequest, PartitionPlan, TaskPartition};

pub const ROUND_ROBIN: &str = "round_robin";
pub const LOAD_BASED: &str = "load_based";
pub const CAPABILITY_BASED: &str = "capability_based";

/// 请求分区策略
pub trait PartitioningStrategy: Send + Sync {
    /// 把请求拆分为绑定到节点的分片
    fn partition(
        &self,
        request: &OrchestrationRequest,
        nodes: &[ClusterNode],
    ) -> FleetResult<PartitionPlan>;

    fn name(&self) -> &str;
}

/// 按请求类型选择分区策略
pub fn strategy_for_request_type(request_type: &str) -> &'static str {
    match request_type {
        "distributed_inference" => LOAD_BASED,
        "batch_processing" => ROUND_ROBIN,
        _ => CAPABILITY_BASED,
    }
}

fn partition_id(request: &OrchestrationRequest, index: usize) -> String {
    format!("{}_p{}", request.id, index)
}

fn sorted_nodes(nodes: &[ClusterNode]) -> Vec<&ClusterNode> {
    let mut sorted: Vec<&ClusterNode> = nodes.iter().collect();
    sorted.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    sorted
}

/// 轮询分区：固定数量的等权分片，依次落到各节点
pub struct RoundRobinPartitioning {
    slots: usize,
    cursor: AtomicUsize,
}

impl RoundRobinPartitioning {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: slots.max(1),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinPartitioning {
    fn default() -> Self {
        Self::new(3)
    }
}

impl PartitioningStrategy for RoundRobinPartitioning {
    fn partition(
        &self,
        request: &OrchestrationRequest,
        nodes: &[ClusterNode],
    ) -> FleetResult<PartitionPlan> {
        if nodes.is_empty() {
            return Err(FleetError::Partitioning("集群中没有可用节点".to_string()));
        }

        let nodes = sorted_nodes(nodes);
        let start = self.cursor.fetch_add(self.slots, Ordering::Relaxed);
        let partitions = (0..self.slots)
            .map(|slot| {
                let node = nodes[(start + slot) % nodes.len()];
                let mut partition = TaskPartition::new(
                    partition_id(request, slot),
                    &node.node_id,
                    "compute",
                    json!({ "payload": request.payload, "slot": slot, "slots": self.slots }),
                );
                partition.metadata.insert("weight".to_string(), json!(1.0));
                partition
            })
            .collect();

        Ok(PartitionPlan::new(self.name(), partitions))
    }

    fn name(&self) -> &str {
        ROUND_ROBIN
    }
}

/// 负载分区：节点负载越低分到的分片越多，count = floor((1 - load) * k) + 1
pub struct LoadBasedPartitioning {
    factor: usize,
}

impl LoadBasedPartitioning {
    pub fn new(factor: usize) -> Self {
        Self { factor }
    }

    pub fn partition_count(&self, load: f64) -> usize {
        let headroom = 1.0 - load.clamp(0.0, 1.0);
        (headroom * self.factor as f64).floor() as usize + 1
    }
}

impl Default for LoadBasedPartitioning {
    fn default() -> Self {
        Self::new(4)
    }
}

impl PartitioningStrategy for LoadBasedPartitioning {
    fn partition(
        &self,
        request: &OrchestrationRequest,
        nodes: &[ClusterNode],
    ) -> FleetResult<PartitionPlan> {
        if nodes.is_empty() {
            return Err(FleetError::Partitioning("集群中没有可用节点".to_string()));
        }

        let mut partitions = Vec::new();
        for node in sorted_nodes(nodes) {
            let count = self.partition_count(node.load);
            debug!("节点 {} 负载 {:.2}，分配 {} 个分片", node.node_id, node.load, count);

            for unit in 0..count {
                let mut partition = TaskPartition::new(
                    partition_id(request, partitions.len()),
                    &node.node_id,
                    "compute",
                    json!({ "payload": request.payload, "unit": unit, "units": count }),
                );
                partition.metadata.insert("load".to_string(), json!(node.load));
                partition.metadata.insert("weight".to_string(), json!(1.0));
                partitions.push(partition);
            }
        }

        Ok(PartitionPlan::new(self.name(), partitions))
    }

    fn name(&self) -> &str {
        LOAD_BASED
    }
}

/// 能力分区：每个 (节点, 能力) 组合一个分片
pub struct CapabilityBasedPartitioning;

impl PartitioningStrategy for CapabilityBasedPartitioning {
    fn partition(
        &self,
        request: &OrchestrationRequest,
        nodes: &[ClusterNode],
    ) -> FleetResult<PartitionPlan> {
        let mut partitions = Vec::new();
        for node in sorted_nodes(nodes) {
            for capability in &node.capabilities {
                partitions.push(TaskPartition::new(
                    partition_id(request, partitions.len()),
                    &node.node_id,
                    capability,
                    request.payload.clone(),
                ));
            }
        }

        if partitions.is_empty() {
            return Err(FleetError::Partitioning(
                "没有节点声明任何能力，无法分区".to_string(),
            ));
        }
        Ok(PartitionPlan::new(self.name(), partitions))
    }

    fn name(&self) -> &str {
        CAPABILITY_BASED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OrchestrationRequest {
        OrchestrationRequest::new("batch_processing", json!({"prompt": "hello"}))
    }

    #[test]
    fn test_strategy_selection_by_type() {
        assert_eq!(strategy_for_request_type("distributed_inference"), LOAD_BASED);
        assert_eq!(strategy_for_request_type("batch_processing"), ROUND_ROBIN);
        assert_eq!(strategy_for_request_type("embedding"), CAPABILITY_BASED);
    }

    #[test]
    fn test_round_robin_cycles_nodes() {
        let strategy = RoundRobinPartitioning::new(3);
        let nodes = vec![
            ClusterNode::new("b", 0.1, &["cpu"]),
            ClusterNode::new("a", 0.1, &["cpu"]),
        ];

        let plan = strategy.partition(&request(), &nodes).unwrap();
        let targets: Vec<&str> = plan.partitions.iter().map(|p| p.node_id.as_str()).collect();
        assert_eq!(plan.strategy, ROUND_ROBIN);
        assert_eq!(targets, vec!["a", "b", "a"]);
        assert!(plan
            .partitions
            .iter()
            .all(|p| p.metadata["weight"] == json!(1.0)));

        // 下一个请求从上次结束的位置继续
        let next = strategy.partition(&request(), &nodes).unwrap();
        assert_eq!(next.partitions[0].node_id, "b");
    }

    #[test]
    fn test_round_robin_requires_nodes() {
        let strategy = RoundRobinPartitioning::default();
        assert!(matches!(
            strategy.partition(&request(), &[]),
            Err(FleetError::Partitioning(_))
        ));
    }

    #[test]
    fn test_load_based_counts() {
        let strategy = LoadBasedPartitioning::new(4);
        assert_eq!(strategy.partition_count(0.0), 5);
        assert_eq!(strategy.partition_count(0.5), 3);
        assert_eq!(strategy.partition_count(0.9), 1);
        assert_eq!(strategy.partition_count(1.0), 1);
        assert_eq!(strategy.partition_count(1.7), 1);

        let nodes = vec![
            ClusterNode::new("idle", 0.0, &[]),
            ClusterNode::new("busy", 0.9, &[]),
        ];
        let plan = strategy.partition(&request(), &nodes).unwrap();
        let on_idle = plan.partitions.iter().filter(|p| p.node_id == "idle").count();
        let on_busy = plan.partitions.iter().filter(|p| p.node_id == "busy").count();
        assert_eq!(on_idle, 5);
        assert_eq!(on_busy, 1);

        let ids: std::collections::HashSet<&str> =
            plan.partitions.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_capability_based_one_per_pair() {
        let nodes = vec![
            ClusterNode::new("n1", 0.2, &["cpu", "gpu"]),
            ClusterNode::new("n2", 0.2, &["cpu"]),
        ];
        let plan = CapabilityBasedPartitioning
            .partition(&request(), &nodes)
            .unwrap();

        let pairs: Vec<(&str, &str)> = plan
            .partitions
            .iter()
            .map(|p| (p.node_id.as_str(), p.partition_type.as_str()))
            .collect();
        assert_eq!(pairs, vec![("n1", "cpu"), ("n1", "gpu"), ("n2", "cpu")]);
    }

    #[test]
    fn test_capability_based_requires_capabilities() {
        let nodes = vec![ClusterNode::new("n1", 0.2, &[])];
        assert!(CapabilityBasedPartitioning
            .partition(&request(), &nodes)
            .is_err());
    }
}
