use async_trait::async_trait;
use tokio::sync::RwLock;

use fleet_distributor::TaskDistributor;
use fleet_domain::ClusterNode;

/// 分区策略依赖的集群视图
#[async_trait]
pub trait ClusterView: Send + Sync {
    async fn nodes(&self) -> Vec<ClusterNode>;
}

/// 固定节点列表，可在运行时替换
#[derive(Debug, Default)]
pub struct StaticClusterView {
    nodes: RwLock<Vec<ClusterNode>>,
}

impl StaticClusterView {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    pub async fn set_nodes(&self, nodes: Vec<ClusterNode>) {
        *self.nodes.write().await = nodes;
    }
}

#[async_trait]
impl ClusterView for StaticClusterView {
    async fn nodes(&self) -> Vec<ClusterNode> {
        self.nodes.read().await.clone()
    }
}

/// 分发器中当前可用的节点，能力来自节点容量和特性
#[async_trait]
impl ClusterView for TaskDistributor {
    async fn nodes(&self) -> Vec<ClusterNode> {
        self.available_nodes()
            .await
            .into_iter()
            .map(|node| {
                let mut capabilities = vec!["cpu".to_string()];
                if node.capacity.as_ref().is_some_and(|c| c.total_gpu_cores > 0) {
                    capabilities.push("gpu".to_string());
                }
                for feature in &node.features {
                    if !capabilities.contains(feature) {
                        capabilities.push(feature.clone());
                    }
                }

                ClusterNode {
                    node_id: node.node_id,
                    load: node.load_score,
                    capabilities,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::DistributorConfig;
    use fleet_testing_utils::NodeRecordBuilder;

    #[tokio::test]
    async fn test_static_view_replaces_nodes() {
        let view = StaticClusterView::new(vec![ClusterNode::new("a", 0.1, &["cpu"])]);
        assert_eq!(view.nodes().await.len(), 1);

        view.set_nodes(vec![]).await;
        assert!(view.nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_distributor_view_reports_capabilities() {
        let distributor = TaskDistributor::new(DistributorConfig::default());
        distributor
            .register_node(
                NodeRecordBuilder::new()
                    .with_id("gpu-node")
                    .with_gpu(2, 16 * fleet_testing_utils::GB)
                    .with_features(&["fp16"])
                    .with_load(0.3)
                    .build(),
            )
            .await
            .unwrap();
        distributor
            .register_node(NodeRecordBuilder::new().with_id("cpu-node").with_load(0.2).build())
            .await
            .unwrap();

        let nodes = ClusterView::nodes(&distributor).await;
        assert_eq!(nodes.len(), 2);

        let gpu = nodes.iter().find(|n| n.node_id == "gpu-node").unwrap();
        assert_eq!(gpu.capabilities, vec!["cpu", "gpu", "fp16"]);
        assert!((gpu.load - 0.3).abs() < 1e-9);

        let cpu = nodes.iter().find(|n| n.node_id == "cpu-node").unwrap();
        assert_eq!(cpu.capabilities, vec!["cpu"]);
    }
}
