use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use fleet_core::FleetResult;
use fleet_domain::TaskPartition;

/// 远程执行通道：把分片交给目标节点执行并返回结果数据
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PartitionExecutor: Send + Sync {
    async fn execute(&self, partition: &TaskPartition) -> FleetResult<Value>;
}

/// 模拟执行器，固定延迟后返回 `"mock_result"`
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    delay: Duration,
}

impl SimulatedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl PartitionExecutor for SimulatedExecutor {
    async fn execute(&self, partition: &TaskPartition) -> FleetResult<Value> {
        debug!(
            "模拟执行分片 {} (节点: {}, 类型: {})",
            partition.id, partition.node_id, partition.partition_type
        );
        tokio::time::sleep(self.delay).await;
        Ok(json!("mock_result"))
    }
}
