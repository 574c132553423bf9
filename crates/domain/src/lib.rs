//! 分布式推理系统的数据模型
//!
//! 只包含被动数据类型和简单的比较逻辑，行为由分发器和编排引擎实现。

pub mod metrics;
pub mod node;
pub mod orchestration;
pub mod resources;
pub mod task;

pub use metrics::{DistributionMetrics, OrchestrationMetrics};
pub use node::{NodeRecord, NodeStatus};
pub use orchestration::{
    AggregatedResponse, AggregationContext, ClusterNode, OrchestrationRequest,
    OrchestrationStatus, OrchestrationTask, PartialResult, PartitionPlan, TaskEvent,
    TaskPartition,
};
pub use resources::{NodeCapacity, ResourceMetrics, ResourceRequirement};
pub use task::{sort_by_priority, Task, TaskConstraints, TaskPriority, TaskStatus};
