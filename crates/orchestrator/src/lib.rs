//! 编排引擎：请求分区、分片执行、结果聚合

pub mod aggregation;
pub mod cluster;
pub mod coordinator;
pub mod engine;
pub mod executor;
pub mod monitor;
pub mod partitioning;

pub use aggregation::{
    AggregationStrategy, AverageAggregation, ConcatAggregation, WeightedAggregation,
};
pub use cluster::{ClusterView, StaticClusterView};
pub use coordinator::{
    Coordinator, InMemorySessionPersistence, PartitionOptimizer, RequestRouter,
    RequestSynchronizer, RouteAction, RouteCondition, RoutingDecision, RoutingMetrics,
    RoutingRule, SessionPersistence, SessionState, SessionStateManager, StrategyStats,
    SyncBarrier,
};
pub use engine::OrchestrationEngine;
pub use executor::{PartitionExecutor, SimulatedExecutor};
pub use monitor::{ClusterLoadMonitor, Monitor};
pub use partitioning::{
    strategy_for_request_type, CapabilityBasedPartitioning, LoadBasedPartitioning,
    PartitioningStrategy, RoundRobinPartitioning,
};
