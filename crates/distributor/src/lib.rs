//! 任务分发器
//!
//! 节点注册表、待分发/运行中/已完成任务队列，以及可插拔的节点放置策略。

pub mod distributor;
pub mod strategies;


pub use distributor::TaskDistributor;
pub use strategies::{
    default_strategies, LatencyBasedStrategy, LeastLoadedStrategy, PlacementStrategy,
    ResourceAwareStrategy, RoundRobinStrategy,
};
