use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use fleet_core::{FleetError, FleetResult};
use fleet_domain::{NodeRecord, Task};

/// 延迟评分上限（毫秒），达到或超过该值得分为0
const LATENCY_CEILING_MS: f64 = 1000.0;

/// 节点放置策略
#[async_trait]
pub trait PlacementStrategy: Send + Sync {
    /// 从候选节点中为任务选择一个节点，返回节点ID
    async fn select_node(&self, task: &Task, candidates: &[NodeRecord]) -> FleetResult<String>;

    /// 计算节点对任务的适配分数
    fn calculate_score(&self, task: &Task, node: &NodeRecord) -> f64;

    fn name(&self) -> &str;
}

/// 选出得分最高的节点，同分时保留候选列表中靠前的节点
fn select_highest_score<S: PlacementStrategy + ?Sized>(
    strategy: &S,
    task: &Task,
    candidates: &[NodeRecord],
) -> FleetResult<String> {
    let mut best: Option<(&NodeRecord, f64)> = None;
    for node in candidates {
        let score = strategy.calculate_score(task, node);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((node, score)),
        }
    }

    let (node, score) = best.ok_or(FleetError::NoAvailableNodes)?;
    debug!(
        "{}策略选择节点: {} (得分: {:.3}, 候选数: {})",
        strategy.name(),
        node.node_id,
        score,
        candidates.len()
    );
    Ok(node.node_id.clone())
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

pub struct LeastLoadedStrategy;

pub struct ResourceAwareStrategy;

pub struct LatencyBasedStrategy;

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlacementStrategy for RoundRobinStrategy {
    async fn select_node(&self, _task: &Task, candidates: &[NodeRecord]) -> FleetResult<String> {
        if candidates.is_empty() {
            debug!("没有可用的节点");
            return Err(FleetError::NoAvailableNodes);
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let selected = &candidates[index];

        debug!(
            "轮询策略选择节点: {} (索引: {}/{})",
            selected.node_id,
            index,
            candidates.len()
        );

        Ok(selected.node_id.clone())
    }

    fn calculate_score(&self, _task: &Task, _node: &NodeRecord) -> f64 {
        1.0
    }

    fn name(&self) -> &str {
        "round_robin"
    }
}

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastLoadedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlacementStrategy for LeastLoadedStrategy {
    async fn select_node(&self, task: &Task, candidates: &[NodeRecord]) -> FleetResult<String> {
        select_highest_score(self, task, candidates)
    }

    fn calculate_score(&self, _task: &Task, node: &NodeRecord) -> f64 {
        1.0 - node.load_score
    }

    fn name(&self) -> &str {
        "least_loaded"
    }
}

impl ResourceAwareStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ResourceAwareStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlacementStrategy for ResourceAwareStrategy {
    async fn select_node(&self, task: &Task, candidates: &[NodeRecord]) -> FleetResult<String> {
        select_highest_score(self, task, candidates)
    }

    /// 分配后CPU与内存平均利用率越低得分越高；缺少容量信息时取中性分0.5
    fn calculate_score(&self, task: &Task, node: &NodeRecord) -> f64 {
        let Some(capacity) = node.capacity.as_ref() else {
            return 0.5;
        };
        if capacity.total_cpu_cores <= 0.0 || capacity.total_memory_bytes == 0 {
            return 0.5;
        }

        let (cpu_util, memory_util) = capacity.projected_utilization(&task.requirements);
        1.0 - (cpu_util + memory_util) / 2.0
    }

    fn name(&self) -> &str {
        "resource_aware"
    }
}

impl LatencyBasedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LatencyBasedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlacementStrategy for LatencyBasedStrategy {
    async fn select_node(&self, task: &Task, candidates: &[NodeRecord]) -> FleetResult<String> {
        select_highest_score(self, task, candidates)
    }

    fn calculate_score(&self, _task: &Task, node: &NodeRecord) -> f64 {
        let latency = node.average_latency_ms.max(0.0);
        if latency >= LATENCY_CEILING_MS {
            return 0.0;
        }
        1.0 - latency / LATENCY_CEILING_MS
    }

    fn name(&self) -> &str {
        "latency_based"
    }
}

/// 内置的四种放置策略
pub fn default_strategies() -> Vec<Arc<dyn PlacementStrategy>> {
    vec![
        Arc::new(RoundRobinStrategy::new()),
        Arc::new(LeastLoadedStrategy::new()),
        Arc::new(ResourceAwareStrategy::new()),
        Arc::new(LatencyBasedStrategy::new()),
    ]
}
