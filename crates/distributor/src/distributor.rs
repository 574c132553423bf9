use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleet_core::{
    DistributorConfig, FleetError, FleetResult, MetricsCollector, ShutdownSignal,
    StructuredLogger,
};
use fleet_domain::{
    sort_by_priority, DistributionMetrics, NodeRecord, NodeStatus, ResourceMetrics, Task,
    TaskStatus,
};

use crate::strategies::{default_strategies, PlacementStrategy};

/// 完成任务时记录所用策略的元数据键
const ASSIGNED_STRATEGY_KEY: &str = "assigned_strategy";

/// 单个策略的分配结果统计
#[derive(Debug, Default, Clone, Copy)]
struct StrategyOutcome {
    succeeded: u64,
    failed: u64,
}

#[derive(Default)]
struct DistributorState {
    nodes: HashMap<String, NodeRecord>,
    node_metrics: HashMap<String, ResourceMetrics>,

    pending: Vec<Task>,
    running: HashMap<String, Task>,
    completed: HashMap<String, Task>,

    metrics: DistributionMetrics,
    strategy_outcomes: HashMap<String, StrategyOutcome>,
    distribution_time_total_ms: f64,
    distributed_count: u64,
    execution_time_total_ms: f64,
}

impl DistributorState {
    fn contains_task(&self, task_id: &str) -> bool {
        self.running.contains_key(task_id)
            || self.completed.contains_key(task_id)
            || self.pending.iter().any(|t| t.id == task_id)
    }

    /// 归还任务在其节点上预留的资源
    fn release_reservation(&mut self, task: &Task) {
        let Some(node_id) = task.assigned_node_id.as_deref() else {
            return;
        };
        let Some(node) = self.nodes.get_mut(node_id) else {
            debug!("节点 {} 已被清理，跳过资源归还", node_id);
            return;
        };

        if let Some(capacity) = node.capacity.as_mut() {
            capacity.release(&task.requirements);
        }
        node.running_tasks = node.running_tasks.saturating_sub(1);
    }

    fn record_strategy_outcome(&mut self, task: &Task, success: bool) {
        let Some(strategy) = task
            .metadata
            .get(ASSIGNED_STRATEGY_KEY)
            .and_then(|v| v.as_str())
        else {
            return;
        };
        let outcome = self
            .strategy_outcomes
            .entry(strategy.to_string())
            .or_default();
        if success {
            outcome.succeeded += 1;
        } else {
            outcome.failed += 1;
        }
    }

    /// 放入已完成缓存，超过上限时按结束时间淘汰最旧的任务
    fn archive(&mut self, task: Task, retention: usize) {
        self.completed.insert(task.id.clone(), task);
        trim_completed(&mut self.completed, retention);
    }
}

/// 保留结束时间最新的 `retention` 个任务
fn trim_completed(completed: &mut HashMap<String, Task>, retention: usize) -> usize {
    if completed.len() <= retention {
        return 0;
    }

    let mut by_end_time: Vec<(Option<DateTime<Utc>>, String)> = completed
        .values()
        .map(|t| (t.end_time, t.id.clone()))
        .collect();
    by_end_time.sort();

    let excess = completed.len() - retention;
    for (_, id) in by_end_time.into_iter().take(excess) {
        completed.remove(&id);
    }
    excess
}

/// 任务分发器
///
/// 维护节点注册表和待分发、运行中、已完成三组任务，周期性地按放置策略把任务分配到节点。
/// 所有状态由一把读写锁保护。
pub struct TaskDistributor {
    config: DistributorConfig,
    state: RwLock<DistributorState>,
    strategies: RwLock<HashMap<String, Arc<dyn PlacementStrategy>>>,
    metrics_collector: MetricsCollector,
    shutdown: ShutdownSignal,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl TaskDistributor {
    /// 创建分发器并注册内置策略
    pub fn new(config: DistributorConfig) -> Self {
        let strategies = default_strategies()
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();

        Self::with_strategies(config, strategies)
    }

    /// 使用自定义策略表创建分发器，策略表可以为空
    pub fn with_strategies(
        config: DistributorConfig,
        strategies: HashMap<String, Arc<dyn PlacementStrategy>>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(DistributorState::default()),
            strategies: RwLock::new(strategies),
            metrics_collector: MetricsCollector::new(),
            shutdown: ShutdownSignal::new("任务分发器"),
            workers: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    pub async fn register_strategy(&self, strategy: Arc<dyn PlacementStrategy>) {
        let name = strategy.name().to_string();
        info!("注册放置策略: {}", name);
        self.strategies.write().await.insert(name, strategy);
    }

    // ---------------------------------------------------------------
    // 任务管理
    // ---------------------------------------------------------------

    /// 提交任务到待分发队列
    pub async fn submit_task(&self, mut task: Task) -> FleetResult<()> {
        validate_task(&task)?;

        let mut state = self.state.write().await;
        if state.contains_task(&task.id) {
            return Err(FleetError::DuplicateTask { id: task.id });
        }

        let now = Utc::now();
        task.status = TaskStatus::Pending;
        task.created_at = now;
        task.updated_at = now;

        StructuredLogger::log_task_submitted(
            &task.id,
            &task.name,
            &task.task_type,
            &task.priority.to_string(),
        );

        state.pending.push(task);
        sort_by_priority(&mut state.pending);
        state.metrics.total_tasks += 1;
        self.metrics_collector.record_task_submitted();

        Ok(())
    }

    /// 执行一次分发
    ///
    /// 按队列顺序尝试放置任务，运行中任务数达到上限时停止。无法放置的任务留在队列中，
    /// 下个周期再试。没有注册任何策略时返回配置错误。返回本次分配的任务数。
    pub async fn distribute_tasks(&self) -> FleetResult<usize> {
        let pass_started = Instant::now();
        let strategies = self.strategies.read().await.clone();
        if strategies.is_empty() {
            return Err(FleetError::NoStrategies);
        }

        let mut state = self.state.write().await;
        let now = Utc::now();
        self.expire_pending(&mut state, now);

        if state.pending.is_empty() {
            return Ok(0);
        }

        let mut assigned = 0;
        let mut index = 0;
        while index < state.pending.len() {
            if state.running.len() >= self.config.max_concurrent_tasks {
                debug!(
                    "运行中任务数达到上限 {}，本轮分发结束",
                    self.config.max_concurrent_tasks
                );
                break;
            }

            if !state.pending[index].is_ready(now) {
                index += 1;
                continue;
            }

            let placement = self
                .place_task(&state, &state.pending[index], &strategies, now)
                .await;

            match placement {
                Ok((node_id, strategy_name, score)) => {
                    let task = state.pending.remove(index);
                    let task_id = task.id.clone();
                    match self.assign_task_to_node(&mut state, task, &node_id, &strategy_name, now)
                    {
                        Ok(()) => {
                            assigned += 1;
                            StructuredLogger::log_task_assigned(
                                &task_id,
                                &node_id,
                                &strategy_name,
                                score,
                            );
                        }
                        Err((task, e)) => {
                            StructuredLogger::log_task_deferred(&task.id, &e.to_string());
                            state.pending.insert(index, task);
                            index += 1;
                        }
                    }
                }
                Err(e) if e.is_placement_error() => {
                    StructuredLogger::log_task_deferred(&state.pending[index].id, &e.to_string());
                    index += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let elapsed = pass_started.elapsed();
        if assigned > 0 {
            state.distribution_time_total_ms += elapsed.as_secs_f64() * 1000.0;
            state.distributed_count += assigned as u64;
            state.metrics.average_distribution_time_ms =
                state.distribution_time_total_ms / state.distributed_count as f64;
        }
        self.metrics_collector
            .record_distribution_pass(elapsed.as_secs_f64());
        self.metrics_collector
            .update_queue_depth(state.pending.len(), state.running.len());

        Ok(assigned)
    }

    /// 截止时间已过的待分发任务直接判定失败
    fn expire_pending(&self, state: &mut DistributorState, now: DateTime<Utc>) {
        let (expired, pending): (Vec<Task>, Vec<Task>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|t| t.is_expired(now));
        state.pending = pending;

        for mut task in expired {
            let reason = "任务在截止时间前未能分配";
            StructuredLogger::log_task_failed(&task.id, None, reason);
            task.status = TaskStatus::Failed;
            task.last_error = Some(reason.to_string());
            task.end_time = Some(now);
            task.updated_at = now;
            state.metrics.failed_tasks += 1;
            self.metrics_collector.record_task_failed();
            state.archive(task, self.config.completed_task_retention);
        }
    }

    /// 为单个任务选择策略和节点，返回 (节点ID, 策略名, 得分)
    async fn place_task(
        &self,
        state: &DistributorState,
        task: &Task,
        strategies: &HashMap<String, Arc<dyn PlacementStrategy>>,
        now: DateTime<Utc>,
    ) -> FleetResult<(String, String, f64)> {
        let strategy = self.resolve_strategy(task, strategies)?;
        let candidates = self.candidate_nodes(state, task, now)?;

        let node_id = strategy.select_node(task, &candidates).await?;
        let score = candidates
            .iter()
            .find(|n| n.node_id == node_id)
            .map(|n| strategy.calculate_score(task, n))
            .unwrap_or_default();

        Ok((node_id, strategy.name().to_string(), score))
    }

    /// 策略解析顺序: 任务元数据指定的策略、默认策略、任意已注册策略
    fn resolve_strategy(
        &self,
        task: &Task,
        strategies: &HashMap<String, Arc<dyn PlacementStrategy>>,
    ) -> FleetResult<Arc<dyn PlacementStrategy>> {
        if let Some(hint) = task.strategy_hint() {
            if let Some(strategy) = strategies.get(hint) {
                return Ok(strategy.clone());
            }
            debug!("任务 {} 指定的策略 {} 未注册，使用默认策略", task.id, hint);
        }

        if let Some(strategy) = strategies.get(&self.config.default_strategy) {
            return Ok(strategy.clone());
        }

        strategies
            .values()
            .next()
            .cloned()
            .ok_or(FleetError::NoStrategies)
    }

    /// 可用节点中满足任务约束和资源需求的候选节点
    fn candidate_nodes(
        &self,
        state: &DistributorState,
        task: &Task,
        now: DateTime<Utc>,
    ) -> FleetResult<Vec<NodeRecord>> {
        let eligible: Vec<&NodeRecord> = self
            .eligible_nodes(state, now)
            .into_iter()
            .filter(|node| task.constraints.admits(node))
            .filter(|node| {
                task.requirements
                    .required_features
                    .iter()
                    .all(|f| node.has_feature(f))
            })
            .filter(|node| !task.requirements.anti_affinity.contains(&node.node_id))
            .collect();

        if eligible.is_empty() {
            return Err(FleetError::NoAvailableNodes);
        }

        let fitting: Vec<&NodeRecord> = eligible
            .iter()
            .copied()
            .filter(|node| has_available_resources(node, task))
            .collect();

        if fitting.is_empty() {
            return Err(FleetError::InsufficientResources {
                node_id: eligible
                    .iter()
                    .map(|n| n.node_id.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            });
        }

        let preferred: Vec<&NodeRecord> = fitting
            .iter()
            .copied()
            .filter(|node| task.constraints.prefers(&node.node_id))
            .collect();
        let narrowed = if !preferred.is_empty() {
            preferred
        } else if let Some(region) = task.requirements.preferred_region.as_deref() {
            let in_region: Vec<&NodeRecord> = fitting
                .iter()
                .copied()
                .filter(|node| node.region() == Some(region))
                .collect();
            if in_region.is_empty() {
                fitting
            } else {
                in_region
            }
        } else {
            fitting
        };

        let mut candidates: Vec<NodeRecord> = narrowed.into_iter().cloned().collect();
        // 哈希表遍历顺序不固定，排序后轮询策略才有确定的轮转顺序
        candidates.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(candidates)
    }

    fn is_node_available(&self, node: &NodeRecord, now: DateTime<Utc>) -> bool {
        if !node.status.accepts_tasks() {
            return false;
        }
        if node.is_stale(now, node_timeout(&self.config)) {
            return false;
        }
        if node.reliability < self.config.min_node_reliability {
            return false;
        }
        if node.average_latency_ms > self.config.max_node_latency_ms as f64 {
            return false;
        }
        node.load_score <= self.config.load_balance_threshold
    }

    fn eligible_nodes<'a>(
        &self,
        state: &'a DistributorState,
        now: DateTime<Utc>,
    ) -> Vec<&'a NodeRecord> {
        state
            .nodes
            .values()
            .filter(|node| self.is_node_available(node, now))
            .collect()
    }

    /// 预留资源并把任务移入运行集合，失败时把任务原样交还
    fn assign_task_to_node(
        &self,
        state: &mut DistributorState,
        mut task: Task,
        node_id: &str,
        strategy_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), (Task, FleetError)> {
        let Some(node) = state.nodes.get_mut(node_id) else {
            return Err((
                task,
                FleetError::NodeNotFound {
                    id: node_id.to_string(),
                },
            ));
        };

        if let Some(capacity) = node.capacity.as_mut() {
            if !capacity.reserve(&task.requirements) {
                return Err((
                    task,
                    FleetError::InsufficientResources {
                        node_id: node_id.to_string(),
                    },
                ));
            }
        }
        node.running_tasks += 1;

        task.status = TaskStatus::Scheduled;
        task.assigned_node_id = Some(node_id.to_string());
        task.start_time = Some(now);
        task.updated_at = now;
        task.metadata.insert(
            ASSIGNED_STRATEGY_KEY.to_string(),
            serde_json::Value::String(strategy_name.to_string()),
        );

        *state
            .metrics
            .strategy_usage
            .entry(strategy_name.to_string())
            .or_insert(0) += 1;
        self.metrics_collector.record_task_assigned(strategy_name);

        state.running.insert(task.id.clone(), task);
        Ok(())
    }

    /// 节点开始执行已分配的任务
    pub async fn mark_task_running(&self, task_id: &str) -> FleetResult<()> {
        let mut state = self.state.write().await;
        let task = state
            .running
            .get_mut(task_id)
            .ok_or_else(|| FleetError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        Ok(())
    }

    /// 任务执行成功，归还资源并移入已完成缓存
    pub async fn complete_task(&self, task_id: &str, result: serde_json::Value) -> FleetResult<()> {
        let mut state = self.state.write().await;
        let mut task = state
            .running
            .remove(task_id)
            .ok_or_else(|| FleetError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        state.release_reservation(&task);

        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.end_time = Some(now);
        task.updated_at = now;
        task.result = Some(result);

        let duration_ms = task.execution_duration_ms().unwrap_or_default();
        StructuredLogger::log_task_completed(
            &task.id,
            task.assigned_node_id.as_deref().unwrap_or_default(),
            duration_ms,
        );

        state.metrics.completed_tasks += 1;
        state.execution_time_total_ms += duration_ms as f64;
        state.metrics.average_execution_time_ms =
            state.execution_time_total_ms / state.metrics.completed_tasks as f64;
        state.record_strategy_outcome(&task, true);
        self.metrics_collector
            .record_task_completed(duration_ms as f64 / 1000.0);

        state.archive(task, self.config.completed_task_retention);
        Ok(())
    }

    /// 任务执行失败
    ///
    /// 归还资源；未超过最大重试次数时重新入队并等待重试间隔，否则标记为失败。
    /// 返回任务的新状态。
    pub async fn fail_task(&self, task_id: &str, error: &str) -> FleetResult<TaskStatus> {
        let mut state = self.state.write().await;
        let task = state
            .running
            .remove(task_id)
            .ok_or_else(|| FleetError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        Ok(self.handle_failure(&mut state, task, error, Utc::now()))
    }

    fn handle_failure(
        &self,
        state: &mut DistributorState,
        mut task: Task,
        error: &str,
        now: DateTime<Utc>,
    ) -> TaskStatus {
        state.release_reservation(&task);
        state.record_strategy_outcome(&task, false);
        StructuredLogger::log_task_failed(&task.id, task.assigned_node_id.as_deref(), error);

        task.last_error = Some(error.to_string());
        task.updated_at = now;

        if task.can_retry() {
            task.retry_count += 1;
            task.status = TaskStatus::Retrying;
            StructuredLogger::log_task_retry(&task.id, task.retry_count, task.max_retries, error);

            task.status = TaskStatus::Pending;
            task.assigned_node_id = None;
            task.start_time = None;
            task.not_before = Some(now + chrono_duration(self.config.retry_delay()));

            state.metrics.retry_tasks += 1;
            self.metrics_collector.record_task_retry();
            state.pending.push(task);
            sort_by_priority(&mut state.pending);
            TaskStatus::Pending
        } else {
            task.status = TaskStatus::Failed;
            task.end_time = Some(now);
            state.metrics.failed_tasks += 1;
            self.metrics_collector.record_task_failed();
            state.archive(task, self.config.completed_task_retention);
            TaskStatus::Failed
        }
    }

    /// 取消待分发任务，已分配的任务不能取消
    pub async fn cancel_task(&self, task_id: &str) -> FleetResult<()> {
        let mut state = self.state.write().await;
        let Some(position) = state.pending.iter().position(|t| t.id == task_id) else {
            if state.running.contains_key(task_id) {
                return Err(FleetError::Validation(format!(
                    "任务 {task_id} 已分配到节点，无法取消"
                )));
            }
            return Err(FleetError::TaskNotFound {
                id: task_id.to_string(),
            });
        };

        let mut task = state.pending.remove(position);
        let now = Utc::now();
        task.status = TaskStatus::Cancelled;
        task.end_time = Some(now);
        task.updated_at = now;
        StructuredLogger::log_task_cancelled(&task.id);

        state.metrics.cancelled_tasks += 1;
        state.archive(task, self.config.completed_task_retention);
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        let state = self.state.read().await;
        state
            .running
            .get(task_id)
            .or_else(|| state.completed.get(task_id))
            .or_else(|| state.pending.iter().find(|t| t.id == task_id))
            .cloned()
    }

    /// 按分发顺序返回待分发任务
    pub async fn pending_tasks(&self) -> Vec<Task> {
        self.state.read().await.pending.clone()
    }

    pub async fn running_tasks(&self) -> Vec<Task> {
        self.state.read().await.running.values().cloned().collect()
    }

    pub async fn completed_tasks(&self) -> Vec<Task> {
        self.state.read().await.completed.values().cloned().collect()
    }

    // ---------------------------------------------------------------
    // 节点管理
    // ---------------------------------------------------------------

    /// 注册或更新节点
    pub async fn register_node(&self, mut node: NodeRecord) -> FleetResult<()> {
        if node.node_id.trim().is_empty() {
            return Err(FleetError::Validation("节点ID不能为空".to_string()));
        }

        if let Some(capacity) = node.capacity.as_mut() {
            capacity.clamp_to_total();
        }

        let now = Utc::now();
        node.last_seen = now;
        node.last_health_check = Some(now);

        StructuredLogger::log_node_registered(&node.node_id, &node.status.to_string());
        self.state
            .write()
            .await
            .nodes
            .insert(node.node_id.clone(), node);
        Ok(())
    }

    /// 处理节点上报的资源指标
    pub async fn update_node_metrics(
        &self,
        node_id: &str,
        metrics: ResourceMetrics,
    ) -> FleetResult<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| FleetError::NodeNotFound {
                id: node_id.to_string(),
            })?;

        let previous = node.status;
        node.apply_metrics(&metrics, now);
        node.refresh_health(now, node_timeout(&self.config));
        if node.status != previous {
            StructuredLogger::log_node_status_changed(
                node_id,
                &previous.to_string(),
                &node.status.to_string(),
            );
        }

        state.node_metrics.insert(node_id.to_string(), metrics);
        Ok(())
    }

    /// 设置节点状态，用于下线维护
    pub async fn set_node_status(&self, node_id: &str, status: NodeStatus) -> FleetResult<()> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| FleetError::NodeNotFound {
                id: node_id.to_string(),
            })?;

        if node.status != status {
            StructuredLogger::log_node_status_changed(
                node_id,
                &node.status.to_string(),
                &status.to_string(),
            );
            node.status = status;
        }
        Ok(())
    }

    pub async fn get_node(&self, node_id: &str) -> Option<NodeRecord> {
        self.state.read().await.nodes.get(node_id).cloned()
    }

    pub async fn nodes(&self) -> Vec<NodeRecord> {
        self.state.read().await.nodes.values().cloned().collect()
    }

    pub async fn node_metrics(&self, node_id: &str) -> Option<ResourceMetrics> {
        self.state.read().await.node_metrics.get(node_id).cloned()
    }

    /// 当前可以接收任务的节点
    pub async fn available_nodes(&self) -> Vec<NodeRecord> {
        let state = self.state.read().await;
        let mut nodes: Vec<NodeRecord> = self
            .eligible_nodes(&state, Utc::now())
            .into_iter()
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    // ---------------------------------------------------------------
    // 后台周期
    // ---------------------------------------------------------------

    /// 重新计算节点与吞吐指标
    pub async fn update_metrics(&self) {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let loads: Vec<(f64, f64)> = self
            .eligible_nodes(&state, now)
            .iter()
            .map(|n| (n.load_score, n.average_latency_ms))
            .collect();

        let active_nodes = loads.len();
        let (average_load, average_latency, imbalance) = if loads.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let count = loads.len() as f64;
            let total_load: f64 = loads.iter().map(|(l, _)| l).sum();
            let total_latency: f64 = loads.iter().map(|(_, ms)| ms).sum();
            let max = loads.iter().map(|(l, _)| *l).fold(f64::MIN, f64::max);
            let min = loads.iter().map(|(l, _)| *l).fold(f64::MAX, f64::min);
            (total_load / count, total_latency / count, max - min)
        };

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let completed = state.metrics.completed_tasks;
        let failed = state.metrics.failed_tasks;

        let strategy_success: HashMap<String, f64> = state
            .strategy_outcomes
            .iter()
            .filter(|(_, o)| o.succeeded + o.failed > 0)
            .map(|(name, o)| {
                (
                    name.clone(),
                    o.succeeded as f64 / (o.succeeded + o.failed) as f64,
                )
            })
            .collect();

        let pending = state.pending.len();
        let running = state.running.len();

        let metrics = &mut state.metrics;
        metrics.active_nodes = active_nodes;
        metrics.average_node_load = average_load;
        metrics.average_latency_ms = average_latency;
        metrics.load_imbalance = imbalance;
        metrics.task_throughput = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };
        metrics.success_rate = if completed + failed > 0 {
            completed as f64 / (completed + failed) as f64
        } else {
            0.0
        };
        metrics.strategy_success = strategy_success;
        metrics.pending_tasks = pending;
        metrics.running_tasks = running;
        metrics.last_updated = Some(now);

        self.metrics_collector
            .update_node_stats(active_nodes, average_load);
        self.metrics_collector.update_queue_depth(pending, running);
    }

    /// 清理过期数据: 已完成缓存、超时的运行中任务、长时间未上报的节点
    pub async fn perform_cleanup(&self) {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let evicted = trim_completed(&mut state.completed, self.config.completed_task_retention);
        if evicted > 0 {
            debug!("从已完成缓存中淘汰了 {} 个任务", evicted);
        }

        let timed_out: Vec<String> = state
            .running
            .values()
            .filter(|task| {
                let timeout = task
                    .timeout_seconds
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.config.task_timeout());
                task.start_time
                    .is_some_and(|start| now - start > chrono_duration(timeout))
            })
            .map(|task| task.id.clone())
            .collect();

        for task_id in timed_out {
            if let Some(task) = state.running.remove(&task_id) {
                warn!("任务 {} 执行超时", task_id);
                self.handle_failure(&mut state, task, "任务执行超时", now);
            }
        }

        let timeout = node_timeout(&self.config);
        let stale: Vec<(String, i64)> = state
            .nodes
            .values()
            .filter(|node| node.is_stale(now, timeout))
            .map(|node| (node.node_id.clone(), (now - node.last_seen).num_seconds()))
            .collect();

        for (node_id, unseen_seconds) in stale {
            state.nodes.remove(&node_id);
            state.node_metrics.remove(&node_id);
            StructuredLogger::log_node_purged(&node_id, unseen_seconds);
        }
    }

    /// 节点健康检查，返回不健康节点数
    pub async fn check_node_health(&self) -> usize {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let timeout = node_timeout(&self.config);

        let mut unhealthy = 0;
        for node in state.nodes.values_mut() {
            if node.is_stale(now, timeout)
                && node.status != NodeStatus::Unavailable
                && !node.status.is_administrative()
            {
                StructuredLogger::log_node_status_changed(
                    &node.node_id,
                    &node.status.to_string(),
                    &NodeStatus::Unavailable.to_string(),
                );
                node.status = NodeStatus::Unavailable;
            }

            node.refresh_health(now, timeout);
            if !node.is_healthy() {
                unhealthy += 1;
            }
        }

        if unhealthy > self.config.max_unhealthy_nodes {
            warn!(
                "不健康节点数 {} 超过阈值 {}",
                unhealthy, self.config.max_unhealthy_nodes
            );
        }
        unhealthy
    }

    pub async fn get_metrics(&self) -> DistributionMetrics {
        let state = self.state.read().await;
        let mut metrics = state.metrics.clone();
        metrics.pending_tasks = state.pending.len();
        metrics.running_tasks = state.running.len();
        metrics
    }

    /// 启动分发、指标、清理和健康检查四个后台周期
    pub async fn start(self: &Arc<Self>) {
        info!("启动任务分发器");

        let handles = vec![
            self.spawn_cycle(
                "distribution",
                self.config.distribution_interval(),
                |distributor| async move {
                    if let Err(e) = distributor.distribute_tasks().await {
                        StructuredLogger::log_system_error("distributor", "distribute_tasks", &e);
                    }
                },
            )
            .await,
            self.spawn_cycle(
                "metrics",
                self.config.metrics_update_interval(),
                |distributor| async move { distributor.update_metrics().await },
            )
            .await,
            self.spawn_cycle(
                "cleanup",
                self.config.cleanup_interval(),
                |distributor| async move { distributor.perform_cleanup().await },
            )
            .await,
            self.spawn_cycle(
                "health",
                self.config.health_check_interval(),
                |distributor| async move {
                    distributor.check_node_health().await;
                },
            )
            .await,
        ];

        self.workers.lock().await.extend(handles);
    }

    async fn spawn_cycle<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        cycle: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let distributor = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 第一次 tick 立即返回
            interval.tick().await;
            debug!("{} 周期已启动，间隔 {:?}", name, period);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("{} 周期收到关闭信号", name);
                        break;
                    }
                    _ = interval.tick() => {
                        cycle(Arc::clone(&distributor)).await;
                    }
                }
            }
        })
    }

    /// 停止所有后台周期并等待其退出
    pub async fn close(&self) {
        info!("关闭任务分发器");
        self.shutdown.trigger();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台周期退出异常: {}", e);
            }
        }
    }
}

fn validate_task(task: &Task) -> FleetResult<()> {
    if task.id.trim().is_empty() {
        return Err(FleetError::Validation("任务ID不能为空".to_string()));
    }
    if task.name.trim().is_empty() {
        return Err(FleetError::Validation("任务名称不能为空".to_string()));
    }
    if task.task_type.trim().is_empty() {
        return Err(FleetError::Validation("任务类型不能为空".to_string()));
    }
    Ok(())
}

/// 没有容量信息的节点视为资源充足
fn has_available_resources(node: &NodeRecord, task: &Task) -> bool {
    node.capacity
        .as_ref()
        .is_none_or(|capacity| capacity.can_satisfy(&task.requirements))
}

fn node_timeout(config: &DistributorConfig) -> chrono::Duration {
    chrono_duration(config.node_timeout())
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::{NodeCapacity, TaskPriority};

    fn test_config() -> DistributorConfig {
        DistributorConfig {
            retry_delay_seconds: 0,
            ..DistributorConfig::default()
        }
    }

    fn task(id: &str, priority: TaskPriority) -> Task {
        let mut task = Task::new(id, format!("task-{id}"), "inference");
        task.priority = priority;
        task
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_tasks() {
        let distributor = TaskDistributor::new(test_config());

        let result = distributor.submit_task(Task::new("", "name", "type")).await;
        assert!(matches!(result, Err(FleetError::Validation(_))));

        let result = distributor.submit_task(Task::new("t1", "", "type")).await;
        assert!(matches!(result, Err(FleetError::Validation(_))));

        let result = distributor.submit_task(Task::new("t1", "name", "")).await;
        assert!(matches!(result, Err(FleetError::Validation(_))));

        assert!(distributor.pending_tasks().await.is_empty());
        assert_eq!(distributor.get_metrics().await.total_tasks, 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicate_ids() {
        let distributor = TaskDistributor::new(test_config());
        distributor
            .submit_task(task("t1", TaskPriority::Normal))
            .await
            .unwrap();

        let result = distributor.submit_task(task("t1", TaskPriority::High)).await;
        assert!(matches!(result, Err(FleetError::DuplicateTask { .. })));
    }

    #[tokio::test]
    async fn test_no_strategies_is_configuration_error() {
        let distributor = TaskDistributor::with_strategies(test_config(), HashMap::new());
        distributor
            .submit_task(task("t1", TaskPriority::Normal))
            .await
            .unwrap();

        let result = distributor.distribute_tasks().await;
        let err = result.unwrap_err();
        assert!(matches!(err, FleetError::NoStrategies));
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_unplaceable_task_stays_pending() {
        let distributor = TaskDistributor::new(test_config());
        distributor
            .submit_task(task("t1", TaskPriority::Normal))
            .await
            .unwrap();

        let assigned = distributor.distribute_tasks().await.unwrap();
        assert_eq!(assigned, 0);
        assert_eq!(distributor.pending_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_task_requeues_then_fails() {
        let distributor = TaskDistributor::new(test_config());
        distributor
            .register_node(NodeRecord::new("node-1"))
            .await
            .unwrap();

        let mut t = task("t1", TaskPriority::Normal);
        t.max_retries = 1;
        distributor.submit_task(t).await.unwrap();

        distributor.distribute_tasks().await.unwrap();
        let status = distributor.fail_task("t1", "boom").await.unwrap();
        assert_eq!(status, TaskStatus::Pending);

        let requeued = distributor.get_task("t1").await.unwrap();
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.last_error.as_deref(), Some("boom"));

        distributor.distribute_tasks().await.unwrap();
        let status = distributor.fail_task("t1", "boom again").await.unwrap();
        assert_eq!(status, TaskStatus::Failed);

        let failed = distributor.get_task("t1").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("boom again"));

        let metrics = distributor.get_metrics().await;
        assert_eq!(metrics.retry_tasks, 1);
        assert_eq!(metrics.failed_tasks, 1);
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let distributor = TaskDistributor::new(test_config());
        distributor
            .register_node(NodeRecord::new("node-1"))
            .await
            .unwrap();
        distributor
            .submit_task(task("t1", TaskPriority::Normal))
            .await
            .unwrap();
        distributor.distribute_tasks().await.unwrap();
        distributor
            .submit_task(task("t2", TaskPriority::Normal))
            .await
            .unwrap();

        assert!(matches!(
            distributor.cancel_task("t1").await,
            Err(FleetError::Validation(_))
        ));
        distributor.cancel_task("t2").await.unwrap();
        assert_eq!(
            distributor.get_task("t2").await.unwrap().status,
            TaskStatus::Cancelled
        );
        assert!(matches!(
            distributor.cancel_task("missing").await,
            Err(FleetError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_metrics_for_unknown_node() {
        let distributor = TaskDistributor::new(test_config());
        let result = distributor
            .update_node_metrics("ghost", ResourceMetrics::new("ghost", 10.0, 10.0, 10.0))
            .await;
        assert!(matches!(result, Err(FleetError::NodeNotFound { .. })));
    }

    #[tokio::test]
    async fn test_strategy_hint_overrides_default() {
        let distributor = TaskDistributor::new(test_config());
        let mut low_latency = NodeRecord::new("near");
        low_latency.average_latency_ms = 1.0;
        low_latency.load_score = 0.7;
        let mut idle = NodeRecord::new("idle");
        idle.average_latency_ms = 90.0;
        idle.load_score = 0.0;
        distributor.register_node(low_latency).await.unwrap();
        distributor.register_node(idle).await.unwrap();

        let mut t = task("t1", TaskPriority::Normal);
        t.metadata
            .insert("strategy".to_string(), serde_json::json!("latency_based"));
        distributor.submit_task(t).await.unwrap();
        distributor.distribute_tasks().await.unwrap();

        let assigned = distributor.get_task("t1").await.unwrap();
        assert_eq!(assigned.assigned_node_id.as_deref(), Some("near"));
        assert_eq!(
            distributor.get_metrics().await.strategy_usage.get("latency_based"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_required_features_filter() {
        let distributor = TaskDistributor::new(test_config());
        distributor
            .register_node(NodeRecord::new("cpu-only").with_capacity(NodeCapacity::new(
                8.0,
                1 << 34,
                1 << 36,
            )))
            .await
            .unwrap();
        distributor
            .register_node(
                NodeRecord::new("cuda").with_capacity(
                    NodeCapacity::new(8.0, 1 << 34, 1 << 36).with_features(&["cuda"]),
                ),
            )
            .await
            .unwrap();

        let mut t = task("t1", TaskPriority::Normal);
        t.requirements.required_features = vec!["cuda".to_string()];
        distributor.submit_task(t).await.unwrap();
        distributor.distribute_tasks().await.unwrap();

        let assigned = distributor.get_task("t1").await.unwrap();
        assert_eq!(assigned.assigned_node_id.as_deref(), Some("cuda"));
    }

    #[test]
    fn test_trim_completed_keeps_newest() {
        let base = Utc::now();
        let mut completed = HashMap::new();
        for i in 0..5 {
            let mut t = Task::new(format!("t{i}"), "task", "inference");
            t.end_time = Some(base + chrono::Duration::seconds(i));
            completed.insert(t.id.clone(), t);
        }

        let evicted = trim_completed(&mut completed, 3);
        assert_eq!(evicted, 2);
        assert!(!completed.contains_key("t0"));
        assert!(!completed.contains_key("t1"));
        assert!(completed.contains_key("t4"));
    }
}
