use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use fleet_core::{
    FleetError, FleetResult, MetricsCollector, OrchestrationConfig, ShutdownSignal,
    StructuredLogger,
};
use fleet_domain::{
    AggregatedResponse, AggregationContext, OrchestrationMetrics, OrchestrationRequest,
    OrchestrationStatus, OrchestrationTask, PartialResult, PartitionPlan, TaskEvent,
};

use crate::aggregation::{
    AggregationStrategy, AverageAggregation, ConcatAggregation, WeightedAggregation,
};
use crate::cluster::ClusterView;
use crate::coordinator::{Coordinator, InMemorySessionPersistence, RoutingRule, SessionPersistence};
use crate::executor::PartitionExecutor;
use crate::monitor::{apply_monitor_values, ClusterLoadMonitor, Monitor};
use crate::partitioning::{
    strategy_for_request_type, CapabilityBasedPartitioning, LoadBasedPartitioning,
    PartitioningStrategy, RoundRobinPartitioning,
};

const PREFERRED_NODE_KEY: &str = "preferred_node";
const SESSION_ID_KEY: &str = "session_id";
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct EngineState {
    active: HashMap<String, OrchestrationTask>,
    finished: HashMap<String, OrchestrationTask>,
    finished_order: VecDeque<String>,
    metrics: OrchestrationMetrics,
}

impl EngineState {
    fn archive(&mut self, task: OrchestrationTask, retention: usize) {
        self.finished_order.push_back(task.id.clone());
        self.finished.insert(task.id.clone(), task);
        while self.finished_order.len() > retention {
            if let Some(id) = self.finished_order.pop_front() {
                self.finished.remove(&id);
            }
        }
    }
}

/// 编排引擎
///
/// 把一个请求拆成分片，分发到执行通道，聚合分片结果。每个任务由单独的生命周期
/// 协程推进，同时运行的生命周期数量受信号量限制。
pub struct OrchestrationEngine {
    config: OrchestrationConfig,
    cluster: Arc<dyn ClusterView>,
    executor: Arc<dyn PartitionExecutor>,
    partitioners: RwLock<HashMap<String, Arc<dyn PartitioningStrategy>>>,
    aggregators: RwLock<HashMap<String, Arc<dyn AggregationStrategy>>>,
    monitors: RwLock<Vec<Arc<dyn Monitor>>>,
    coordinator: Coordinator,

    state: Mutex<EngineState>,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<TaskEvent>,
    active_count: watch::Sender<usize>,
    request_tx: mpsc::Sender<OrchestrationRequest>,
    request_rx: Mutex<Option<mpsc::Receiver<OrchestrationRequest>>>,

    metrics_collector: MetricsCollector,
    shutdown: ShutdownSignal,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    started_at: Instant,
}

impl OrchestrationEngine {
    /// 创建引擎并注册内置的分区、聚合策略和集群负载监控
    pub fn new(
        config: OrchestrationConfig,
        cluster: Arc<dyn ClusterView>,
        executor: Arc<dyn PartitionExecutor>,
    ) -> Self {
        let partitioners: Vec<Arc<dyn PartitioningStrategy>> = vec![
            Arc::new(RoundRobinPartitioning::new(config.round_robin_slots)),
            Arc::new(LoadBasedPartitioning::new(config.load_partition_factor)),
            Arc::new(CapabilityBasedPartitioning),
        ];
        let aggregators: Vec<Arc<dyn AggregationStrategy>> = vec![
            Arc::new(ConcatAggregation),
            Arc::new(AverageAggregation),
            Arc::new(WeightedAggregation),
        ];
        let monitors: Vec<Arc<dyn Monitor>> =
            vec![Arc::new(ClusterLoadMonitor::new(Arc::clone(&cluster)))];

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (active_count, _) = watch::channel(0);
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity.max(1));
        let persistence: Arc<dyn SessionPersistence> = Arc::new(InMemorySessionPersistence::new());

        Self {
            coordinator: Coordinator::new(&config.coordination_mode, persistence),
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            partitioners: RwLock::new(
                partitioners
                    .into_iter()
                    .map(|s| (s.name().to_string(), s))
                    .collect(),
            ),
            aggregators: RwLock::new(
                aggregators
                    .into_iter()
                    .map(|s| (s.name().to_string(), s))
                    .collect(),
            ),
            monitors: RwLock::new(monitors),
            config,
            cluster,
            executor,
            state: Mutex::new(EngineState::default()),
            events,
            active_count,
            request_tx,
            request_rx: Mutex::new(Some(request_rx)),
            metrics_collector: MetricsCollector::new(),
            shutdown: ShutdownSignal::new("编排引擎"),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// 替换会话持久化后端
    pub fn with_session_persistence(mut self, persistence: Arc<dyn SessionPersistence>) -> Self {
        self.coordinator = Coordinator::new(&self.config.coordination_mode, persistence);
        self
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn register_partitioning(&self, strategy: Arc<dyn PartitioningStrategy>) {
        info!("注册分区策略: {}", strategy.name());
        self.partitioners
            .write()
            .await
            .insert(strategy.name().to_string(), strategy);
    }

    pub async fn register_aggregation(&self, strategy: Arc<dyn AggregationStrategy>) {
        info!("注册聚合策略: {}", strategy.name());
        self.aggregators
            .write()
            .await
            .insert(strategy.name().to_string(), strategy);
    }

    pub async fn add_monitor(&self, monitor: Arc<dyn Monitor>) {
        self.monitors.write().await.push(monitor);
    }

    pub async fn add_routing_rule(&self, rule: RoutingRule) {
        self.coordinator.router.add_rule(rule).await;
    }

    // ---------------------------------------------------------------
    // 入口
    // ---------------------------------------------------------------

    /// 把负载包装成分布式推理请求并开始编排，立即返回任务ID
    pub async fn execute_task(self: &Arc<Self>, payload: Value) -> FleetResult<String> {
        let mut request = OrchestrationRequest::new("distributed_inference", payload);
        request.priority = 1;
        request.timeout_seconds = Some(self.config.task_timeout_seconds);
        self.execute_request(request).await
    }

    /// 路由请求，登记任务，启动它的生命周期协程
    pub async fn execute_request(
        self: &Arc<Self>,
        request: OrchestrationRequest,
    ) -> FleetResult<String> {
        if self.shutdown.is_triggered() {
            return Err(FleetError::ShuttingDown);
        }

        let decision = self.coordinator.router.route(&request).await?;

        let mut task = OrchestrationTask::new(request);
        task.metadata.extend(decision.tags);
        if let Some(node_id) = decision.preferred_node {
            task.metadata
                .insert(PREFERRED_NODE_KEY.to_string(), json!(node_id));
        }

        if let Some(session_id) = session_id(&task) {
            if let Err(e) = self
                .coordinator
                .sessions
                .record_request(&session_id, &task.request.id)
                .await
            {
                warn!("记录会话 {} 的请求失败: {}", session_id, e);
            }
        }

        let task_id = task.id.clone();
        {
            let mut state = self.state.lock().await;
            state.active.insert(task_id.clone(), task.clone());
            state.metrics.total_tasks += 1;
            state.metrics.active_tasks = state.active.len() as u64;
            self.active_count.send_replace(state.active.len());
        }
        self.metrics_collector.record_orchestration_started();
        info!(
            "开始编排任务 {} (请求: {}, 类型: {})",
            task_id, task.request.id, task.task_type
        );
        self.publish(&task, None);

        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_lifecycle(task).await });

        Ok(task_id)
    }

    /// 请求放入摄取队列，由摄取协程调用 `execute_request`
    pub async fn submit_request(&self, request: OrchestrationRequest) -> FleetResult<()> {
        if self.shutdown.is_triggered() {
            return Err(FleetError::ShuttingDown);
        }

        self.request_tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => FleetError::Internal("请求队列已满".to_string()),
            TrySendError::Closed(_) => FleetError::ShuttingDown,
        })
    }

    // ---------------------------------------------------------------
    // 生命周期
    // ---------------------------------------------------------------

    async fn run_lifecycle(self: Arc<Self>, mut task: OrchestrationTask) {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                task.last_error = Some("编排引擎已关闭".to_string());
                task.completed_at = Some(Utc::now());
                self.transition(&mut task, OrchestrationStatus::Failed).await;
                self.finish(task).await;
                return;
            }
        };

        loop {
            let status = task.status;
            match status {
                OrchestrationStatus::Pending => {
                    let outcome = self.partition_task(&task).await;
                    match outcome {
                        Ok(plan) => {
                            debug!(
                                "任务 {} 使用 {} 分区，共 {} 个分片",
                                task.id,
                                plan.strategy,
                                plan.partitions.len()
                            );
                            task.partition_plan = Some(plan);
                            self.transition(&mut task, OrchestrationStatus::Partitioned)
                                .await;
                        }
                        Err(e) => self.handle_step_failure(&mut task, e).await,
                    }
                }
                OrchestrationStatus::Partitioned => {
                    self.transition(&mut task, OrchestrationStatus::Executing)
                        .await;
                }
                OrchestrationStatus::Executing => {
                    let outcome = self.execute_partitions(&mut task).await;
                    match outcome {
                        Ok(()) => {
                            self.transition(&mut task, OrchestrationStatus::Aggregating)
                                .await;
                        }
                        Err(e) => self.handle_step_failure(&mut task, e).await,
                    }
                }
                OrchestrationStatus::Aggregating => {
                    let outcome = self.aggregate(&task).await;
                    match outcome {
                        Ok(response) => {
                            task.aggregated_result = Some(response);
                            task.completed_at = Some(Utc::now());
                            self.transition(&mut task, OrchestrationStatus::Completed)
                                .await;
                        }
                        Err(e) => self.handle_step_failure(&mut task, e).await,
                    }
                }
                OrchestrationStatus::Retrying => {
                    let delay = self
                        .config
                        .retry_policy
                        .as_ref()
                        .map(|p| p.delay_for(task.retry_count))
                        .unwrap_or_default();
                    debug!("任务 {} 将在 {:?} 后重试", task.id, delay);
                    tokio::time::sleep(delay).await;

                    task.reset_for_retry();
                    self.transition(&mut task, OrchestrationStatus::Pending)
                        .await;
                }
                OrchestrationStatus::Completed | OrchestrationStatus::Failed => {
                    self.finish(task).await;
                    return;
                }
            }
        }
    }

    async fn partition_task(&self, task: &OrchestrationTask) -> FleetResult<PartitionPlan> {
        let name = task
            .request
            .option_str("partitioning")
            .unwrap_or_else(|| strategy_for_request_type(&task.request.request_type))
            .to_string();
        let strategy = self
            .partitioners
            .read()
            .await
            .get(&name)
            .cloned()
            .ok_or(FleetError::StrategyNotFound { name })?;

        let mut nodes = self.cluster.nodes().await;
        if let Some(preferred) = task.metadata.get(PREFERRED_NODE_KEY).and_then(|v| v.as_str()) {
            if nodes.iter().any(|n| n.node_id == preferred) {
                nodes.retain(|n| n.node_id == preferred);
            } else {
                debug!("首选节点 {} 不在集群中，使用全部节点", preferred);
            }
        }

        strategy.partition(&task.request, &nodes)
    }

    /// 并发执行全部分片，最后一个分片上报时屏障释放
    async fn execute_partitions(&self, task: &mut OrchestrationTask) -> FleetResult<()> {
        let plan = task
            .partition_plan
            .clone()
            .ok_or_else(|| FleetError::Internal(format!("任务 {} 缺少分区计划", task.id)))?;
        let timeout = task
            .request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.task_timeout());

        let synchronizer = &self.coordinator.synchronizer;
        synchronizer
            .create_barrier(&task.id, plan.partitions.iter().map(|p| p.id.clone()))
            .await;

        let mut join_set = JoinSet::new();
        let mut dispatched = HashMap::new();
        for partition in plan.partitions {
            let executor = Arc::clone(&self.executor);
            let unit = partition.clone();
            let handle = join_set.spawn(async move {
                match tokio::time::timeout(timeout, executor.execute(&unit)).await {
                    Ok(Ok(data)) => PartialResult::success(&unit, data),
                    Ok(Err(e)) => PartialResult::failure(&unit, e.to_string()),
                    Err(_) => PartialResult::failure(&unit, format!("分片执行超时 ({timeout:?})")),
                }
            });
            dispatched.insert(handle.id(), partition);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    dispatched.remove(&id);
                    result
                }
                Err(e) => match dispatched.remove(&e.id()) {
                    Some(partition) => {
                        PartialResult::failure(&partition, format!("分片执行异常: {e}"))
                    }
                    None => {
                        error!("无法识别的分片执行异常: {}", e);
                        continue;
                    }
                },
            };

            self.metrics_collector
                .record_partition_executed(!result.is_error());
            let released = match synchronizer.arrive(&task.id, &result.partition_id).await {
                Ok(released) => released,
                Err(e) => {
                    warn!("分片 {} 上报失败: {}", result.partition_id, e);
                    false
                }
            };
            task.partial_results.push(result);
            self.update_snapshot(task).await;

            if released {
                break;
            }
        }
        synchronizer.remove_barrier(&task.id).await;

        if !task.all_partitions_reported() {
            return Err(FleetError::Execution(format!(
                "任务 {} 仅收到 {} 个分片结果，缺少部分分片",
                task.id,
                task.partial_results.len()
            )));
        }

        let total = task.partial_results.len();
        let failures: Vec<&PartialResult> =
            task.partial_results.iter().filter(|r| r.is_error()).collect();
        if failures.is_empty() {
            return Ok(());
        }

        if self.config.tolerate_partial_failures && failures.len() < total {
            warn!(
                "任务 {} 有 {}/{} 个分片失败，继续聚合",
                task.id,
                failures.len(),
                total
            );
            return Ok(());
        }

        Err(FleetError::Execution(format!(
            "{}/{} 个分片执行失败: {}",
            failures.len(),
            total,
            failures[0].error.as_deref().unwrap_or_default()
        )))
    }

    async fn aggregate(&self, task: &OrchestrationTask) -> FleetResult<AggregatedResponse> {
        let name = task
            .request
            .option_str("aggregation")
            .unwrap_or(self.config.default_aggregation.as_str())
            .to_string();
        let strategy = self
            .aggregators
            .read()
            .await
            .get(&name)
            .cloned()
            .ok_or_else(|| FleetError::StrategyNotFound { name: name.clone() })?;

        let mut context = AggregationContext::new(&task.id, name, task.partial_results.clone());
        context.created_at = task.started_at;
        if let Some(plan) = &task.partition_plan {
            context
                .metadata
                .insert("partition_strategy".to_string(), json!(plan.strategy));
        }
        strategy.aggregate(&context)
    }

    async fn handle_step_failure(&self, task: &mut OrchestrationTask, err: FleetError) {
        let message = err.to_string();
        task.last_error = Some(message.clone());

        match &self.config.retry_policy {
            Some(policy) if policy.should_retry(task.retry_count) => {
                task.retry_count += 1;
                StructuredLogger::log_task_retry(
                    &task.id,
                    task.retry_count,
                    policy.max_retries,
                    &message,
                );
                self.metrics_collector.record_orchestration_retry();
                self.state.lock().await.metrics.retried_tasks += 1;
                self.transition(task, OrchestrationStatus::Retrying).await;
            }
            _ => {
                task.completed_at = Some(Utc::now());
                self.transition(task, OrchestrationStatus::Failed).await;
            }
        }
    }

    async fn transition(&self, task: &mut OrchestrationTask, to: OrchestrationStatus) {
        let from = task.status;
        task.status = to;
        StructuredLogger::log_orchestration_transition(
            &task.id,
            &from.to_string(),
            &to.to_string(),
        );
        self.update_snapshot(task).await;
        self.publish(task, Some(from));
    }

    async fn update_snapshot(&self, task: &OrchestrationTask) {
        let mut state = self.state.lock().await;
        if let Some(snapshot) = state.active.get_mut(&task.id) {
            *snapshot = task.clone();
        }
    }

    fn publish(&self, task: &OrchestrationTask, from: Option<OrchestrationStatus>) {
        let event = TaskEvent {
            task_id: task.id.clone(),
            from,
            to: task.status,
            retry_count: task.retry_count,
            error: task.last_error.clone(),
            timestamp: Utc::now(),
        };
        // 没有订阅者时发送失败
        let _ = self.events.send(event);
    }

    /// 任务进入终态：移入历史，更新指标和会话
    async fn finish(&self, task: OrchestrationTask) {
        let success = task.status == OrchestrationStatus::Completed;
        let latency_ms = task.elapsed_ms().max(0) as u64;
        let partitions = task
            .partition_plan
            .as_ref()
            .map(|p| p.partitions.len())
            .unwrap_or_default();

        if let Some(plan) = &task.partition_plan {
            self.coordinator
                .optimizer
                .record(&plan.strategy, partitions, success, latency_ms)
                .await;
        }

        if success {
            StructuredLogger::log_orchestration_completed(&task.id, partitions, latency_ms as i64);
            self.metrics_collector
                .record_orchestration_completed(latency_ms as f64 / 1000.0);
            if let (Some(session_id), Some(response)) = (session_id(&task), &task.aggregated_result) {
                if let Err(e) = self
                    .coordinator
                    .sessions
                    .record_response(&session_id, response)
                    .await
                {
                    warn!("记录会话 {} 的响应失败: {}", session_id, e);
                }
            }
        } else {
            StructuredLogger::log_orchestration_failed(
                &task.id,
                task.retry_count,
                task.last_error.as_deref().unwrap_or_default(),
            );
            self.metrics_collector.record_orchestration_failed();
        }

        let mut state = self.state.lock().await;
        state.active.remove(&task.id);
        if success {
            state.metrics.record_completion(latency_ms as f64);
        } else {
            state.metrics.record_failure();
        }
        state.metrics.active_tasks = state.active.len() as u64;
        state.archive(task, self.config.finished_task_retention);
        self.active_count.send_replace(state.active.len());
    }

    // ---------------------------------------------------------------
    // 查询
    // ---------------------------------------------------------------

    /// 先查活跃任务，再查已结束任务历史
    pub async fn get_task(&self, task_id: &str) -> Option<OrchestrationTask> {
        let state = self.state.lock().await;
        state
            .active
            .get(task_id)
            .or_else(|| state.finished.get(task_id))
            .cloned()
    }

    pub async fn get_active_tasks(&self) -> Vec<OrchestrationTask> {
        self.state.lock().await.active.values().cloned().collect()
    }

    pub async fn get_metrics(&self) -> OrchestrationMetrics {
        let state = self.state.lock().await;
        let mut metrics = state.metrics.clone();
        metrics.active_tasks = state.active.len() as u64;
        metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// 执行一轮监控：按运行时长计算吞吐，再应用各监控器采集的值
    pub async fn collect_metrics(&self) {
        let monitors = self.monitors.read().await.clone();
        let results = join_all(monitors.iter().map(|m| m.collect())).await;

        let mut collected = HashMap::new();
        for (monitor, result) in monitors.iter().zip(results) {
            match result {
                Ok(values) => collected.extend(values),
                Err(e) => StructuredLogger::log_system_error("orchestrator", monitor.name(), &e),
            }
        }

        let strategy_stats = self.coordinator.optimizer.strategy_stats().await;

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let mut state = self.state.lock().await;
        if elapsed > 0.0 {
            state.metrics.throughput = state.metrics.completed_tasks as f64 / elapsed;
        }
        apply_monitor_values(&mut state.metrics, &collected);
        for (strategy, stats) in strategy_stats {
            state
                .metrics
                .strategy_success
                .insert(strategy.clone(), stats.success_rate);
            state.metrics.strategy_usage.insert(strategy, stats.usage);
        }
        state.metrics.last_updated = Some(Utc::now());
    }

    // ---------------------------------------------------------------
    // 启停
    // ---------------------------------------------------------------

    /// 启动监控协程和请求摄取协程
    pub async fn start(self: &Arc<Self>) -> FleetResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FleetError::Internal("编排引擎已经启动".to_string()));
        }
        let mut request_rx = self
            .request_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| FleetError::Internal("请求队列接收端不可用".to_string()))?;

        info!(
            "启动编排引擎 (协调模式: {}, 最大并发: {})",
            self.coordinator.mode, self.config.max_concurrent_tasks
        );

        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = self.config.monitor_interval();
        let monitor = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("监控协程收到关闭信号");
                        break;
                    }
                    _ = interval.tick() => engine.collect_metrics().await,
                }
            }
        });

        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let ingestion = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("请求摄取协程收到关闭信号");
                        break;
                    }
                    received = request_rx.recv() => {
                        let Some(request) = received else { break };
                        let request_id = request.id.clone();
                        if let Err(e) = engine.execute_request(request).await {
                            warn!("请求 {} 未能进入编排: {}", request_id, e);
                        }
                    }
                }
            }
        });

        self.workers.lock().await.extend([monitor, ingestion]);
        Ok(())
    }

    /// 停止后台协程，在超时时间内等待活跃任务结束，返回仍未结束的任务数
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        info!("关闭编排引擎");
        self.shutdown.trigger();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台协程退出异常: {}", e);
            }
        }

        let mut active_rx = self.active_count.subscribe();
        let drained = tokio::time::timeout(timeout, async move {
            active_rx.wait_for(|count| *count == 0).await.is_ok()
        })
        .await
        .unwrap_or(false);

        let remaining = self.state.lock().await.active.len();
        if drained {
            info!("所有编排任务已结束");
        } else {
            warn!("等待超时，仍有 {} 个编排任务未结束", remaining);
        }
        remaining
    }
}

fn session_id(task: &OrchestrationTask) -> Option<String> {
    task.request
        .metadata
        .get(SESSION_ID_KEY)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
