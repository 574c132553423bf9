//! 请求协调：路由规则、分片同步屏障、会话状态和分区优化历史

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use fleet_core::{FleetError, FleetResult};
use fleet_domain::{AggregatedResponse, OrchestrationRequest};

// ---------------------------------------------------------------
// 路由
// ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCondition {
    Any,
    RequestType(String),
}

impl RouteCondition {
    /// 解析 `*` 或 `type == X`
    pub fn parse(expr: &str) -> FleetResult<Self> {
        let expr = expr.trim();
        if expr == "*" {
            return Ok(RouteCondition::Any);
        }

        match expr.split_once("==") {
            Some((field, value)) if field.trim() == "type" && !value.trim().is_empty() => {
                Ok(RouteCondition::RequestType(value.trim().to_string()))
            }
            _ => Err(FleetError::Validation(format!("无法解析路由条件: {expr}"))),
        }
    }

    pub fn matches(&self, request: &OrchestrationRequest) -> bool {
        match self {
            RouteCondition::Any => true,
            RouteCondition::RequestType(t) => request.request_type == *t,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteAction {
    PreferNode(String),
    Reject(String),
    Tag { key: String, value: serde_json::Value },
}

#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub id: String,
    /// 数值越大越先匹配
    pub priority: i32,
    pub condition: RouteCondition,
    pub action: RouteAction,
}

impl RoutingRule {
    pub fn new(id: &str, priority: i32, condition: &str, action: RouteAction) -> FleetResult<Self> {
        Ok(Self {
            id: id.to_string(),
            priority,
            condition: RouteCondition::parse(condition)?,
            action,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingDecision {
    pub preferred_node: Option<String>,
    pub tags: HashMap<String, serde_json::Value>,
    pub matched_rules: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub total_requests: u64,
    pub successful_routes: u64,
    pub failed_routes: u64,
    /// 至少命中一条规则的请求占比
    pub rule_hit_rate: f64,
    pub fallback_usage: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct RequestRouter {
    rules: RwLock<Vec<RoutingRule>>,
    metrics: RwLock<RoutingMetrics>,
    rule_hits: RwLock<u64>,
}

impl RequestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_rule(&self, rule: RoutingRule) {
        info!("添加路由规则: {} (优先级: {})", rule.id, rule.priority);
        let mut rules = self.rules.write().await;
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub async fn remove_rule(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// 按优先级应用所有匹配规则，命中拒绝规则时返回错误
    pub async fn route(&self, request: &OrchestrationRequest) -> FleetResult<RoutingDecision> {
        let rules = self.rules.read().await;
        let mut decision = RoutingDecision::default();
        let mut rejection = None;

        for rule in rules.iter().filter(|r| r.condition.matches(request)) {
            decision.matched_rules.push(rule.id.clone());
            match &rule.action {
                RouteAction::PreferNode(node) => {
                    if decision.preferred_node.is_none() {
                        decision.preferred_node = Some(node.clone());
                    }
                }
                RouteAction::Tag { key, value } => {
                    decision
                        .tags
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                RouteAction::Reject(reason) => {
                    rejection = Some(format!("请求被路由规则 {} 拒绝: {}", rule.id, reason));
                    break;
                }
            }
        }
        drop(rules);

        let hit = !decision.matched_rules.is_empty();
        let mut hits = self.rule_hits.write().await;
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        if hit {
            *hits += 1;
        } else {
            metrics.fallback_usage += 1;
        }
        metrics.rule_hit_rate = *hits as f64 / metrics.total_requests as f64;
        metrics.last_updated = Some(Utc::now());

        match rejection {
            Some(reason) => {
                metrics.failed_routes += 1;
                Err(FleetError::Validation(reason))
            }
            None => {
                metrics.successful_routes += 1;
                debug!("请求 {} 路由完成，命中规则: {:?}", request.id, decision.matched_rules);
                Ok(decision)
            }
        }
    }

    pub async fn metrics(&self) -> RoutingMetrics {
        self.metrics.read().await.clone()
    }
}

// ---------------------------------------------------------------
// 同步屏障
// ---------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncBarrier {
    pub id: String,
    pub participants: HashSet<String>,
    pub arrived: HashSet<String>,
    pub released: bool,
    pub created_at: DateTime<Utc>,
}

impl SyncBarrier {
    fn new(id: &str, participants: HashSet<String>) -> Self {
        let released = participants.is_empty();
        Self {
            id: id.to_string(),
            participants,
            arrived: HashSet::new(),
            released,
            created_at: Utc::now(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.participants.len() - self.arrived.len()
    }
}

/// 跟踪分片上报，全部到达时释放屏障
#[derive(Default)]
pub struct RequestSynchronizer {
    barriers: Mutex<HashMap<String, SyncBarrier>>,
}

impl RequestSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_barrier<I, S>(&self, barrier_id: &str, participants: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let participants = participants.into_iter().map(Into::into).collect();
        self.barriers
            .lock()
            .await
            .insert(barrier_id.to_string(), SyncBarrier::new(barrier_id, participants));
    }

    /// 登记参与者到达，返回屏障是否已释放
    pub async fn arrive(&self, barrier_id: &str, participant: &str) -> FleetResult<bool> {
        let mut barriers = self.barriers.lock().await;
        let barrier = barriers
            .get_mut(barrier_id)
            .ok_or_else(|| FleetError::Internal(format!("同步屏障不存在: {barrier_id}")))?;

        if !barrier.participants.contains(participant) {
            return Err(FleetError::Validation(format!(
                "{participant} 不是屏障 {barrier_id} 的参与者"
            )));
        }

        barrier.arrived.insert(participant.to_string());
        if barrier.arrived.len() == barrier.participants.len() {
            barrier.released = true;
        }
        Ok(barrier.released)
    }

    pub async fn is_released(&self, barrier_id: &str) -> bool {
        self.barriers
            .lock()
            .await
            .get(barrier_id)
            .is_some_and(|b| b.released)
    }

    pub async fn get_barrier(&self, barrier_id: &str) -> Option<SyncBarrier> {
        self.barriers.lock().await.get(barrier_id).cloned()
    }

    pub async fn remove_barrier(&self, barrier_id: &str) -> Option<SyncBarrier> {
        self.barriers.lock().await.remove(barrier_id)
    }

    pub async fn barrier_count(&self) -> usize {
        self.barriers.lock().await.len()
    }
}

// ---------------------------------------------------------------
// 会话状态
// ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub request_ids: Vec<String>,
    pub last_response: Option<AggregatedResponse>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            request_ids: Vec::new(),
            last_response: None,
            data: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 会话持久化后端
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn save(&self, state: &SessionState) -> FleetResult<()>;
    async fn load(&self, session_id: &str) -> FleetResult<Option<SessionState>>;
    async fn delete(&self, session_id: &str) -> FleetResult<bool>;
    async fn list(&self) -> FleetResult<Vec<String>>;
}

#[derive(Default)]
pub struct InMemorySessionPersistence {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl InMemorySessionPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionPersistence for InMemorySessionPersistence {
    async fn save(&self, state: &SessionState) -> FleetResult<()> {
        self.sessions
            .write()
            .await
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> FleetResult<Option<SessionState>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> FleetResult<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> FleetResult<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

pub struct SessionStateManager {
    persistence: Arc<dyn SessionPersistence>,
}

impl SessionStateManager {
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        Self { persistence }
    }

    async fn load_or_create(&self, session_id: &str) -> FleetResult<SessionState> {
        Ok(self
            .persistence
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionState::new(session_id)))
    }

    pub async fn record_request(&self, session_id: &str, request_id: &str) -> FleetResult<()> {
        let mut state = self.load_or_create(session_id).await?;
        state.request_ids.push(request_id.to_string());
        state.updated_at = Utc::now();
        self.persistence.save(&state).await
    }

    pub async fn record_response(
        &self,
        session_id: &str,
        response: &AggregatedResponse,
    ) -> FleetResult<()> {
        let mut state = self.load_or_create(session_id).await?;
        state.last_response = Some(response.clone());
        state.updated_at = Utc::now();
        self.persistence.save(&state).await
    }

    pub async fn get_session(&self, session_id: &str) -> FleetResult<Option<SessionState>> {
        self.persistence.load(session_id).await
    }

    pub async fn remove_session(&self, session_id: &str) -> FleetResult<bool> {
        self.persistence.delete(session_id).await
    }

    pub async fn sessions(&self) -> FleetResult<Vec<String>> {
        self.persistence.list().await
    }
}

impl Default for SessionStateManager {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySessionPersistence::new()))
    }
}

// ---------------------------------------------------------------
// 分区优化历史
// ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub strategy: String,
    pub partitions: usize,
    pub success: bool,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub usage: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
}

pub struct PartitionOptimizer {
    history: Mutex<VecDeque<OptimizationRecord>>,
    capacity: usize,
}

impl PartitionOptimizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, strategy: &str, partitions: usize, success: bool, latency_ms: u64) {
        let mut history = self.history.lock().await;
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(OptimizationRecord {
            strategy: strategy.to_string(),
            partitions,
            success,
            latency_ms,
            timestamp: Utc::now(),
        });
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub async fn strategy_stats(&self) -> HashMap<String, StrategyStats> {
        let history = self.history.lock().await;
        let mut totals: HashMap<String, (u64, u64, u64)> = HashMap::new();
        for record in history.iter() {
            let entry = totals.entry(record.strategy.clone()).or_default();
            entry.0 += 1;
            if record.success {
                entry.1 += 1;
            }
            entry.2 += record.latency_ms;
        }

        totals
            .into_iter()
            .map(|(strategy, (usage, successes, latency))| {
                let stats = StrategyStats {
                    usage,
                    success_rate: successes as f64 / usage as f64,
                    average_latency_ms: latency as f64 / usage as f64,
                };
                (strategy, stats)
            })
            .collect()
    }
}

impl Default for PartitionOptimizer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// 编排引擎持有的协调组件
pub struct Coordinator {
    pub mode: String,
    pub router: RequestRouter,
    pub synchronizer: RequestSynchronizer,
    pub sessions: SessionStateManager,
    pub optimizer: PartitionOptimizer,
}

impl Coordinator {
    pub fn new(mode: &str, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            mode: mode.to_string(),
            router: RequestRouter::new(),
            synchronizer: RequestSynchronizer::new(),
            sessions: SessionStateManager::new(persistence),
            optimizer: PartitionOptimizer::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(request_type: &str) -> OrchestrationRequest {
        OrchestrationRequest::new(request_type, json!(null))
    }

    #[test]
    fn test_parse_conditions() {
        assert_eq!(RouteCondition::parse("*").unwrap(), RouteCondition::Any);
        assert_eq!(
            RouteCondition::parse("type == embedding").unwrap(),
            RouteCondition::RequestType("embedding".to_string())
        );
        assert!(RouteCondition::parse("priority > 3").is_err());
        assert!(RouteCondition::parse("type ==").is_err());
    }

    #[tokio::test]
    async fn test_router_priority_order() {
        let router = RequestRouter::new();
        router
            .add_rule(
                RoutingRule::new("low", 1, "*", RouteAction::PreferNode("n-low".into())).unwrap(),
            )
            .await;
        router
            .add_rule(
                RoutingRule::new(
                    "high",
                    10,
                    "type == batch_processing",
                    RouteAction::PreferNode("n-high".into()),
                )
                .unwrap(),
            )
            .await;
        router
            .add_rule(
                RoutingRule::new(
                    "tag",
                    5,
                    "*",
                    RouteAction::Tag {
                        key: "tier".into(),
                        value: json!("gold"),
                    },
                )
                .unwrap(),
            )
            .await;

        let decision = router.route(&request("batch_processing")).await.unwrap();
        assert_eq!(decision.preferred_node.as_deref(), Some("n-high"));
        assert_eq!(decision.matched_rules, vec!["high", "tag", "low"]);
        assert_eq!(decision.tags["tier"], json!("gold"));

        let decision = router.route(&request("embedding")).await.unwrap();
        assert_eq!(decision.preferred_node.as_deref(), Some("n-low"));
    }

    #[tokio::test]
    async fn test_router_reject_and_fallback_metrics() {
        let router = RequestRouter::new();
        router
            .add_rule(
                RoutingRule::new(
                    "deny",
                    1,
                    "type == forbidden",
                    RouteAction::Reject("维护中".into()),
                )
                .unwrap(),
            )
            .await;

        assert!(matches!(
            router.route(&request("forbidden")).await,
            Err(FleetError::Validation(_))
        ));
        let decision = router.route(&request("other")).await.unwrap();
        assert!(decision.matched_rules.is_empty());

        let metrics = router.metrics().await;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.failed_routes, 1);
        assert_eq!(metrics.successful_routes, 1);
        assert_eq!(metrics.fallback_usage, 1);
        assert!((metrics.rule_hit_rate - 0.5).abs() < 1e-9);

        assert!(router.remove_rule("deny").await);
        assert!(!router.remove_rule("deny").await);
    }

    #[tokio::test]
    async fn test_barrier_releases_when_all_arrive() {
        let sync = RequestSynchronizer::new();
        sync.create_barrier("task-1", ["p0", "p1"]).await;

        assert!(!sync.arrive("task-1", "p0").await.unwrap());
        // 重复到达不计数
        assert!(!sync.arrive("task-1", "p0").await.unwrap());
        assert!(!sync.is_released("task-1").await);
        assert!(sync.arrive("task-1", "p1").await.unwrap());
        assert!(sync.is_released("task-1").await);

        assert!(sync.arrive("task-1", "p9").await.is_err());
        assert!(sync.arrive("missing", "p0").await.is_err());

        assert!(sync.remove_barrier("task-1").await.is_some());
        assert_eq!(sync.barrier_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_barrier_is_released() {
        let sync = RequestSynchronizer::new();
        sync.create_barrier("empty", Vec::<String>::new()).await;
        assert!(sync.is_released("empty").await);
    }

    #[tokio::test]
    async fn test_session_manager_tracks_requests() {
        let manager = SessionStateManager::default();
        manager.record_request("s1", "r1").await.unwrap();
        manager.record_request("s1", "r2").await.unwrap();

        let response = AggregatedResponse {
            task_id: "t1".into(),
            strategy: "concat".into(),
            data: json!([1]),
            metadata: HashMap::new(),
            latency_ms: 3,
            timestamp: Utc::now(),
        };
        manager.record_response("s1", &response).await.unwrap();

        let session = manager.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.request_ids, vec!["r1", "r2"]);
        assert_eq!(session.last_response.unwrap().task_id, "t1");
        assert_eq!(manager.sessions().await.unwrap(), vec!["s1"]);

        assert!(manager.remove_session("s1").await.unwrap());
        assert!(manager.get_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_optimizer_stats_and_bound() {
        let optimizer = PartitionOptimizer::new(3);
        optimizer.record("round_robin", 3, true, 10).await;
        optimizer.record("round_robin", 3, false, 30).await;
        optimizer.record("load_based", 5, true, 20).await;
        optimizer.record("load_based", 5, true, 40).await;

        assert_eq!(optimizer.history_len().await, 3);
        let stats = optimizer.strategy_stats().await;
        assert_eq!(stats["round_robin"].usage, 1);
        assert_eq!(stats["round_robin"].success_rate, 0.0);
        assert_eq!(stats["load_based"].usage, 2);
        assert_eq!(stats["load_based"].success_rate, 1.0);
        assert_eq!(stats["load_based"].average_latency_ms, 30.0);
    }
}
