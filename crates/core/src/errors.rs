use thiserror::Error;

/// 分发与编排错误类型定义
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("任务校验失败: {0}")]
    Validation(String),

    #[error("任务ID已存在: {id}")]
    DuplicateTask { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("没有可用节点")]
    NoAvailableNodes,

    #[error("节点 {node_id} 资源不足")]
    InsufficientResources { node_id: String },

    #[error("没有注册任何分发策略，请检查配置")]
    NoStrategies,

    #[error("策略未找到: {name}")]
    StrategyNotFound { name: String },

    #[error("任务分区失败: {0}")]
    Partitioning(String),

    #[error("结果聚合失败: {0}")]
    Aggregation(String),

    #[error("分区执行失败: {0}")]
    Execution(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("服务正在关闭")]
    ShuttingDown,

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl FleetError {
    /// 放置类错误：任务留在待分发队列，下个周期重试
    pub fn is_placement_error(&self) -> bool {
        matches!(
            self,
            FleetError::NoAvailableNodes
                | FleetError::InsufficientResources { .. }
                | FleetError::StrategyNotFound { .. }
                | FleetError::NodeNotFound { .. }
        )
    }

    /// 配置类错误属于编程错误，立即向上抛出
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FleetError::NoStrategies | FleetError::Configuration(_)
        )
    }
}

/// 统一的Result类型
pub type FleetResult<T> = std::result::Result<T, FleetError>;
