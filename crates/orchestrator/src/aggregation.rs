use std::collections::HashSet;

use chrono::Utc;
use serde_json::{json, Value};

use fleet_core::{FleetError, FleetResult};
use fleet_domain::{AggregatedResponse, AggregationContext, PartialResult};

pub const CONCAT: &str = "concat";
pub const AVERAGE: &str = "average";
pub const WEIGHTED: &str = "weighted";

/// 分片结果聚合策略
pub trait AggregationStrategy: Send + Sync {
    fn aggregate(&self, context: &AggregationContext) -> FleetResult<AggregatedResponse>;

    fn name(&self) -> &str;
}

fn response(context: &AggregationContext, strategy: &str, data: Value) -> AggregatedResponse {
    let now = Utc::now();
    let latency_ms = (now - context.created_at).num_milliseconds().max(0) as u64;
    let mut metadata = context.metadata.clone();
    metadata.insert(
        "partial_results".to_string(),
        json!(context.partial_results.len()),
    );

    AggregatedResponse {
        task_id: context.task_id.clone(),
        strategy: strategy.to_string(),
        data,
        metadata,
        latency_ms,
        timestamp: now,
    }
}

/// 把结果数据转成浮点数，数字字符串也接受
fn numeric_value(result: &PartialResult) -> Option<f64> {
    match &result.data {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn weight_of(result: &PartialResult) -> f64 {
    result
        .metadata
        .get("weight")
        .and_then(|w| w.as_f64())
        .unwrap_or(1.0)
}

/// 拼接所有成功分片的数据，保持到达顺序
pub struct ConcatAggregation;

impl ConcatAggregation {
    fn validate(context: &AggregationContext) -> FleetResult<()> {
        if context.task_id.is_empty() {
            return Err(FleetError::Aggregation("聚合上下文缺少任务ID".to_string()));
        }

        let mut seen = HashSet::new();
        for result in &context.partial_results {
            if !seen.insert(result.partition_id.as_str()) {
                return Err(FleetError::Aggregation(format!(
                    "分片结果重复: {}",
                    result.partition_id
                )));
            }
        }
        Ok(())
    }
}

impl AggregationStrategy for ConcatAggregation {
    fn aggregate(&self, context: &AggregationContext) -> FleetResult<AggregatedResponse> {
        Self::validate(context)?;

        let data: Vec<Value> = context
            .partial_results
            .iter()
            .filter(|r| !r.is_error())
            .map(|r| r.data.clone())
            .collect();

        Ok(response(context, self.name(), Value::Array(data)))
    }

    fn name(&self) -> &str {
        CONCAT
    }
}

pub struct AverageAggregation;

impl AggregationStrategy for AverageAggregation {
    fn aggregate(&self, context: &AggregationContext) -> FleetResult<AggregatedResponse> {
        let values: Vec<f64> = context
            .partial_results
            .iter()
            .filter(|r| !r.is_error())
            .filter_map(numeric_value)
            .collect();

        if values.is_empty() {
            return Err(FleetError::Aggregation("没有有效的数值结果".to_string()));
        }

        let average = values.iter().sum::<f64>() / values.len() as f64;
        Ok(response(context, self.name(), json!(average)))
    }

    fn name(&self) -> &str {
        AVERAGE
    }
}

/// 按分片元数据中的 `weight` 加权平均，缺省权重为1
pub struct WeightedAggregation;

impl AggregationStrategy for WeightedAggregation {
    fn aggregate(&self, context: &AggregationContext) -> FleetResult<AggregatedResponse> {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for result in context.partial_results.iter().filter(|r| !r.is_error()) {
            if let Some(value) = numeric_value(result) {
                let weight = weight_of(result);
                weighted_sum += value * weight;
                total_weight += weight;
            }
        }

        if total_weight == 0.0 {
            return Err(FleetError::Aggregation("总权重为零".to_string()));
        }

        Ok(response(
            context,
            self.name(),
            json!(weighted_sum / total_weight),
        ))
    }

    fn name(&self) -> &str {
        WEIGHTED
    }
}
