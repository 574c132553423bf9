//! Structured logging utilities
//!
//! Every task and node transition observed by the distributor and the
//! orchestration engine is emitted here with a stable `event` field so an
//! external sink can pick them up from the subscriber.

use tracing::{debug, error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log task submission
    pub fn log_task_submitted(task_id: &str, task_name: &str, task_type: &str, priority: &str) {
        info!(
            event = "task_submitted",
            task.id = task_id,
            task.name = task_name,
            task.type = task_type,
            task.priority = priority,
            "Task submitted for distribution"
        );
    }

    /// Log task assignment to a node
    pub fn log_task_assigned(task_id: &str, node_id: &str, strategy: &str, score: f64) {
        info!(
            event = "task_assigned",
            task.id = task_id,
            node.id = node_id,
            strategy = strategy,
            strategy.score = score,
            "Task assigned to node"
        );
    }

    /// Log task completion
    pub fn log_task_completed(task_id: &str, node_id: &str, duration_ms: i64) {
        info!(
            event = "task_completed",
            task.id = task_id,
            node.id = node_id,
            task.duration_ms = duration_ms,
            "Task execution completed successfully"
        );
    }

    /// Log terminal task failure
    pub fn log_task_failed(task_id: &str, node_id: Option<&str>, error_message: &str) {
        error!(
            event = "task_failed",
            task.id = task_id,
            node.id = node_id.unwrap_or("unassigned"),
            task.error = error_message,
            "Task execution failed"
        );
    }

    /// Log task retry
    pub fn log_task_retry(task_id: &str, retry_count: u32, max_retries: u32, reason: &str) {
        warn!(
            event = "task_retry",
            task.id = task_id,
            task.retry_count = retry_count,
            task.max_retries = max_retries,
            task.retry_reason = reason,
            "Task retry initiated"
        );
    }

    /// Log task cancellation
    pub fn log_task_cancelled(task_id: &str) {
        info!(event = "task_cancelled", task.id = task_id, "Task cancelled");
    }

    /// Log a task that could not be placed in this distribution pass
    pub fn log_task_deferred(task_id: &str, reason: &str) {
        debug!(
            event = "task_deferred",
            task.id = task_id,
            reason = reason,
            "Task left in pending queue"
        );
    }

    /// Log node registration
    pub fn log_node_registered(node_id: &str, status: &str) {
        info!(
            event = "node_registered",
            node.id = node_id,
            node.status = status,
            "Node registered"
        );
    }

    /// Log node status change
    pub fn log_node_status_changed(node_id: &str, from: &str, to: &str) {
        info!(
            event = "node_status_changed",
            node.id = node_id,
            node.status.from = from,
            node.status.to = to,
            "Node status changed"
        );
    }

    /// Log removal of a stale node
    pub fn log_node_purged(node_id: &str, unseen_seconds: i64) {
        warn!(
            event = "node_purged",
            node.id = node_id,
            node.unseen_seconds = unseen_seconds,
            "Stale node removed from registry"
        );
    }

    /// Log an orchestration lifecycle transition
    pub fn log_orchestration_transition(task_id: &str, from: &str, to: &str) {
        debug!(
            event = "orchestration_transition",
            task.id = task_id,
            task.status.from = from,
            task.status.to = to,
            "Orchestration task transitioned"
        );
    }

    /// Log orchestration completion
    pub fn log_orchestration_completed(task_id: &str, partitions: usize, duration_ms: i64) {
        info!(
            event = "orchestration_completed",
            task.id = task_id,
            task.partitions = partitions,
            task.duration_ms = duration_ms,
            "Orchestration task completed"
        );
    }

    /// Log terminal orchestration failure
    pub fn log_orchestration_failed(task_id: &str, retry_count: u32, error_message: &str) {
        error!(
            event = "orchestration_failed",
            task.id = task_id,
            task.retry_count = retry_count,
            task.error = error_message,
            "Orchestration task failed"
        );
    }

    /// Log system error
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            component = component,
            operation = operation,
            error = %error,
            "System error occurred"
        );
    }
}
