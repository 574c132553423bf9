//! Metrics collector
//!
//! Publishes distributor and orchestration counters through the `metrics`
//! facade. Installing a recorder or exporter is left to the embedding
//! process; without one every call is a no-op.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

pub struct MetricsCollector {
    // Distributor
    tasks_submitted_total: Counter,
    tasks_completed_total: Counter,
    tasks_failed_total: Counter,
    task_retries_total: Counter,
    task_execution_duration: Histogram,
    distribution_duration: Histogram,
    pending_tasks: Gauge,
    running_tasks: Gauge,
    active_nodes: Gauge,
    average_node_load: Gauge,

    // Orchestration
    orchestrations_total: Counter,
    orchestrations_completed_total: Counter,
    orchestrations_failed_total: Counter,
    orchestration_retries_total: Counter,
    orchestration_latency: Histogram,
    active_orchestrations: Gauge,
    partitions_executed_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_submitted_total: counter!("fleet_tasks_submitted_total"),
            tasks_completed_total: counter!("fleet_tasks_completed_total"),
            tasks_failed_total: counter!("fleet_tasks_failed_total"),
            task_retries_total: counter!("fleet_task_retries_total"),
            task_execution_duration: histogram!("fleet_task_execution_duration_seconds"),
            distribution_duration: histogram!("fleet_distribution_pass_duration_seconds"),
            pending_tasks: gauge!("fleet_pending_tasks"),
            running_tasks: gauge!("fleet_running_tasks"),
            active_nodes: gauge!("fleet_active_nodes"),
            average_node_load: gauge!("fleet_average_node_load"),
            orchestrations_total: counter!("fleet_orchestrations_total"),
            orchestrations_completed_total: counter!("fleet_orchestrations_completed_total"),
            orchestrations_failed_total: counter!("fleet_orchestrations_failed_total"),
            orchestration_retries_total: counter!("fleet_orchestration_retries_total"),
            orchestration_latency: histogram!("fleet_orchestration_latency_seconds"),
            active_orchestrations: gauge!("fleet_active_orchestrations"),
            partitions_executed_total: counter!("fleet_partitions_executed_total"),
        }
    }

    // Distributor metrics

    pub fn record_task_submitted(&self) {
        self.tasks_submitted_total.increment(1);
    }

    pub fn record_task_assigned(&self, strategy: &str) {
        counter!("fleet_task_assignments_total", "strategy" => strategy.to_string()).increment(1);
    }

    pub fn record_task_completed(&self, duration_seconds: f64) {
        self.tasks_completed_total.increment(1);
        self.task_execution_duration.record(duration_seconds);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed_total.increment(1);
    }

    pub fn record_task_retry(&self) {
        self.task_retries_total.increment(1);
    }

    pub fn record_distribution_pass(&self, duration_seconds: f64) {
        self.distribution_duration.record(duration_seconds);
    }

    pub fn update_queue_depth(&self, pending: usize, running: usize) {
        self.pending_tasks.set(pending as f64);
        self.running_tasks.set(running as f64);
    }

    pub fn update_node_stats(&self, active_nodes: usize, average_load: f64) {
        self.active_nodes.set(active_nodes as f64);
        self.average_node_load.set(average_load);
    }

    // Orchestration metrics

    pub fn record_orchestration_started(&self) {
        self.orchestrations_total.increment(1);
        self.active_orchestrations.increment(1.0);
    }

    pub fn record_orchestration_completed(&self, latency_seconds: f64) {
        self.orchestrations_completed_total.increment(1);
        self.orchestration_latency.record(latency_seconds);
        self.active_orchestrations.decrement(1.0);
    }

    pub fn record_orchestration_failed(&self) {
        self.orchestrations_failed_total.increment(1);
        self.active_orchestrations.decrement(1.0);
    }

    pub fn record_orchestration_retry(&self) {
        self.orchestration_retries_total.increment(1);
    }

    pub fn record_partition_executed(&self, success: bool) {
        self.partitions_executed_total.increment(1);
        if !success {
            counter!("fleet_partition_failures_total").increment(1);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
