// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Records through the `metrics` facade; the embedding application installs
//! whatever exporter it wants. Without one, every call is a no-op.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `topology_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! # Usage
//!
//! ```rust,no_run
//! use replication_topology::metrics;
//!
//! metrics::record_node_op("node-1", "search", true);
//! metrics::record_busy_retry("meTo_node2:389");
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one RPC against a node.
pub fn record_node_op(node: &str, operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "topology_node_operations_total",
        "node" => node.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a lifecycle change of a replica (created, disabled, promoted, demoted).
pub fn record_replica_lifecycle(node: &str, event: &'static str) {
    counter!("topology_replica_events_total", "node" => node.to_string(), "event" => event).increment(1);
}

/// Record an idempotent create that found the resource already present.
pub fn record_idempotent_hit(kind: &'static str) {
    counter!("topology_idempotent_hits_total", "kind" => kind).increment(1);
}

/// Record one status observation while waiting for a total init.
pub fn record_init_poll(agreement: &str) {
    counter!("topology_init_polls_total", "agreement" => agreement.to_string()).increment(1);
}

/// Record a bootstrap retried because the consumer was busy.
pub fn record_busy_retry(agreement: &str) {
    counter!("topology_bootstrap_busy_retries_total", "agreement" => agreement.to_string()).increment(1);
}

/// Record the final outcome of a bootstrap (`done`, `busy`, `failed`).
pub fn record_bootstrap_outcome(agreement: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "topology_bootstrap_total",
        "agreement" => agreement.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("topology_bootstrap_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record which mechanism paused or resumed an agreement.
///
/// `mechanism` is `enabled_flag` or `schedule`.
pub fn record_pause_resume(action: &'static str, mechanism: &'static str) {
    counter!("topology_pause_resume_total", "action" => action, "mechanism" => mechanism).increment(1);
}

/// Record a finished convergence check.
///
/// `method` is `marker` or `ruv`.
pub fn record_convergence_check(
    method: &'static str,
    converged: bool,
    attempts: usize,
    duration: Duration,
) {
    let status = if converged { "converged" } else { "failed" };
    counter!("topology_convergence_checks_total", "method" => method, "status" => status)
        .increment(1);
    histogram!("topology_convergence_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
    histogram!("topology_convergence_attempts", "method" => method).record(attempts as f64);
}

/// Record how far behind a node is for one replica ID, from RUV comparison.
pub fn record_ruv_lag(node: &str, replica_id: u16, lag_seconds: u32) {
    gauge!(
        "topology_ruv_lag_seconds",
        "node" => node.to_string(),
        "replica_id" => replica_id.to_string()
    )
    .set(lag_seconds as f64);
}

/// Record a finished directory task (`cleanallruv`, `abort_cleanallruv`).
pub fn record_task_outcome(kind: &'static str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("topology_tasks_total", "kind" => kind, "status" => status).increment(1);
    histogram!("topology_task_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}

/// Record an edge state transition.
pub fn record_edge_transition(to: &'static str) {
    counter!("topology_edge_transitions_total", "state" => to).increment(1);
}
