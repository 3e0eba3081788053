//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Snapshot creation and destruction
//! - Transfers and replication failures
//! - Hook executions
//! - Pass results and scheduler state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `snapshot_manager_` and follow Prometheus
//! conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! No exporter is installed by this crate; without a recorder every call is
//! a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use snapshot_manager::metrics;
//! use std::time::Duration;
//!
//! // After retention destroyed a snapshot
//! metrics::record_snapshot_destroyed("tank/data");
//!
//! // After a pass over all volumes
//! metrics::record_cycle(4, 1, Duration::from_secs(12));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a snapshot created by the scheduler.
pub fn record_snapshot_created(volume: &str) {
    counter!("snapshot_manager_snapshots_created_total", "volume" => volume.to_string())
        .increment(1);
}

/// Record a snapshot destroyed by retention.
pub fn record_snapshot_destroyed(volume: &str) {
    counter!("snapshot_manager_snapshots_destroyed_total", "volume" => volume.to_string())
        .increment(1);
}

/// Record a completed send/receive.
pub fn record_transfer(volume: &str, direction: &str, full: bool, duration: Duration) {
    let kind = if full { "full" } else { "incremental" };
    counter!(
        "snapshot_manager_transfers_total",
        "volume" => volume.to_string(),
        "direction" => direction.to_string(),
        "kind" => kind
    )
    .increment(1);
    histogram!("snapshot_manager_transfer_duration_seconds", "volume" => volume.to_string())
        .record(duration.as_secs_f64());
}

/// Record a replication chain that stopped early.
pub fn record_replication_failure(volume: &str, error_kind: &str) {
    counter!(
        "snapshot_manager_replication_failures_total",
        "volume" => volume.to_string(),
        "error" => error_kind.to_string()
    )
    .increment(1);
}

/// Record a pre/post hook execution.
pub fn record_hook(volume: &str, hook: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "snapshot_manager_hooks_total",
        "volume" => volume.to_string(),
        "hook" => hook.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a volume whose trigger fired.
pub fn record_volume_triggered(volume: &str, trigger: &str) {
    counter!(
        "snapshot_manager_volume_triggers_total",
        "volume" => volume.to_string(),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

/// Record a failed pipeline stage for a volume.
pub fn record_volume_failure(volume: &str, stage: &str) {
    counter!(
        "snapshot_manager_volume_failures_total",
        "volume" => volume.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Record a finished pass.
pub fn record_cycle(volumes: usize, failed: usize, duration: Duration) {
    counter!("snapshot_manager_cycles_total").increment(1);
    gauge!("snapshot_manager_cycle_volumes").set(volumes as f64);
    gauge!("snapshot_manager_cycle_failed_volumes").set(failed as f64);
    histogram!("snapshot_manager_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record a pass that could not start (e.g. listing failed).
pub fn record_cycle_error(error_kind: &str) {
    counter!("snapshot_manager_cycle_errors_total", "error" => error_kind.to_string())
        .increment(1);
}

/// Set the scheduler state gauge.
pub fn set_scheduler_state(state: &str) {
    gauge!("snapshot_manager_scheduler_state", "state" => state.to_string()).set(1.0);
}
