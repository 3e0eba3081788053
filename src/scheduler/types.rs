//! Scheduler state and per-cycle outcome types.
//!
//! # State Transitions
//!
//! ```text
//!            run_forever()
//! Created ─────────────────→ Running ──┐
//!                              │   ↑    │ pass finished, sleeping
//!                   shutdown() │   └────┘
//!                              ↓
//!                           Stopped
//! ```
//!
//! Shutdown is only honoured between passes; a running pass always
//! completes.

use crate::error::SnapshotError;
use crate::replication::ReplicationReport;
use crate::retention::PrunePlan;
use chrono::NaiveDateTime;

/// State of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, loop not started.
    Created,
    /// Loop running (processing or sleeping between passes).
    Running,
    /// Shutdown requested, finishing the current pass.
    ShuttingDown,
    /// Loop exited.
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Step of the per-volume pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Loading the volume's snapshot list.
    Listing,
    Trigger,
    PreExec,
    Snapshot,
    Replication,
    PostExec,
    Retention,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Trigger => "trigger",
            Self::PreExec => "preexec",
            Self::Snapshot => "snapshot",
            Self::Replication => "replication",
            Self::PostExec => "postexec",
            Self::Retention => "retention",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed stage and its error.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: SnapshotError,
}

/// What happened to one volume during one pass.
#[derive(Debug)]
pub struct VolumeOutcome {
    pub volume: String,
    /// The trigger fired and the pipeline ran (fully or until a failure).
    pub executed: bool,
    /// Snapshot created this pass.
    pub snapshot_taken: Option<String>,
    pub replication: Option<ReplicationReport>,
    /// Set when retention ran.
    pub retention: Option<PrunePlan>,
    pub failures: Vec<StageFailure>,
}

impl VolumeOutcome {
    pub fn new(volume: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            executed: false,
            snapshot_taken: None,
            replication: None,
            retention: None,
            failures: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, stage: Stage, error: SnapshotError) {
        self.failures.push(StageFailure { stage, error });
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Check if `stage` failed.
    pub fn failed_at(&self, stage: Stage) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }

    /// Number of snapshots retention destroyed.
    pub fn destroyed(&self) -> usize {
        self.retention.as_ref().map_or(0, |plan| plan.destroyed.len())
    }
}

/// Result of one pass over all configured volumes.
#[derive(Debug)]
pub struct CycleReport {
    /// Local wall-clock time the pass ran against.
    pub now: NaiveDateTime,
    /// One entry per configured volume present on the host, in listing order.
    pub outcomes: Vec<VolumeOutcome>,
    /// Configured volumes the volume manager did not list.
    pub missing: Vec<String>,
}

impl CycleReport {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            outcomes: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn outcome(&self, volume: &str) -> Option<&VolumeOutcome> {
        self.outcomes.iter().find(|o| o.volume == volume)
    }

    pub fn failed(&self) -> impl Iterator<Item = &VolumeOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn executed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.executed).count()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(VolumeOutcome::is_success)
    }
}
