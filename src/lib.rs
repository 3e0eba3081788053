//! # Snapshot Manager
//!
//! Lifecycle management for ZFS snapshots: daily creation, age-bucketed
//! retention and incremental replication to (or from) a second host.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            snapshot-manager                               │
//! │                                                                           │
//! │  ┌───────────┐    per volume    ┌─────────────────────┐                   │
//! │  │ Scheduler │─────────────────►│ preexec → snapshot  │                   │
//! │  │ (trigger) │                  │ → replicate         │                   │
//! │  └───────────┘                  │ → postexec          │                   │
//! │        │                        └──────────┬──────────┘                   │
//! │        │ today's snapshot exists           │                              │
//! │        ▼                                   ▼                              │
//! │  ┌───────────┐                  ┌─────────────────────┐                   │
//! │  │ Retention │─────────────────►│ VolumeManager (zfs) │──► RemoteExecutor │
//! │  └───────────┘                  └─────────────────────┘    (sh / ssh)     │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Engines
//!
//! 1. **Retention** ([`retention`]): keeps one snapshot per day/week/month/year
//!    bucket and destroys the rest.
//! 2. **Replication** ([`replication`]): finds the last common snapshot and
//!    sends the incremental chain, moving `zsm` holds forward behind it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use snapshot_manager::{ManagerConfig, Scheduler, ZfsInventory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> snapshot_manager::Result<()> {
//!     let config = ManagerConfig::load_from("/etc/zfssnapmanager.toml".as_ref())?;
//!     let inventory: ZfsInventory = ZfsInventory::default();
//!     let scheduler = Scheduler::new(Arc::new(inventory), &config)?;
//!
//!     let report = scheduler.run_once().await?;
//!     println!("{} volumes processed", report.executed());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod metrics;
pub mod replication;
pub mod retention;
pub mod scheduler;
pub mod snapshot;

// Re-exports for convenience
pub use config::{ManagerConfig, VolumeConfig, VolumeSettings, ReplicateConfig};
pub use error::{Result, SnapshotError};
pub use executor::{CommandRunner, Endpoint, RemoteExecutor, ShellRunner};
pub use inventory::{Direction, TransferRequest, VolumeManager, ZfsInventory};
pub use replication::{ReplicationLink, ReplicationReport, TransferPlan, TransferStep};
pub use retention::{PrunePlan, RetentionSchema};
pub use scheduler::{CycleReport, Scheduler, SchedulerState, Stage, Trigger, VolumeOutcome};
