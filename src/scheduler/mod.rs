// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scheduler: ties per-volume configuration to the engines, once per pass.
//!
//! # Pass Structure
//!
//! Each pass walks the volumes in listing order, one at a time. A volume's
//! snapshot list is loaded at the top of its processing, so a recursive
//! snapshot taken by an earlier parent is already visible:
//!
//! ```text
//! for volume in list_volumes() ∩ configured:
//!     list_snapshots(volume)
//!     if active and due(trigger):
//!         preexec → snapshot today → replicate → postexec
//!     if today's snapshot exists:
//!         retention
//! ```
//!
//! A failing stage ends the pipeline for that volume; retention still runs
//! when today's snapshot exists. Failures are collected in a
//! [`CycleReport`] and never affect the next volume.
//!
//! Nothing is carried from one pass to the next except configuration.

mod types;
pub mod trigger;

pub use trigger::Trigger;
pub use types::{CycleReport, SchedulerState, Stage, StageFailure, VolumeOutcome};

use crate::config::{ManagerConfig, VolumeSettings};
use crate::error::{Result, SnapshotError};
use crate::executor::{CommandRunner, Endpoint, RemoteExecutor, ShellRunner};
use crate::inventory::VolumeManager;
use crate::metrics;
use crate::replication;
use crate::retention;
use crate::snapshot::snapshot_name;
use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Runs passes over the configured volumes.
pub struct Scheduler<V: VolumeManager, R: CommandRunner = ShellRunner> {
    inventory: Arc<V>,

    /// Runs pre/post hooks on the local host.
    hooks: RemoteExecutor<R>,

    /// Validated settings keyed by volume name.
    volumes: BTreeMap<String, VolumeSettings>,

    /// Pause between passes in daemon mode.
    interval: Duration,

    state_tx: watch::Sender<SchedulerState>,
    state_rx: watch::Receiver<SchedulerState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<V: VolumeManager> Scheduler<V, ShellRunner> {
    /// Create a scheduler from a loaded configuration.
    ///
    /// Fails with [`SnapshotError::Config`] if any volume is invalid.
    pub fn new(inventory: Arc<V>, config: &ManagerConfig) -> Result<Self> {
        let volumes = config.validate()?;
        let interval = config.daemon.interval()?;
        Ok(Self::with_hooks(
            inventory,
            RemoteExecutor::default(),
            volumes,
            interval,
        ))
    }
}

impl<V: VolumeManager, R: CommandRunner> Scheduler<V, R> {
    /// Create a scheduler with a custom hook executor.
    pub fn with_hooks(
        inventory: Arc<V>,
        hooks: RemoteExecutor<R>,
        volumes: BTreeMap<String, VolumeSettings>,
        interval: Duration,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inventory,
            hooks,
            volumes,
            interval,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn inventory(&self) -> &Arc<V> {
        &self.inventory
    }

    pub fn volumes(&self) -> &BTreeMap<String, VolumeSettings> {
        &self.volumes
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Ask the daemon loop to stop after the current pass.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn set_state(&self, state: SchedulerState) {
        let _ = self.state_tx.send(state);
        metrics::set_scheduler_state(&state.to_string());
    }

    /// Run passes until [`shutdown`](Self::shutdown) is called.
    ///
    /// Errors of a single pass are logged and the loop continues.
    pub async fn run_forever(&self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        self.set_state(SchedulerState::Running);
        info!(
            volumes = self.volumes.len(),
            interval = %humantime::format_duration(self.interval),
            "Starting daemon loop"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Pass failed");
                metrics::record_cycle_error(e.kind());
            }

            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.set_state(SchedulerState::ShuttingDown);
        info!("Shutdown signal received, daemon loop stopped");
        self.set_state(SchedulerState::Stopped);
    }

    /// Run one pass against the current local time.
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.run_cycle(Local::now().naive_local()).await
    }

    /// Run one pass as if the wall clock read `now`.
    ///
    /// Fails only if the volume listing fails; per-volume failures are in
    /// the returned report.
    pub async fn run_cycle(&self, now: NaiveDateTime) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::new(now);

        let listed = self.inventory.list_volumes().await?;

        for volume in &listed {
            let Some(settings) = self.volumes.get(volume) else {
                continue;
            };
            let outcome = self.process_volume(settings, now).await;
            report.outcomes.push(outcome);
        }

        report.missing = self
            .volumes
            .keys()
            .filter(|name| !listed.contains(name))
            .cloned()
            .collect();
        for name in &report.missing {
            debug!(volume = %name, "Configured volume not found, skipping");
        }

        let failed = report.failed().count();
        metrics::record_cycle(report.outcomes.len(), failed, started.elapsed());
        if failed > 0 {
            warn!(volumes = report.outcomes.len(), failed, "Pass complete with failures");
        } else {
            debug!(volumes = report.outcomes.len(), "Pass complete");
        }

        Ok(report)
    }

    #[instrument(skip_all, fields(volume = %settings.name))]
    async fn process_volume(&self, settings: &VolumeSettings, now: NaiveDateTime) -> VolumeOutcome {
        let today = snapshot_name(now.date());
        let mut outcome = VolumeOutcome::new(&settings.name);

        let mut local = match self
            .inventory
            .list_snapshots(Some(settings.name.as_str()), &Endpoint::local())
            .await
        {
            Ok(mut snapshots) => snapshots.remove(settings.name.as_str()).unwrap_or_default(),
            Err(e) => {
                error!(volume = %settings.name, error = %e, "Listing snapshots failed");
                metrics::record_volume_failure(&settings.name, Stage::Listing.as_str());
                outcome.record_failure(Stage::Listing, e);
                return outcome;
            }
        };

        if settings.is_active() {
            let has_today = local.contains(&today);
            match trigger::is_due(
                &settings.trigger,
                settings.mountpoint.as_deref(),
                now.time(),
                has_today,
            )
            .await
            {
                Ok(true) => {
                    match settings.trigger {
                        Trigger::At(_) => info!(volume = %settings.name, "Time passed"),
                        Trigger::Always => info!(volume = %settings.name, "Processing on manual run"),
                        Trigger::File => {}
                    }
                    outcome.executed = true;
                    metrics::record_volume_triggered(&settings.name, &settings.trigger.to_string());
                    if let Err((stage, e)) =
                        self.run_pipeline(settings, &today, &mut local, &mut outcome).await
                    {
                        error!(volume = %settings.name, stage = %stage, error = %e, "Processing failed");
                        metrics::record_volume_failure(&settings.name, stage.as_str());
                        outcome.record_failure(stage, e);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    error!(volume = %settings.name, error = %e, "Trigger check failed");
                    metrics::record_volume_failure(&settings.name, Stage::Trigger.as_str());
                    outcome.record_failure(Stage::Trigger, e);
                }
            }
        }

        if local.contains(&today) {
            match retention::prune(
                self.inventory.as_ref(),
                &settings.name,
                &local,
                &settings.schema,
                settings.recursive,
                now.date(),
            )
            .await
            {
                Ok(plan) => outcome.retention = Some(plan),
                Err(e) => {
                    error!(volume = %settings.name, error = %e, "Cleaning failed");
                    metrics::record_volume_failure(&settings.name, Stage::Retention.as_str());
                    outcome.record_failure(Stage::Retention, e);
                }
            }
        }

        outcome
    }

    /// preexec → snapshot → replication → postexec, stopping at the first
    /// failure.
    async fn run_pipeline(
        &self,
        settings: &VolumeSettings,
        today: &str,
        local: &mut Vec<String>,
        outcome: &mut VolumeOutcome,
    ) -> std::result::Result<(), (Stage, SnapshotError)> {
        if let Some(command) = &settings.preexec {
            self.run_hook(&settings.name, "preexec", command)
                .await
                .map_err(|e| (Stage::PreExec, e))?;
        }

        if settings.take_snapshot {
            if local.iter().any(|s| s == today) {
                info!(volume = %settings.name, snapshot = %today, "Snapshot already exists, skipping");
            } else {
                info!(volume = %settings.name, snapshot = %today, "Taking snapshot");
                self.inventory
                    .create_snapshot(&settings.name, today, settings.recursive)
                    .await
                    .map_err(|e| (Stage::Snapshot, e))?;
                local.push(today.to_string());
                outcome.snapshot_taken = Some(today.to_string());
                metrics::record_snapshot_created(&settings.name);
                info!(volume = %settings.name, snapshot = %today, "Taking snapshot complete");
            }
        }

        if let Some(link) = &settings.replication {
            let inventory = self.inventory.as_ref();
            let plan = replication::replicate(inventory, &settings.name, local, link)
                .await
                .map_err(|e| (Stage::Replication, e))?;
            let report = replication::execute(inventory, &plan)
                .await
                .map_err(|e| (Stage::Replication, e))?;
            outcome.replication = Some(report);
        }

        if let Some(command) = &settings.postexec {
            self.run_hook(&settings.name, "postexec", command)
                .await
                .map_err(|e| (Stage::PostExec, e))?;
        }

        Ok(())
    }

    async fn run_hook(&self, volume: &str, hook: &str, command: &str) -> Result<()> {
        info!(volume, hook, command, "Running hook");
        let result = self.hooks.run(command, &Endpoint::local()).await;
        metrics::record_hook(volume, hook, result.is_ok());
        let output = result?;
        if !output.trim().is_empty() {
            debug!(volume, hook, output = %output.trim(), "Hook output");
        }
        Ok(())
    }
}
