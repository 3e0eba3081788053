// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine: keeps a remote copy of a volume's snapshot history.
//!
//! # Planning
//!
//! The side that sends is the *source*, the side that receives is the
//! *destination*. For a push link the local volume is the source; for a pull
//! link the remote dataset is.
//!
//! ```text
//! source:      d1  d2  d3  d4
//! destination: d1  d2
//!                  ^ common ancestor (last source entry present remotely)
//! steps:       (d2 → d3), (d3 → d4)
//! ```
//!
//! - Destination empty, source non-empty: one full send of the newest source
//!   snapshot.
//! - Destination non-empty without a common ancestor: nothing is sent. A
//!   `receive -F` there would roll the destination back, so this needs an
//!   operator.
//!
//! Only `YYYYMMDD` snapshots take part in ancestor discovery and chains.
//!
//! # Hold/Release Protocol
//!
//! After each successful step the new snapshot is held on the source and
//! then on the destination, and only afterwards the previous step's snapshot
//! is released on both sides. At any instant the latest common snapshot is
//! therefore held on both ends and retention can never remove the next
//! incremental base.
//!
//! A chain interrupted between the holds and the releases leaves the old
//! base held. Once a later plan has sent and held its last snapshot on both
//! sides, `zsm` holds on snapshots older than its common ancestor are
//! released.
//!
//! A snapshot can already carry the tag (e.g. a full send of a held
//! snapshot into a recreated target). `zfs hold` rejects that, so a failed
//! hold is accepted when the tag turns out to be present.

use crate::error::{Result, SnapshotError};
use crate::executor::Endpoint;
use crate::inventory::{Direction, TransferRequest, VolumeManager};
use crate::metrics;
use crate::snapshot::dated_only;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default mbuffer memory size on both ends of a transfer.
pub const DEFAULT_BUFFER_SIZE: &str = "512M";

/// One side of a volume's replication pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationLink {
    /// Remote-shell prefix of the other host; local for same-host links.
    pub endpoint: Endpoint,
    pub direction: Direction,
    /// `target` for push links, `source` for pull links.
    pub remote_volume: String,
    pub compression: Option<String>,
    pub buffer_size: String,
}

impl ReplicationLink {
    /// Local volume is sent to `target` on `endpoint`.
    pub fn push(endpoint: Endpoint, target: impl Into<String>) -> Self {
        Self {
            endpoint,
            direction: Direction::Push,
            remote_volume: target.into(),
            compression: None,
            buffer_size: DEFAULT_BUFFER_SIZE.to_string(),
        }
    }

    /// `source` on `endpoint` is received into the local volume.
    pub fn pull(endpoint: Endpoint, source: impl Into<String>) -> Self {
        Self {
            direction: Direction::Pull,
            ..Self::push(endpoint, source)
        }
    }

    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: impl Into<String>) -> Self {
        self.buffer_size = buffer_size.into();
        self
    }
}

/// One send: incremental from `from` or full when `from` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStep {
    pub from: Option<String>,
    pub to: String,
}

impl TransferStep {
    pub fn full(to: impl Into<String>) -> Self {
        Self {
            from: None,
            to: to.into(),
        }
    }

    pub fn incremental(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: to.into(),
        }
    }
}

/// Ordered transfer steps for one volume and its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// The locally managed volume.
    pub volume: String,
    pub link: ReplicationLink,
    pub steps: Vec<TransferStep>,
    /// Source snapshots older than the common ancestor.
    pub stale_source: Vec<String>,
    /// Destination snapshots older than the common ancestor.
    pub stale_destination: Vec<String>,
}

impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check if this plan is a single full send.
    pub fn is_full(&self) -> bool {
        matches!(self.steps.as_slice(), [step] if step.from.is_none())
    }

    pub fn source_volume(&self) -> &str {
        match self.link.direction {
            Direction::Push => &self.volume,
            Direction::Pull => &self.link.remote_volume,
        }
    }

    pub fn destination_volume(&self) -> &str {
        match self.link.direction {
            Direction::Push => &self.link.remote_volume,
            Direction::Pull => &self.volume,
        }
    }

    pub fn source_endpoint(&self) -> Endpoint {
        match self.link.direction {
            Direction::Push => Endpoint::local(),
            Direction::Pull => self.link.endpoint.clone(),
        }
    }

    pub fn destination_endpoint(&self) -> Endpoint {
        match self.link.direction {
            Direction::Push => self.link.endpoint.clone(),
            Direction::Pull => Endpoint::local(),
        }
    }

    /// Build the send/receive request for `step`.
    pub fn request(&self, step: &TransferStep) -> TransferRequest {
        TransferRequest {
            source_volume: self.source_volume().to_string(),
            from: step.from.clone(),
            to: step.to.clone(),
            target_volume: self.destination_volume().to_string(),
            buffer_size: self.link.buffer_size.clone(),
            endpoint: self.link.endpoint.clone(),
            direction: self.link.direction,
            compression: self.link.compression.clone(),
        }
    }
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Snapshots that arrived on the destination, in order.
    pub transferred: Vec<String>,
    pub full: bool,
}

/// Last entry of `source` that also appears in `destination`.
pub fn common_ancestor<'a>(source: &'a [String], destination: &[String]) -> Option<&'a str> {
    source
        .iter()
        .rev()
        .find(|name| destination.contains(*name))
        .map(String::as_str)
}

/// Compute transfer steps from the two snapshot lists.
///
/// `source` and `destination` are creation-ordered; non-date names are
/// ignored for ancestor discovery and chain building.
pub fn plan_transfer(source: &[String], destination: &[String]) -> Vec<TransferStep> {
    let source = dated_only(source);
    let dated_destination = dated_only(destination);

    if destination.is_empty() {
        return match source.last() {
            Some(newest) => vec![TransferStep::full(newest.clone())],
            None => Vec::new(),
        };
    }

    let Some(ancestor) = common_ancestor(&source, &dated_destination) else {
        return Vec::new();
    };

    let start = source
        .iter()
        .position(|name| name == ancestor)
        .unwrap_or(source.len());
    source[start..]
        .windows(2)
        .map(|pair| TransferStep::incremental(pair[0].clone(), pair[1].clone()))
        .collect()
}

/// Dated entries of `list` created before `ancestor`.
pub fn older_than(list: &[String], ancestor: &str) -> Vec<String> {
    let dated = dated_only(list);
    match dated.iter().position(|name| name == ancestor) {
        Some(end) => dated[..end].to_vec(),
        None => Vec::new(),
    }
}

/// Fetch the remote snapshot list and plan the transfer for `volume`.
///
/// `local` is the creation-ordered local snapshot list, already including
/// a snapshot taken earlier in this cycle.
pub async fn replicate<V: VolumeManager>(
    inventory: &V,
    volume: &str,
    local: &[String],
    link: &ReplicationLink,
) -> Result<TransferPlan> {
    let remote = inventory
        .list_snapshots(Some(link.remote_volume.as_str()), &link.endpoint)
        .await?
        .remove(link.remote_volume.as_str())
        .unwrap_or_default();

    let (source, destination) = match link.direction {
        Direction::Push => (local, remote.as_slice()),
        Direction::Pull => (remote.as_slice(), local),
    };

    let steps = plan_transfer(source, destination);
    debug!(
        volume,
        direction = %link.direction,
        endpoint = %link.endpoint,
        remote_volume = %link.remote_volume,
        steps = steps.len(),
        "Replication plan computed"
    );

    let dated_source = dated_only(source);
    let ancestor = common_ancestor(&dated_source, &dated_only(destination));
    if steps.is_empty()
        && !destination.is_empty()
        && !dated_source.is_empty()
        && ancestor.is_none()
    {
        warn!(
            volume,
            remote_volume = %link.remote_volume,
            "No common snapshot with destination, not replicating"
        );
    }

    let (stale_source, stale_destination) = match ancestor {
        Some(ancestor) => (older_than(source, ancestor), older_than(destination, ancestor)),
        None => (Vec::new(), Vec::new()),
    };

    Ok(TransferPlan {
        volume: volume.to_string(),
        link: link.clone(),
        steps,
        stale_source,
        stale_destination,
    })
}

/// Execute `plan`: send each step, then move the holds forward.
///
/// A failure aborts the remaining steps and is returned as
/// [`SnapshotError::PartialReplication`]; holds placed by completed steps
/// stay where they are. After the last step, leftover holds on snapshots
/// older than the common ancestor are released.
pub async fn execute<V: VolumeManager>(
    inventory: &V,
    plan: &TransferPlan,
) -> Result<ReplicationReport> {
    let mut report = ReplicationReport {
        transferred: Vec::new(),
        full: plan.is_full(),
    };
    if plan.is_empty() {
        return Ok(report);
    }

    let total = plan.steps.len();
    info!(
        volume = %plan.volume,
        direction = %plan.link.direction,
        endpoint = %plan.link.endpoint,
        steps = total,
        full = report.full,
        "Replicating"
    );

    for (index, step) in plan.steps.iter().enumerate() {
        if let Err(e) = execute_step(inventory, plan, step).await {
            metrics::record_replication_failure(&plan.volume, e.kind());
            return Err(SnapshotError::PartialReplication {
                volume: plan.volume.clone(),
                completed: index,
                total,
                source: Box::new(e),
            });
        }
        report.transferred.push(step.to.clone());
    }

    release_stale_holds(inventory, plan).await;
    info!(volume = %plan.volume, transferred = total, "Replication complete");
    Ok(report)
}

/// Release `zsm` holds left on snapshots older than the common ancestor.
///
/// Failures are logged; the transfer already succeeded.
async fn release_stale_holds<V: VolumeManager>(inventory: &V, plan: &TransferPlan) {
    let sides = [
        (plan.source_volume(), plan.source_endpoint(), &plan.stale_source),
        (plan.destination_volume(), plan.destination_endpoint(), &plan.stale_destination),
    ];
    for (volume, endpoint, snapshots) in sides {
        for snapshot in snapshots {
            let released = match inventory.is_held(volume, snapshot, &endpoint).await {
                Ok(true) => inventory.release(volume, snapshot, &endpoint).await.map(|_| true),
                Ok(false) => Ok(false),
                Err(e) => Err(e),
            };
            match released {
                Ok(true) => info!(
                    volume,
                    snapshot = %snapshot,
                    endpoint = %endpoint,
                    "Released stale hold"
                ),
                Ok(false) => {}
                Err(e) => warn!(
                    volume,
                    snapshot = %snapshot,
                    endpoint = %endpoint,
                    error = %e,
                    "Could not release stale hold"
                ),
            }
        }
    }
}

/// Hold `snapshot`, accepting a hold that is already in place.
async fn ensure_held<V: VolumeManager>(
    inventory: &V,
    volume: &str,
    snapshot: &str,
    endpoint: &Endpoint,
) -> Result<()> {
    match inventory.hold(volume, snapshot, endpoint).await {
        Ok(()) => Ok(()),
        Err(e) => match inventory.is_held(volume, snapshot, endpoint).await {
            Ok(true) => {
                debug!(volume, snapshot, endpoint = %endpoint, "Snapshot already held");
                Ok(())
            }
            _ => Err(e),
        },
    }
}

async fn execute_step<V: VolumeManager>(
    inventory: &V,
    plan: &TransferPlan,
    step: &TransferStep,
) -> Result<()> {
    let source_volume = plan.source_volume();
    let destination_volume = plan.destination_volume();
    let source_endpoint = plan.source_endpoint();
    let destination_endpoint = plan.destination_endpoint();

    match inventory
        .estimate_transfer_size(
            source_volume,
            step.from.as_deref(),
            &step.to,
            &source_endpoint,
        )
        .await
    {
        Ok(size) => info!(
            volume = %plan.volume,
            from = step.from.as_deref().unwrap_or("-"),
            to = %step.to,
            size = %size,
            "Sending snapshot"
        ),
        Err(e) => {
            warn!(volume = %plan.volume, to = %step.to, error = %e, "Size estimate failed");
            info!(
                volume = %plan.volume,
                from = step.from.as_deref().unwrap_or("-"),
                to = %step.to,
                "Sending snapshot"
            );
        }
    }

    let started = Instant::now();
    inventory.send_receive(&plan.request(step)).await?;
    metrics::record_transfer(
        &plan.volume,
        &plan.link.direction.to_string(),
        step.from.is_none(),
        started.elapsed(),
    );

    ensure_held(inventory, source_volume, &step.to, &source_endpoint).await?;
    ensure_held(inventory, destination_volume, &step.to, &destination_endpoint).await?;

    if let Some(previous) = &step.from {
        inventory
            .release(source_volume, previous, &source_endpoint)
            .await?;
        inventory
            .release(destination_volume, previous, &destination_endpoint)
            .await?;
    }

    debug!(volume = %plan.volume, snapshot = %step.to, "Transfer step complete");
    Ok(())
}
