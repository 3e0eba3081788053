// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Volume inventory: everything the manager needs from the volume manager.
//!
//! The engines never shell out themselves. They talk to a [`VolumeManager`],
//! which the daemon backs with [`ZfsInventory`] (the `zfs` CLI through the
//! [`RemoteExecutor`]) and tests back with an in-memory fake.
//!
//! # Commands
//!
//! ```text
//! list volumes     zfs list -H -o name
//! list snapshots   zfs list -H -o name -s creation -t snapshot [-d 1 <vol>] || true
//! create           zfs snapshot [-r] <vol>@<name>
//! destroy          zfs destroy [-r] <vol>@<name>
//! hold / release   zfs hold zsm <vol>@<name> / zfs release zsm <vol>@<name> || true
//! is held          zfs holds -H <vol>@<name>
//! size estimate    zfs send -nv [-i <vol>@<from>] <vol>@<to> 2>&1 | grep 'total estimated size is'
//! transfer         zfs send ... | [compress] | mbuffer | <endpoint> '... | zfs receive -F <target>'
//! ```
//!
//! All remote commands are wrapped by [`Endpoint::wrap`].

use crate::error::{Result, SnapshotError};
use crate::executor::{BoxFuture, CommandRunner, Endpoint, RemoteExecutor, ShellRunner};
use std::collections::BTreeMap;
use tracing::debug;

/// Tag used for every hold this manager places.
pub const HOLD_TAG: &str = "zsm";

/// mbuffer block size used on both ends of a transfer.
const MBUFFER_BLOCK_SIZE: &str = "128k";

/// Ordered snapshot names per volume, in creation order.
pub type SnapshotInventory = BTreeMap<String, Vec<String>>;

/// Replication direction relative to the locally managed volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local volume is the source, the remote `target` receives.
    Push,
    /// Remote `source` is the source, the local volume receives.
    Pull,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Push => write!(f, "push"),
            Direction::Pull => write!(f, "pull"),
        }
    }
}

/// One send/receive invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Dataset on the sending side.
    pub source_volume: String,
    /// Incremental base; `None` for a full send.
    pub from: Option<String>,
    /// Snapshot being sent.
    pub to: String,
    /// Dataset on the receiving side.
    pub target_volume: String,
    /// mbuffer memory size (e.g. `512M`).
    pub buffer_size: String,
    /// The non-local side of the link.
    pub endpoint: Endpoint,
    pub direction: Direction,
    /// Compression program (`gzip`, `lz4`, ...), run as `<c> -c` / `<c> -cd`.
    pub compression: Option<String>,
}

/// Trait defining what we need from the volume manager.
///
/// All operations are awaited one at a time by the scheduler; implementors do
/// not need to be reentrant. `endpoint` selects the host an operation runs on.
pub trait VolumeManager: Send + Sync + 'static {
    /// All volumes (datasets) known on this host, in listing order.
    fn list_volumes(&self) -> BoxFuture<'_, Vec<String>>;

    /// Snapshot names per volume, creation-ordered.
    ///
    /// With `volume` set only that volume is listed; a volume without
    /// snapshots (or that does not exist) is absent from the map.
    fn list_snapshots<'a>(
        &'a self,
        volume: Option<&'a str>,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, SnapshotInventory>;

    fn create_snapshot<'a>(
        &'a self,
        volume: &'a str,
        name: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, ()>;

    fn destroy_snapshot<'a>(
        &'a self,
        volume: &'a str,
        name: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, ()>;

    /// Dry-run size of a send, as a human readable string (`1.5GiB`).
    fn estimate_transfer_size<'a>(
        &'a self,
        volume: &'a str,
        from: Option<&'a str>,
        to: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, String>;

    fn send_receive<'a>(&'a self, request: &'a TransferRequest) -> BoxFuture<'a, ()>;

    fn hold<'a>(
        &'a self,
        volume: &'a str,
        snapshot: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, ()>;

    /// Release a hold. Releasing a snapshot that is not held is not an error.
    fn release<'a>(
        &'a self,
        volume: &'a str,
        snapshot: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, ()>;

    fn is_held<'a>(
        &'a self,
        volume: &'a str,
        snapshot: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, bool>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command builders
// ═══════════════════════════════════════════════════════════════════════════════

fn recursive_flag(recursive: bool) -> &'static str {
    if recursive {
        "-r "
    } else {
        ""
    }
}

pub fn list_volumes_command() -> String {
    "zfs list -H -o name".to_string()
}

pub fn list_snapshots_command(volume: Option<&str>) -> String {
    match volume {
        Some(volume) => format!(
            "zfs list -H -o name -s creation -t snapshot -d 1 {} || true",
            volume
        ),
        None => "zfs list -H -o name -s creation -t snapshot || true".to_string(),
    }
}

pub fn snapshot_command(volume: &str, name: &str, recursive: bool) -> String {
    format!("zfs snapshot {}{}@{}", recursive_flag(recursive), volume, name)
}

pub fn destroy_command(volume: &str, name: &str, recursive: bool) -> String {
    format!("zfs destroy {}{}@{}", recursive_flag(recursive), volume, name)
}

pub fn hold_command(volume: &str, snapshot: &str) -> String {
    format!("zfs hold {} {}@{}", HOLD_TAG, volume, snapshot)
}

pub fn release_command(volume: &str, snapshot: &str) -> String {
    format!("zfs release {} {}@{} || true", HOLD_TAG, volume, snapshot)
}

pub fn holds_command(volume: &str, snapshot: &str) -> String {
    format!("zfs holds -H {}@{}", volume, snapshot)
}

fn send_command(volume: &str, from: Option<&str>, to: &str, dry_run: bool) -> String {
    let mut command = String::from("zfs send ");
    if dry_run {
        command.push_str("-nv ");
    }
    if let Some(from) = from {
        command.push_str(&format!("-i {}@{} ", volume, from));
    }
    command.push_str(&format!("{}@{}", volume, to));
    command
}

/// Full command line for a dry-run size estimate on `endpoint`.
pub fn size_command(volume: &str, from: Option<&str>, to: &str, endpoint: &Endpoint) -> String {
    format!(
        "{} 2>&1 | grep 'total estimated size is'",
        endpoint.wrap(&send_command(volume, from, to, true))
    )
}

/// Full command line for a send/receive pipeline.
///
/// A local endpoint pipes straight into `zfs receive`. Remote transfers are
/// buffered with mbuffer on both sides and optionally compressed in flight.
pub fn transfer_command(request: &TransferRequest) -> String {
    let send = send_command(
        &request.source_volume,
        request.from.as_deref(),
        &request.to,
        false,
    );
    let receive = format!("zfs receive -F {}", request.target_volume);

    if request.endpoint.is_local() {
        return format!("{} | {}", send, receive);
    }

    let (compress, decompress) = match request.compression.as_deref() {
        Some(codec) => (format!(" | {} -c", codec), format!(" | {} -cd", codec)),
        None => (String::new(), String::new()),
    };
    let buffer = &request.buffer_size;
    let mbuffer_out = format!("mbuffer -q -v 0 -s {} -m {}", MBUFFER_BLOCK_SIZE, buffer);
    let mbuffer_in = format!("mbuffer -s {} -m {}", MBUFFER_BLOCK_SIZE, buffer);

    match request.direction {
        Direction::Push => format!(
            "{}{} | {} | {}",
            send,
            compress,
            mbuffer_out,
            request
                .endpoint
                .wrap(&format!("{}{} | {}", mbuffer_in, decompress, receive)),
        ),
        Direction::Pull => format!(
            "{} | {}{} | {}",
            request
                .endpoint
                .wrap(&format!("{}{} | {}", send, compress, mbuffer_out)),
            mbuffer_in,
            decompress,
            receive,
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output parsers
// ═══════════════════════════════════════════════════════════════════════════════

/// First column of every non-empty row.
pub fn parse_volume_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split('\t').find(|part| !part.is_empty()))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Group `volume@snapshot` rows by volume, keeping row order.
pub fn parse_snapshot_listing(output: &str) -> SnapshotInventory {
    let mut snapshots = SnapshotInventory::new();
    for full_name in parse_volume_listing(output) {
        let Some((volume, snapshot)) = full_name.split_once('@') else {
            continue;
        };
        snapshots
            .entry(volume.to_string())
            .or_default()
            .push(snapshot.to_string());
    }
    snapshots
}

/// Check `zfs holds -H` output for our tag.
pub fn parse_holds(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.split('\t').nth(1).map(str::trim) == Some(HOLD_TAG))
}

/// Turn `total estimated size is 1.5G` into `1.5GiB` (or `812B`).
pub fn parse_estimated_size(output: &str) -> Option<String> {
    let size = output.split_whitespace().last()?;
    let last = size.chars().last()?;
    if last.is_ascii_digit() {
        Some(format!("{}B", size))
    } else {
        Some(format!("{}iB", size))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ZFS CLI implementation
// ═══════════════════════════════════════════════════════════════════════════════

/// [`VolumeManager`] backed by the `zfs` command line tool.
pub struct ZfsInventory<R: CommandRunner = ShellRunner> {
    executor: RemoteExecutor<R>,
}

impl Default for ZfsInventory<ShellRunner> {
    fn default() -> Self {
        Self::new(RemoteExecutor::default())
    }
}

impl<R: CommandRunner> ZfsInventory<R> {
    pub fn new(executor: RemoteExecutor<R>) -> Self {
        Self { executor }
    }

    /// Get the executor (for hooks and diagnostics).
    pub fn executor(&self) -> &RemoteExecutor<R> {
        &self.executor
    }
}

impl<R: CommandRunner> VolumeManager for ZfsInventory<R> {
    fn list_volumes(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            let output = self
                .executor
                .run(&list_volumes_command(), &Endpoint::local())
                .await?;
            Ok(parse_volume_listing(&output))
        })
    }

    fn list_snapshots<'a>(
        &'a self,
        volume: Option<&'a str>,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, SnapshotInventory> {
        Box::pin(async move {
            let output = self
                .executor
                .run(&list_snapshots_command(volume), endpoint)
                .await?;
            let mut snapshots = parse_snapshot_listing(&output);
            // `-d 1` never lists children, but keep the contract explicit.
            if let Some(volume) = volume {
                snapshots.retain(|name, _| name == volume);
            }
            Ok(snapshots)
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume: &'a str,
        name: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.executor
                .run(&snapshot_command(volume, name, recursive), &Endpoint::local())
                .await?;
            Ok(())
        })
    }

    fn destroy_snapshot<'a>(
        &'a self,
        volume: &'a str,
        name: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.executor
                .run(&destroy_command(volume, name, recursive), &Endpoint::local())
                .await?;
            Ok(())
        })
    }

    fn estimate_transfer_size<'a>(
        &'a self,
        volume: &'a str,
        from: Option<&'a str>,
        to: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let line = size_command(volume, from, to, endpoint);
            let output = self.executor.run_raw(&line).await?;
            parse_estimated_size(&output).ok_or_else(|| {
                SnapshotError::Internal(format!("no size estimate in output of `{}`", line))
            })
        })
    }

    fn send_receive<'a>(&'a self, request: &'a TransferRequest) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let line = transfer_command(request);
            debug!(
                direction = %request.direction,
                endpoint = %request.endpoint,
                "Starting transfer"
            );
            self.executor.run_raw(&line).await?;
            Ok(())
        })
    }

    fn hold<'a>(
        &'a self,
        volume: &'a str,
        snapshot: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.executor
                .run(&hold_command(volume, snapshot), endpoint)
                .await?;
            Ok(())
        })
    }

    fn release<'a>(
        &'a self,
        volume: &'a str,
        snapshot: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.executor
                .run(&release_command(volume, snapshot), endpoint)
                .await?;
            Ok(())
        })
    }

    fn is_held<'a>(
        &'a self,
        volume: &'a str,
        snapshot: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let output = self
                .executor
                .run(&holds_command(volume, snapshot), endpoint)
                .await?;
            Ok(parse_holds(&output))
        })
    }
}
