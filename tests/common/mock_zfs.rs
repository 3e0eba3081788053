//! In-memory VolumeManager for testing.
//!
//! Models one local host plus any number of remote hosts keyed by
//! [`Endpoint`]. Each host has datasets, creation-ordered snapshots and
//! `zsm` holds. Behaves like ZFS where the engines care:
//! - destroying a held snapshot fails
//! - creating an existing snapshot fails, recursively for `-r`
//! - a recursive snapshot also lands on every child dataset
//! - holding an already held snapshot fails (`tag already exists`)
//! - an incremental receive needs the base on both sides and rolls the
//!   destination back to it (`receive -F`)
//!
//! Every call is recorded as a one-line string so tests can assert order:
//!
//! ```text
//! list_volumes
//! list_snapshots local tank/data
//! snapshot local tank/data@20240103
//! estimate local tank/data@20240103
//! send tank/data@20240103
//! hold ssh backup backup/data@20240103
//! release local tank/data@20240102
//! is_held local tank/data@20240101
//! destroy local tank/data@20240101
//! ```
//!
//! A call whose line was registered with [`MockZfs::fail_call`] returns a
//! command error instead of taking effect.

use snapshot_manager::executor::BoxFuture;
use snapshot_manager::inventory::{Direction, SnapshotInventory, TransferRequest, VolumeManager};
use snapshot_manager::{Endpoint, SnapshotError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Host {
    volumes: Vec<String>,
    snapshots: BTreeMap<String, Vec<String>>,
    holds: HashSet<(String, String)>,
}

impl Host {
    fn ensure_volume(&mut self, volume: &str) {
        if !self.volumes.iter().any(|v| v == volume) {
            self.volumes.push(volume.to_string());
        }
    }
}

/// Mock volume manager backed by in-memory hosts.
pub struct MockZfs {
    hosts: Mutex<HashMap<Endpoint, Host>>,
    calls: Mutex<Vec<String>>,
    transfers: Mutex<Vec<TransferRequest>>,
    failing: Mutex<HashSet<String>>,
}

impl Default for MockZfs {
    fn default() -> Self {
        Self::new()
    }
}

impl MockZfs {
    /// Create a mock with an empty local host.
    pub fn new() -> Self {
        let mut hosts = HashMap::new();
        hosts.insert(Endpoint::local(), Host::default());
        Self {
            hosts: Mutex::new(hosts),
            calls: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Add a local volume with the given snapshots.
    pub fn with_volume(self, volume: &str, snapshots: &[&str]) -> Self {
        self.add_volume(&Endpoint::local(), volume, snapshots);
        self
    }

    /// Add a volume on a remote host.
    pub fn with_remote_volume(self, endpoint: &Endpoint, volume: &str, snapshots: &[&str]) -> Self {
        self.add_volume(endpoint, volume, snapshots);
        self
    }

    pub fn add_volume(&self, endpoint: &Endpoint, volume: &str, snapshots: &[&str]) {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts.entry(endpoint.clone()).or_default();
        host.ensure_volume(volume);
        let list = host.snapshots.entry(volume.to_string()).or_default();
        list.extend(snapshots.iter().map(|s| s.to_string()));
    }

    /// Place a hold directly, bypassing the call log.
    pub fn set_held(&self, endpoint: &Endpoint, volume: &str, snapshot: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts.entry(endpoint.clone()).or_default();
        host.holds.insert((volume.to_string(), snapshot.to_string()));
    }

    /// Make the call with this exact log line fail.
    pub fn fail_call(&self, line: &str) {
        self.failing.lock().unwrap().insert(line.to_string());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn snapshots(&self, endpoint: &Endpoint, volume: &str) -> Vec<String> {
        let hosts = self.hosts.lock().unwrap();
        hosts
            .get(endpoint)
            .and_then(|h| h.snapshots.get(volume))
            .cloned()
            .unwrap_or_default()
    }

    /// Held snapshots of `volume`, sorted.
    pub fn held(&self, endpoint: &Endpoint, volume: &str) -> Vec<String> {
        let hosts = self.hosts.lock().unwrap();
        let mut held: Vec<String> = hosts
            .get(endpoint)
            .map(|h| {
                h.holds
                    .iter()
                    .filter(|(v, _)| v == volume)
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default();
        held.sort();
        held
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls starting with `prefix`.
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
        self.transfers.lock().unwrap().clear();
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().unwrap().clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn record(&self, line: String) -> Result<(), SnapshotError> {
        let failing = self.failing.lock().unwrap().contains(&line);
        self.calls.lock().unwrap().push(line.clone());
        if failing {
            return Err(command_error(&line, "injected failure"));
        }
        Ok(())
    }
}

fn command_error(command: &str, stderr: &str) -> SnapshotError {
    SnapshotError::Command {
        command: command.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

impl VolumeManager for MockZfs {
    fn list_volumes(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.record("list_volumes".to_string())?;
            let hosts = self.hosts.lock().unwrap();
            Ok(hosts
                .get(&Endpoint::local())
                .map(|h| h.volumes.clone())
                .unwrap_or_default())
        })
    }

    fn list_snapshots<'a>(
        &'a self,
        volume: Option<&'a str>,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, SnapshotInventory> {
        Box::pin(async move {
            self.record(format!("list_snapshots {} {}", endpoint, volume.unwrap_or("*")))?;
            let hosts = self.hosts.lock().unwrap();
            let Some(host) = hosts.get(endpoint) else {
                return Ok(SnapshotInventory::new());
            };
            Ok(host
                .snapshots
                .iter()
                .filter(|(name, list)| !list.is_empty() && volume.map_or(true, |v| v == *name))
                .map(|(name, list)| (name.clone(), list.clone()))
                .collect())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        volume: &'a str,
        name: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let line = format!("snapshot local {}@{}", volume, name);
            self.record(line.clone())?;
            let mut hosts = self.hosts.lock().unwrap();
            let host = hosts.entry(Endpoint::local()).or_default();
            host.ensure_volume(volume);
            let prefix = format!("{}/", volume);
            let targets: Vec<String> = host
                .volumes
                .iter()
                .filter(|v| *v == volume || (recursive && v.starts_with(&prefix)))
                .cloned()
                .collect();
            for target in &targets {
                let exists = host
                    .snapshots
                    .get(target)
                    .is_some_and(|list| list.iter().any(|s| s == name));
                if exists {
                    return Err(command_error(&line, "dataset already exists"));
                }
            }
            for target in targets {
                host.snapshots.entry(target).or_default().push(name.to_string());
            }
            Ok(())
        })
    }

    fn destroy_snapshot<'a>(
        &'a self,
        volume: &'a str,
        name: &'a str,
        _recursive: bool,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let line = format!("destroy local {}@{}", volume, name);
            self.record(line.clone())?;
            let mut hosts = self.hosts.lock().unwrap();
            let host = hosts.entry(Endpoint::local()).or_default();
            if host.holds.contains(&(volume.to_string(), name.to_string())) {
                return Err(command_error(&line, "dataset is busy"));
            }
            let list = host.snapshots.entry(volume.to_string()).or_default();
            let before = list.len();
            list.retain(|s| s != name);
            if list.len() == before {
                return Err(command_error(&line, "could not find any snapshots to destroy"));
            }
            Ok(())
        })
    }

    fn estimate_transfer_size<'a>(
        &'a self,
        volume: &'a str,
        _from: Option<&'a str>,
        to: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move {
            self.record(format!("estimate {} {}@{}", endpoint, volume, to))?;
            Ok("1.5GiB".to_string())
        })
    }

    fn send_receive<'a>(&'a self, request: &'a TransferRequest) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let line = format!("send {}@{}", request.source_volume, request.to);
            self.record(line.clone())?;
            self.transfers.lock().unwrap().push(request.clone());

            let (source_endpoint, destination_endpoint) = match request.direction {
                Direction::Push => (Endpoint::local(), request.endpoint.clone()),
                Direction::Pull => (request.endpoint.clone(), Endpoint::local()),
            };

            let mut hosts = self.hosts.lock().unwrap();
            let source_list = hosts
                .get(&source_endpoint)
                .and_then(|h| h.snapshots.get(&request.source_volume))
                .cloned()
                .unwrap_or_default();
            if !source_list.contains(&request.to) {
                return Err(command_error(&line, "snapshot does not exist"));
            }

            let destination = hosts.entry(destination_endpoint).or_default();
            destination.ensure_volume(&request.target_volume);
            let list = destination
                .snapshots
                .entry(request.target_volume.clone())
                .or_default();
            match &request.from {
                Some(from) => {
                    if !source_list.contains(from) {
                        return Err(command_error(&line, "incremental source does not exist"));
                    }
                    let Some(pos) = list.iter().position(|s| s == from) else {
                        return Err(command_error(&line, "destination has no incremental base"));
                    };
                    list.truncate(pos + 1);
                }
                None => {
                    if !list.is_empty() {
                        return Err(command_error(&line, "destination has snapshots"));
                    }
                }
            }
            list.push(request.to.clone());
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
            let line = format!("hold {} {}@{}", endpoint, volume, snapshot);
            self.record(line.clone())?;
            let mut hosts = self.hosts.lock().unwrap();
            let host = hosts.entry(endpoint.clone()).or_default();
            let exists = host
                .snapshots
                .get(volume)
                .is_some_and(|list| list.iter().any(|s| s == snapshot));
            if !exists {
                return Err(command_error(&line, "dataset does not exist"));
            }
            if !host.holds.insert((volume.to_string(), snapshot.to_string())) {
                return Err(command_error(&line, "tag already exists on this dataset"));
            }
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
            self.record(format!("release {} {}@{}", endpoint, volume, snapshot))?;
            let mut hosts = self.hosts.lock().unwrap();
            if let Some(host) = hosts.get_mut(endpoint) {
                host.holds.remove(&(volume.to_string(), snapshot.to_string()));
            }
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
            self.record(format!("is_held {} {}@{}", endpoint, volume, snapshot))?;
            let hosts = self.hosts.lock().unwrap();
            Ok(hosts
                .get(endpoint)
                .is_some_and(|h| h.holds.contains(&(volume.to_string(), snapshot.to_string()))))
        })
    }
}
