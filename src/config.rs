//! Configuration for the snapshot manager.
//!
//! The manager reads one TOML file at startup (default
//! [`DEFAULT_CONFIG_PATH`]). Volumes are keyed by dataset name; a volume that
//! is configured but not present in the volume listing is skipped.
//!
//! # Configuration Structure
//!
//! ```text
//! ManagerConfig
//! ├── daemon: DaemonConfig
//! │   └── interval: "5m"              # pause between passes (humantime)
//! └── volumes: { name → VolumeConfig }
//!     ├── mountpoint, time, snapshot, recursive, schema
//!     ├── preexec, postexec           # optional shell hooks
//!     └── replicate: ReplicateConfig  # optional
//!         └── endpoint, target|source, compression, buffer_size
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! [daemon]
//! interval = "5m"
//!
//! [volumes."tank/data"]
//! mountpoint = "/tank/data"
//! time = "21:00"
//! snapshot = true
//! schema = "7d3w11m4y"
//!
//! [volumes."tank/data".replicate]
//! endpoint = "ssh root@backup"
//! target = "backup/data"
//! compression = "lz4"
//! ```
//!
//! Raw configs are checked with [`ManagerConfig::validate`], which turns every
//! volume into a [`VolumeSettings`] with parsed trigger, schema and link. Any
//! problem is a [`SnapshotError::Config`], fatal at startup.

use crate::error::{Result, SnapshotError};
use crate::executor::Endpoint;
use crate::replication::{ReplicationLink, DEFAULT_BUFFER_SIZE};
use crate::retention::RetentionSchema;
use crate::scheduler::trigger::Trigger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the binary looks for its configuration by default.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/zfssnapmanager.toml";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: one file, loaded once at startup
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Per-volume settings keyed by dataset name.
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeConfig>,
}

impl ManagerConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse the configuration file at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SnapshotError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate every volume, producing typed settings.
    pub fn validate(&self) -> Result<BTreeMap<String, VolumeSettings>> {
        self.daemon.interval()?;
        self.volumes
            .iter()
            .map(|(name, volume)| -> Result<(String, VolumeSettings)> {
                Ok((name.clone(), volume.validate(name)?))
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DaemonConfig: loop timing
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Pause between two passes (e.g. "5m", "30s").
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    "5m".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

impl DaemonConfig {
    /// Parse `interval` as a duration.
    pub fn interval(&self) -> Result<Duration> {
        let interval = humantime::parse_duration(&self.interval).map_err(|e| {
            SnapshotError::Config(format!("daemon.interval {:?}: {}", self.interval, e))
        })?;
        if interval.is_zero() {
            return Err(SnapshotError::Config(
                "daemon.interval must be greater than zero".to_string(),
            ));
        }
        Ok(interval)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VolumeConfig: raw per-volume settings as written in the file
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeConfig {
    /// Where the volume is mounted; required for `time = "trigger"`.
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,

    /// `"HH:MM"`, `"trigger"` or `"execute-cli"`.
    pub time: String,

    /// Take a daily snapshot when due.
    #[serde(default = "default_true")]
    pub snapshot: bool,

    /// Create and destroy snapshots recursively (`-r`).
    #[serde(default)]
    pub recursive: bool,

    /// Retention schema, e.g. `"7d3w11m4y"`.
    pub schema: String,

    #[serde(default)]
    pub preexec: Option<String>,

    #[serde(default)]
    pub postexec: Option<String>,

    #[serde(default)]
    pub replicate: Option<ReplicateConfig>,
}

fn default_true() -> bool {
    true
}

impl VolumeConfig {
    /// Create a minimal volume config for testing.
    pub fn for_testing(time: &str, schema: &str) -> Self {
        Self {
            mountpoint: None,
            time: time.to_string(),
            snapshot: true,
            recursive: false,
            schema: schema.to_string(),
            preexec: None,
            postexec: None,
            replicate: None,
        }
    }

    fn validate(&self, name: &str) -> Result<VolumeSettings> {
        let context = |e: SnapshotError| match e {
            SnapshotError::Config(msg) => SnapshotError::Config(format!("volume {}: {}", name, msg)),
            other => other,
        };

        let trigger: Trigger = self.time.parse().map_err(context)?;
        if trigger == Trigger::File && self.mountpoint.is_none() {
            return Err(context(SnapshotError::Config(
                "time = \"trigger\" requires a mountpoint".to_string(),
            )));
        }
        let schema: RetentionSchema = self.schema.parse().map_err(context)?;
        let replication = self
            .replicate
            .as_ref()
            .map(ReplicateConfig::link)
            .transpose()
            .map_err(context)?;

        Ok(VolumeSettings {
            name: name.to_string(),
            mountpoint: self.mountpoint.clone(),
            trigger,
            take_snapshot: self.snapshot,
            recursive: self.recursive,
            schema,
            replication,
            preexec: non_blank(&self.preexec),
            postexec: non_blank(&self.postexec),
        })
    }
}

fn non_blank(command: &Option<String>) -> Option<String> {
    command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicateConfig: raw replication link
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicateConfig {
    /// Remote-shell prefix; empty for a same-host link.
    #[serde(default)]
    pub endpoint: Endpoint,

    /// Push to this dataset on the endpoint.
    #[serde(default)]
    pub target: Option<String>,

    /// Pull from this dataset on the endpoint.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub compression: Option<String>,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: String,
}

fn default_buffer_size() -> String {
    DEFAULT_BUFFER_SIZE.to_string()
}

impl ReplicateConfig {
    /// Build the link, requiring exactly one of `target` and `source`.
    pub fn link(&self) -> Result<ReplicationLink> {
        let endpoint = Endpoint::remote(self.endpoint.as_str());
        let mut link = match (&self.target, &self.source) {
            (Some(target), None) => ReplicationLink::push(endpoint, target.clone()),
            (None, Some(source)) => ReplicationLink::pull(endpoint, source.clone()),
            (Some(_), Some(_)) => {
                return Err(SnapshotError::Config(
                    "replicate: set either target or source, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(SnapshotError::Config(
                    "replicate: one of target or source is required".to_string(),
                ))
            }
        };
        if link.remote_volume.trim().is_empty() {
            return Err(SnapshotError::Config(
                "replicate: remote dataset name is empty".to_string(),
            ));
        }
        if let Some(compression) = non_blank(&self.compression) {
            link = link.with_compression(compression);
        }
        Ok(link.with_buffer_size(self.buffer_size.clone()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VolumeSettings: validated, immutable per-volume settings
// ═══════════════════════════════════════════════════════════════════════════════

/// A volume's configuration after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSettings {
    pub name: String,
    pub mountpoint: Option<PathBuf>,
    pub trigger: Trigger,
    pub take_snapshot: bool,
    pub recursive: bool,
    pub schema: RetentionSchema,
    pub replication: Option<ReplicationLink>,
    pub preexec: Option<String>,
    pub postexec: Option<String>,
}

impl VolumeSettings {
    /// Create settings for testing: snapshotting on, no hooks, no link.
    pub fn for_testing(name: &str, trigger: Trigger, schema: RetentionSchema) -> Self {
        Self {
            name: name.to_string(),
            mountpoint: None,
            trigger,
            take_snapshot: true,
            recursive: false,
            schema,
            replication: None,
            preexec: None,
            postexec: None,
        }
    }

    /// Check if this volume has anything to do when triggered.
    pub fn is_active(&self) -> bool {
        self.take_snapshot || self.replication.is_some()
    }
}
