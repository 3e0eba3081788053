// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the snapshot manager.
//!
//! Errors are categorized by where they originate and whether they are
//! fatal to the process or only to the volume being processed.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Config` | Yes | Configuration file or retention schema invalid |
//! | `Command` | No | External command exited non-zero |
//! | `Io` | No | Spawning a command or touching the trigger file failed |
//! | `PartialReplication` | No | A step of an incremental chain failed |
//! | `Internal` | No | Unexpected internal error |
//!
//! Non-fatal errors are caught at the per-volume boundary by the scheduler
//! and never cross into the processing of another volume. Snapshot names that
//! are not `YYYYMMDD` dates are not errors at all; they are skipped.

use thiserror::Error;

/// Result type alias for snapshot manager operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while managing snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Invalid or missing configuration.
    ///
    /// Raised while loading the configuration file: malformed TOML, bad
    /// retention schema, bad trigger time, or an ambiguous replication link.
    /// Fatal at startup - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// External command failure.
    ///
    /// The command ran but exited with a non-zero status. Carries the exit
    /// code (`None` when killed by a signal) and captured stderr.
    #[error("Command `{command}` failed with exit code {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Local I/O failure (spawning a shell, removing a trigger file).
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A step of a multi-step replication chain failed.
    ///
    /// `completed` steps finished (and their holds remain in place); the
    /// remaining steps were skipped and resume next cycle from the last
    /// completed snapshot.
    #[error("Replication of {volume} stopped after {completed}/{total} steps: {source}")]
    PartialReplication {
        volume: String,
        completed: usize,
        total: usize,
        #[source]
        source: Box<SnapshotError>,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapshotError {
    /// Create an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Command { .. } => "command",
            Self::Io { .. } => "io",
            Self::PartialReplication { .. } => "partial_replication",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<toml::de::Error> for SnapshotError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
