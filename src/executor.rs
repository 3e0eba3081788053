// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote executor: shell command execution, locally or through a remote shell.
//!
//! Every interaction with the volume manager goes through here. A command is
//! run with `sh -c` in `/`; when an [`Endpoint`] is configured the command is
//! wrapped as `<endpoint> '<command>'` (e.g. `ssh root@backup 'zfs list'`).
//!
//! Output is sanitized to a restricted character set before anything parses
//! it as tab/newline delimited rows.
//!
//! # Testing
//!
//! [`CommandRunner`] is the seam: tests substitute a runner that records
//! command lines and replays canned output.

use crate::error::{Result, SnapshotError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Remote-shell prefix identifying the other side of a replication link.
///
/// Empty means "this host". Anything else is prepended verbatim to a
/// single-quoted command, so it is usually an `ssh` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    /// The local host.
    pub fn local() -> Self {
        Self(String::new())
    }

    /// A remote-shell endpoint such as `ssh -p 2222 root@backup`.
    pub fn remote(prefix: impl Into<String>) -> Self {
        Self(prefix.into().trim().to_string())
    }

    /// Check if commands run on this host.
    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap `command` for execution on this endpoint.
    pub fn wrap(&self, command: &str) -> String {
        if self.is_local() {
            command.to_string()
        } else {
            format!("{} '{}'", self.0, command)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_local() {
            write!(f, "local")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[^\n\t@ a-zA-Z0-9_\\.:/\-]+").expect("sanitize pattern is valid")
    })
}

/// Strip everything outside `[\n\t@ a-zA-Z0-9_\\.:/-]` from command output.
pub fn sanitize_output(raw: &str) -> String {
    unsafe_chars().replace_all(raw, "").into_owned()
}

/// Trait for running a fully-formed shell command line.
///
/// Implementations return raw stdout on success and
/// [`SnapshotError::Command`] on non-zero exit.
pub trait CommandRunner: Send + Sync + 'static {
    fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, String>;
}

/// Runs commands through `sh -c` using tokio's process support.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    cwd: PathBuf,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            cwd: PathBuf::from("/"),
        }
    }
}

impl ShellRunner {
    /// Use a different shell binary or working directory.
    pub fn with_shell(shell: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            cwd: cwd.into(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move {
            trace!(command, "Executing command");
            let output = tokio::process::Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .current_dir(&self.cwd)
                .output()
                .await
                .map_err(|e| SnapshotError::io(format!("spawn `{}`", command), e))?;

            if !output.status.success() {
                return Err(SnapshotError::Command {
                    command: command.to_string(),
                    code: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }
}

/// Runs volume-manager commands on the local host or a remote endpoint.
pub struct RemoteExecutor<R: CommandRunner = ShellRunner> {
    runner: R,
}

impl Default for RemoteExecutor<ShellRunner> {
    fn default() -> Self {
        Self::new(ShellRunner::default())
    }
}

impl<R: CommandRunner> RemoteExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Get a reference to the underlying runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run `command` on `endpoint` and return sanitized stdout.
    pub async fn run(&self, command: &str, endpoint: &Endpoint) -> Result<String> {
        let line = endpoint.wrap(command);
        debug!(endpoint = %endpoint, command = %line, "Running command");
        let raw = self.runner.run(&line).await?;
        Ok(sanitize_output(&raw))
    }

    /// Run a command line exactly as given (already wrapped or composite).
    pub async fn run_raw(&self, line: &str) -> Result<String> {
        debug!(command = %line, "Running command");
        let raw = self.runner.run(line).await?;
        Ok(sanitize_output(&raw))
    }
}
