//! Mock CommandRunner for hook testing.
//!
//! Records every command line and fails the ones registered with
//! [`MockRunner::fail`].

use snapshot_manager::executor::{BoxFuture, CommandRunner};
use snapshot_manager::SnapshotError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Shared view of a runner's recorded commands.
pub type CommandLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct MockRunner {
    log: CommandLog,
    failing: HashSet<String>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` exit non-zero.
    pub fn fail(mut self, command: &str) -> Self {
        self.failing.insert(command.to_string());
        self
    }

    /// Handle to the command log, usable after the runner is moved.
    pub fn log(&self) -> CommandLog {
        Arc::clone(&self.log)
    }
}

impl CommandRunner for MockRunner {
    fn run<'a>(&'a self, command: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move {
            self.log.lock().unwrap().push(command.to_string());
            if self.failing.contains(command) {
                return Err(SnapshotError::Command {
                    command: command.to_string(),
                    code: Some(1),
                    stderr: "hook failed".to_string(),
                });
            }
            Ok(String::new())
        })
    }
}
