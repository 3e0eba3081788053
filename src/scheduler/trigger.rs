// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! When a volume is due for processing.
//!
//! | Trigger | Fires when |
//! |---------|------------|
//! | `HH:MM` | wall clock ≥ HH:MM and no snapshot for today exists |
//! | `trigger` | `<mountpoint>/.trigger` exists (the file is consumed) |
//! | `execute-cli` | always |

use crate::error::{Result, SnapshotError};
use chrono::{NaiveTime, Timelike};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::info;

/// Name of the marker file a `trigger` volume waits for.
pub const TRIGGER_FILE_NAME: &str = ".trigger";

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("time pattern is valid"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Daily at a fixed local time.
    At(NaiveTime),
    /// When a `.trigger` file appears under the mountpoint.
    File,
    /// On every run.
    Always,
}

impl FromStr for Trigger {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trigger" => return Ok(Self::File),
            "execute-cli" => return Ok(Self::Always),
            _ => {}
        }

        let invalid = || {
            SnapshotError::Config(format!(
                "invalid time {:?} (expected \"HH:MM\", \"trigger\" or \"execute-cli\")",
                s
            ))
        };
        let captures = time_pattern().captures(s).ok_or_else(invalid)?;
        let hour: u32 = captures[1].parse().map_err(|_| invalid())?;
        let minute: u32 = captures[2].parse().map_err(|_| invalid())?;
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self::At)
            .ok_or_else(invalid)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::At(time) => write!(f, "{:02}:{:02}", time.hour(), time.minute()),
            Self::File => write!(f, "trigger"),
            Self::Always => write!(f, "execute-cli"),
        }
    }
}

impl Trigger {
    /// Check if a daily trigger has fired. Non-time triggers never fire here.
    pub fn time_reached(&self, now: NaiveTime, has_today: bool) -> bool {
        match self {
            Self::At(at) => !has_today && (now.hour(), now.minute()) >= (at.hour(), at.minute()),
            Self::File | Self::Always => false,
        }
    }
}

/// Path of the trigger file for `mountpoint`.
pub fn trigger_path(mountpoint: &Path) -> PathBuf {
    mountpoint.join(TRIGGER_FILE_NAME)
}

/// Remove the trigger file under `mountpoint` if present.
///
/// Returns `true` when a trigger file was found and removed.
pub async fn consume_trigger_file(mountpoint: &Path) -> Result<bool> {
    let path = trigger_path(mountpoint);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!(path = %path.display(), "Trigger found");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SnapshotError::io(
            format!("remove trigger file {}", path.display()),
            e,
        )),
    }
}

/// Decide whether a volume is due this cycle.
///
/// `mountpoint` is required for [`Trigger::File`]; configuration loading
/// guarantees it is present.
pub async fn is_due(
    trigger: &Trigger,
    mountpoint: Option<&Path>,
    now: NaiveTime,
    has_today: bool,
) -> Result<bool> {
    match trigger {
        Trigger::At(_) => Ok(trigger.time_reached(now, has_today)),
        Trigger::Always => Ok(true),
        Trigger::File => match mountpoint {
            Some(mountpoint) => consume_trigger_file(mountpoint).await,
            None => Err(SnapshotError::Config(
                "trigger volume without mountpoint".to_string(),
            )),
        },
    }
}
