//! Shared test utilities for integration and property tests.
//!
//! This module provides:
//! - An in-memory VolumeManager with a call log and failure injection
//! - A recording CommandRunner for pre/post hooks
//! - Date helpers for building snapshot lists

#![allow(dead_code)]

pub mod mock_runner;
pub mod mock_zfs;

pub use mock_runner::*;
pub use mock_zfs::*;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use snapshot_manager::snapshot::snapshot_name;

/// Fixed "today" used across tests.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

/// `today()` at the given wall-clock time.
pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    today().and_hms_opt(hour, minute, 0).unwrap()
}

/// Snapshot name for a snapshot `age` days old.
pub fn aged(age: i64) -> String {
    snapshot_name(today() - Duration::days(age))
}

/// Creation-ordered snapshot names for the given ages.
pub fn aged_list(ages: &[i64]) -> Vec<String> {
    let mut ages = ages.to_vec();
    ages.sort_unstable_by(|a, b| b.cmp(a));
    ages.dedup();
    ages.into_iter().map(aged).collect()
}

/// Borrow a list of names as `&str` for the mock setup helpers.
pub fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}
