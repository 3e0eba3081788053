// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Date-named snapshots.
//!
//! The only naming scheme the manager understands is an 8-digit date stamp
//! `YYYYMMDD`. Zero padding makes lexicographic order equal chronological
//! order, so snapshot lists sorted by name (or by creation) line up.
//!
//! Anything else (`manual-before-upgrade`, `autosnap_2024-01-01`, ...) is
//! ignored by retention and replication.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

const DATE_FORMAT: &str = "%Y%m%d";

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})(1[0-2]|0[1-9])(0[1-9]|[1-2]\d|3[0-1])$")
            .expect("date pattern is valid")
    })
}

/// Parse a snapshot name as its creation date.
///
/// Returns `None` for foreign names and for impossible dates such as
/// `20230231`.
pub fn parse_snapshot_date(name: &str) -> Option<NaiveDate> {
    if !date_pattern().is_match(name) {
        return None;
    }
    NaiveDate::parse_from_str(name, DATE_FORMAT).ok()
}

/// Check if a snapshot name follows the `YYYYMMDD` scheme.
pub fn is_dated(name: &str) -> bool {
    parse_snapshot_date(name).is_some()
}

/// Snapshot name for a given day.
pub fn snapshot_name(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Age of a snapshot in whole days relative to `today`.
///
/// Negative for snapshots dated in the future.
pub fn age_in_days(date: NaiveDate, today: NaiveDate) -> i64 {
    (today - date).num_days()
}

/// A date-named snapshot with its derived age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedSnapshot {
    pub name: String,
    pub date: NaiveDate,
    pub age: i64,
}

impl DatedSnapshot {
    /// Parse `name` relative to `today`. `None` if not a date name.
    pub fn parse(name: &str, today: NaiveDate) -> Option<Self> {
        let date = parse_snapshot_date(name)?;
        Some(Self {
            name: name.to_string(),
            date,
            age: age_in_days(date, today),
        })
    }
}

/// Keep only the date-named entries of `names`, preserving order.
pub fn dated_only(names: &[String]) -> Vec<String> {
    names.iter().filter(|n| is_dated(n)).cloned().collect()
}
