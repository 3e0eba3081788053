// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retention engine: age-bucketed snapshot pruning.
//!
//! A retention schema `"<d>d<w>w<m>m<y>y"` describes a sequence of buckets,
//! each identified by its age ceiling in days. The ceilings come from a
//! running counter that starts at -1:
//!
//! ```text
//! days   buckets: +1 each   → 0, 1, ..., d-1
//! weeks  buckets: +7 each   → d-1+7, d-1+14, ...
//! months buckets: +28 each
//! years  buckets: +336 each (28 × 12)
//! ```
//!
//! Every date-named snapshot lands in the bucket with the smallest ceiling
//! that is still ≥ its age. Each bucket keeps only its oldest member; the
//! rest are destroyed. Snapshots older than the last ceiling are end-of-life
//! and destroyed unconditionally.
//!
//! Held snapshots are taken out before bucketing: they occupy no slot and are
//! never destroyed. Names that are not `YYYYMMDD` dates are never touched.
//!
//! # Example
//!
//! ```rust
//! use snapshot_manager::retention::RetentionSchema;
//!
//! let schema: RetentionSchema = "2d1w0m0y".parse().unwrap();
//! assert_eq!(schema.ceilings().collect::<Vec<_>>(), vec![0, 1, 8]);
//! assert_eq!(schema.bucket_for(5), Some(8));
//! assert_eq!(schema.bucket_for(9), None); // end-of-life
//! ```

use crate::error::{Result, SnapshotError};
use crate::executor::Endpoint;
use crate::inventory::VolumeManager;
use crate::metrics;
use crate::snapshot::DatedSnapshot;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info};

const DAYS_PER_WEEK: i64 = 7;
const DAYS_PER_MONTH: i64 = 28;
const DAYS_PER_YEAR: i64 = DAYS_PER_MONTH * 12;

fn schema_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<days>\d+)d(?P<weeks>\d+)w(?P<months>\d+)m(?P<years>\d+)y$")
            .expect("schema pattern is valid")
    })
}

/// How many daily, weekly, monthly and yearly snapshots to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionSchema {
    pub days: u32,
    pub weeks: u32,
    pub months: u32,
    pub years: u32,
}

impl FromStr for RetentionSchema {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        let captures = schema_pattern().captures(s).ok_or_else(|| {
            SnapshotError::Config(format!(
                "invalid retention schema {:?} (expected e.g. \"7d3w11m4y\")",
                s
            ))
        })?;

        let field = |name: &str| -> Result<u32> {
            captures[name].parse::<u32>().map_err(|e| {
                SnapshotError::Config(format!("retention schema {:?}: {} count: {}", s, name, e))
            })
        };

        Ok(Self {
            days: field("days")?,
            weeks: field("weeks")?,
            months: field("months")?,
            years: field("years")?,
        })
    }
}

impl std::fmt::Display for RetentionSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}d{}w{}m{}y", self.days, self.weeks, self.months, self.years)
    }
}

impl RetentionSchema {
    /// The (count, step) of each tier in counter order.
    fn tiers(&self) -> [(i64, i64); 4] {
        [
            (self.days as i64, 1),
            (self.weeks as i64, DAYS_PER_WEEK),
            (self.months as i64, DAYS_PER_MONTH),
            (self.years as i64, DAYS_PER_YEAR),
        ]
    }

    /// Total number of buckets.
    pub fn bucket_count(&self) -> u64 {
        self.days as u64 + self.weeks as u64 + self.months as u64 + self.years as u64
    }

    /// Bucket ceilings in ascending order, generated lazily.
    pub fn ceilings(&self) -> impl Iterator<Item = i64> {
        let mut base = -1i64;
        let mut ranges = Vec::with_capacity(4);
        for (count, step) in self.tiers() {
            ranges.push((1..=count).map(move |i| base + i * step));
            base += count * step;
        }
        ranges.into_iter().flatten()
    }

    /// Largest ceiling, or `None` when the schema has no buckets at all.
    pub fn max_ceiling(&self) -> Option<i64> {
        if self.bucket_count() == 0 {
            return None;
        }
        Some(self.tiers().iter().map(|(count, step)| count * step).sum::<i64>() - 1)
    }

    /// Ceiling of the bucket a snapshot of `age` days belongs to.
    ///
    /// This is the smallest ceiling ≥ `age`. Future-dated snapshots (negative
    /// age) fall into the first bucket. `None` means end-of-life.
    pub fn bucket_for(&self, age: i64) -> Option<i64> {
        let age = age.max(0);
        let mut base = -1i64;
        for (count, step) in self.tiers() {
            let top = base + count * step;
            if count > 0 && age <= top {
                // Smallest k in 1..=count with base + k*step >= age.
                let k = ((age - base) + step - 1) / step;
                return Some(base + k.max(1) * step);
            }
            base = top;
        }
        None
    }
}

/// Outcome of a retention computation for one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    /// Retained snapshots, in input order.
    pub kept: Vec<String>,
    /// Snapshots to destroy: by bucket ceiling ascending, end-of-life last.
    pub destroyed: Vec<String>,
    /// Held snapshots, excluded from consideration.
    pub held: Vec<String>,
    /// Non-date names, left alone.
    pub ignored: Vec<String>,
}

impl PrunePlan {
    pub fn is_noop(&self) -> bool {
        self.destroyed.is_empty()
    }
}

/// Compute which snapshots to keep and destroy.
///
/// Pure function: `held` names the snapshots currently carrying a hold and
/// `today` anchors the age computation.
pub fn plan_prune(
    snapshots: &[String],
    held: &HashSet<String>,
    schema: &RetentionSchema,
    today: NaiveDate,
) -> PrunePlan {
    let mut plan = PrunePlan::default();
    let mut candidates = Vec::new();

    for name in snapshots {
        match DatedSnapshot::parse(name, today) {
            None => plan.ignored.push(name.clone()),
            Some(_) if held.contains(name) => plan.held.push(name.clone()),
            Some(snapshot) => candidates.push(snapshot),
        }
    }

    let mut buckets: BTreeMap<i64, Vec<&DatedSnapshot>> = BTreeMap::new();
    let mut end_of_life = Vec::new();
    for snapshot in &candidates {
        match schema.bucket_for(snapshot.age) {
            Some(ceiling) => buckets.entry(ceiling).or_default().push(snapshot),
            None => end_of_life.push(snapshot),
        }
    }

    let mut keep: HashSet<&str> = HashSet::new();
    for members in buckets.values() {
        // Oldest wins; on equal age the first listed wins.
        let mut oldest = members[0];
        for member in &members[1..] {
            if member.age > oldest.age {
                oldest = member;
            }
        }
        keep.insert(oldest.name.as_str());
        plan.destroyed.extend(
            members
                .iter()
                .filter(|m| m.name != oldest.name)
                .map(|m| m.name.clone()),
        );
    }
    plan.destroyed
        .extend(end_of_life.into_iter().map(|s| s.name.clone()));

    plan.kept = candidates
        .iter()
        .filter(|s| keep.contains(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect();

    plan
}

/// Prune `volume` according to `schema`, destroying through `inventory`.
///
/// Hold state is queried for every date-named snapshot before planning.
/// Nothing is destroyed if the plan is empty. The first failed destroy aborts
/// the sweep and is returned.
pub async fn prune<V: VolumeManager>(
    inventory: &V,
    volume: &str,
    snapshots: &[String],
    schema: &RetentionSchema,
    recursive: bool,
    today: NaiveDate,
) -> Result<PrunePlan> {
    let local = Endpoint::local();
    let mut held = HashSet::new();
    for name in snapshots {
        if DatedSnapshot::parse(name, today).is_none() {
            continue;
        }
        if inventory.is_held(volume, name, &local).await? {
            held.insert(name.clone());
        }
    }

    let plan = plan_prune(snapshots, &held, schema, today);
    debug!(
        volume,
        schema = %schema,
        kept = plan.kept.len(),
        destroy = plan.destroyed.len(),
        held = plan.held.len(),
        ignored = plan.ignored.len(),
        "Retention plan computed"
    );

    if plan.is_noop() {
        return Ok(plan);
    }

    info!(volume, "Cleaning");
    for name in &plan.held {
        info!(volume, snapshot = %name, "Skipping held snapshot");
    }
    for name in &plan.destroyed {
        info!(volume, snapshot = %name, "Destroying snapshot");
        inventory.destroy_snapshot(volume, name, recursive).await?;
        metrics::record_snapshot_destroyed(volume);
    }
    info!(volume, destroyed = plan.destroyed.len(), "Cleaning complete");

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn names_for_ages(ages: &[i64]) -> Vec<String> {
        // Oldest first, like a creation-sorted listing.
        let mut ages = ages.to_vec();
        ages.sort_unstable_by(|a, b| b.cmp(a));
        ages.iter()
            .map(|age| crate::snapshot::snapshot_name(today() - Duration::days(*age)))
            .collect()
    }

    fn name(age: i64) -> String {
        crate::snapshot::snapshot_name(today() - Duration::days(age))
    }

    /// Direct port of the running-counter construction.
    fn reference_ceilings(schema: &RetentionSchema) -> Vec<i64> {
        let mut counter = -1i64;
        let mut out = Vec::new();
        for _ in 0..schema.days {
            counter += 1;
            out.push(counter);
        }
        for _ in 0..schema.weeks {
            counter += 7;
            out.push(counter);
        }
        for _ in 0..schema.months {
            counter += 28;
            out.push(counter);
        }
        for _ in 0..schema.years {
            counter += 28 * 12;
            out.push(counter);
        }
        out
    }

    #[test]
    fn test_parse_schema() {
        let schema: RetentionSchema = "7d3w11m4y".parse().unwrap();
        assert_eq!(
            schema,
            RetentionSchema {
                days: 7,
                weeks: 3,
                months: 11,
                years: 4
            }
        );
        assert_eq!(schema.to_string(), "7d3w11m4y");
    }

    #[test]
    fn test_parse_schema_rejects_malformed() {
        for input in [
            "",
            "7d",
            "7d3w11m",
            "7d 3w11m4y",
            "3w7d11m4y",
            "7d3w11m4y ",
            "-1d0w0m0y",
            "d0w0m0y",
            "7D3W11M4Y",
            "99999999999d0w0m0y",
        ] {
            let err = input.parse::<RetentionSchema>().unwrap_err();
            assert!(err.is_fatal(), "{:?} should be a config error", input);
        }
    }

    #[test]
    fn test_ceilings_match_running_counter() {
        for text in ["7d3w11m4y", "0d0w0m0y", "0d2w0m1y", "1d0w0m0y", "3d0w2m0y"] {
            let schema: RetentionSchema = text.parse().unwrap();
            assert_eq!(
                schema.ceilings().collect::<Vec<_>>(),
                reference_ceilings(&schema),
                "schema {}",
                text
            );
        }
    }

    #[test]
    fn test_ceilings_for_reference_schema() {
        let schema: RetentionSchema = "7d3w11m4y".parse().unwrap();
        let ceilings: Vec<i64> = schema.ceilings().collect();
        assert_eq!(&ceilings[..7], &[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(&ceilings[7..10], &[13, 20, 27]);
        assert_eq!(ceilings[10], 55);
        assert_eq!(ceilings[20], 27 + 11 * 28);
        assert_eq!(*ceilings.last().unwrap(), 335 + 4 * 336);
        assert_eq!(schema.max_ceiling(), Some(1679));
        assert_eq!(schema.bucket_count(), 25);
    }

    #[test]
    fn test_bucket_for_matches_smallest_ceiling() {
        for text in ["7d3w11m4y", "0d1w1m1y", "2d0w0m3y", "0d0w0m0y"] {
            let schema: RetentionSchema = text.parse().unwrap();
            let ceilings = reference_ceilings(&schema);
            for age in -3..2000 {
                let expected = ceilings.iter().copied().filter(|c| *c >= age).min();
                assert_eq!(schema.bucket_for(age), expected, "schema {} age {}", text, age);
            }
        }
    }

    #[test]
    fn test_huge_schema_does_not_materialize_buckets() {
        let schema: RetentionSchema = "4000000000d0w0m4000000000y".parse().unwrap();
        assert_eq!(schema.bucket_for(10), Some(10));
        assert_eq!(schema.bucket_for(3_999_999_999), Some(3_999_999_999));
        assert!(schema.max_ceiling().unwrap() > 1_000_000_000_000);
    }

    #[test]
    fn test_reference_example_keeps_everything() {
        let schema: RetentionSchema = "7d3w11m4y".parse().unwrap();
        let snapshots = names_for_ages(&[0, 1, 2, 3, 4, 5, 6, 10, 17, 40, 100, 400]);
        let plan = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert!(plan.destroyed.is_empty(), "destroyed {:?}", plan.destroyed);
        assert_eq!(plan.kept, snapshots);
    }

    #[test]
    fn test_reference_example_end_of_life() {
        let schema: RetentionSchema = "7d3w11m4y".parse().unwrap();
        let snapshots = names_for_ages(&[0, 1, 2, 3, 4, 5, 6, 10, 17, 40, 100, 400, 1680, 2000]);
        let plan = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert_eq!(plan.destroyed, vec![name(2000), name(1680)]);
        assert_eq!(plan.kept.len(), 12);
    }

    #[test]
    fn test_bucket_keeps_oldest_member() {
        // 2 daily buckets (0, 1) then one weekly bucket (8).
        let schema: RetentionSchema = "2d1w0m0y".parse().unwrap();
        let snapshots = names_for_ages(&[0, 1, 2, 3, 5, 8]);
        let plan = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert_eq!(plan.kept, vec![name(8), name(1), name(0)]);
        // Bucket 8 held {8, 5, 3, 2}; 8 wins, others go in listing order.
        assert_eq!(plan.destroyed, vec![name(5), name(3), name(2)]);
    }

    #[test]
    fn test_destroy_order_bucket_ascending_then_end_of_life() {
        let schema: RetentionSchema = "1d1w0m0y".parse().unwrap();
        // Buckets 0 and 7; 20 and 30 are past the last ceiling.
        let snapshots = names_for_ages(&[30, 20, 7, 4, 2, 0]);
        let plan = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert_eq!(plan.kept, vec![name(7), name(0)]);
        assert_eq!(plan.destroyed, vec![name(4), name(2), name(30), name(20)]);
    }

    #[test]
    fn test_zero_schema_destroys_everything() {
        let schema = RetentionSchema::default();
        let snapshots = names_for_ages(&[0, 1, 50]);
        let plan = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert!(plan.kept.is_empty());
        assert_eq!(plan.destroyed, snapshots);
    }

    #[test]
    fn test_empty_snapshot_list() {
        let schema: RetentionSchema = "7d3w11m4y".parse().unwrap();
        let plan = plan_prune(&[], &HashSet::new(), &schema, today());
        assert_eq!(plan, PrunePlan::default());
        assert!(plan.is_noop());
    }

    #[test]
    fn test_held_snapshots_are_excluded() {
        let schema: RetentionSchema = "1d0w0m0y".parse().unwrap();
        let snapshots = names_for_ages(&[10, 5, 0]);
        let held: HashSet<String> = [name(10), name(5)].into_iter().collect();
        let plan = plan_prune(&snapshots, &held, &schema, today());
        assert_eq!(plan.held, vec![name(10), name(5)]);
        assert_eq!(plan.kept, vec![name(0)]);
        assert!(plan.destroyed.is_empty());
    }

    #[test]
    fn test_held_snapshot_does_not_occupy_bucket() {
        let schema: RetentionSchema = "0d1w0m0y".parse().unwrap();
        let snapshots = names_for_ages(&[6, 3]);
        let held: HashSet<String> = [name(6)].into_iter().collect();
        let plan = plan_prune(&snapshots, &held, &schema, today());
        assert_eq!(plan.kept, vec![name(3)]);
        assert!(plan.destroyed.is_empty());
    }

    #[test]
    fn test_only_held_snapshots_is_noop() {
        let schema = RetentionSchema::default();
        let snapshots = names_for_ages(&[3, 2, 1]);
        let held: HashSet<String> = snapshots.iter().cloned().collect();
        let plan = plan_prune(&snapshots, &held, &schema, today());
        assert!(plan.is_noop());
        assert_eq!(plan.held.len(), 3);
    }

    #[test]
    fn test_foreign_names_are_ignored() {
        let schema = RetentionSchema::default();
        let snapshots = vec![
            "before-upgrade".to_string(),
            name(1),
            "20241301".to_string(),
        ];
        let plan = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert_eq!(plan.ignored, vec!["before-upgrade", "20241301"]);
        assert_eq!(plan.destroyed, vec![name(1)]);
    }

    #[test]
    fn test_future_snapshot_lands_in_first_bucket() {
        let schema: RetentionSchema = "0d1w0m0y".parse().unwrap();
        let future = crate::snapshot::snapshot_name(today() + Duration::days(2));
        let snapshots = vec![name(3), future.clone()];
        let plan = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert_eq!(plan.kept, vec![name(3)]);
        assert_eq!(plan.destroyed, vec![future]);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let schema: RetentionSchema = "3d2w1m1y".parse().unwrap();
        let ages: Vec<i64> = (0..400).step_by(3).collect();
        let snapshots = names_for_ages(&ages);
        let first = plan_prune(&snapshots, &HashSet::new(), &schema, today());
        assert!(!first.destroyed.is_empty());
        let second = plan_prune(&first.kept, &HashSet::new(), &schema, today());
        assert!(second.destroyed.is_empty());
        assert_eq!(second.kept, first.kept);
    }
}
