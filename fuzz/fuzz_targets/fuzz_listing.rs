//! Fuzz target for volume manager output parsing.
//!
//! Tests that sanitizing and parsing arbitrary command output, and
//! planning against whatever snapshot names come out, never panics.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snapshot_manager::executor::sanitize_output;
use snapshot_manager::inventory::{parse_estimated_size, parse_holds, parse_snapshot_listing};
use snapshot_manager::replication::plan_transfer;

fuzz_target!(|data: (&str, &str)| {
    let (local, remote) = data;
    let local = parse_snapshot_listing(&sanitize_output(local));
    let remote = parse_snapshot_listing(&sanitize_output(remote));

    let _ = parse_holds(&sanitize_output(data.0));
    let _ = parse_estimated_size(&sanitize_output(data.1));

    for (volume, snapshots) in &local {
        let destination = remote.get(volume).cloned().unwrap_or_default();
        let _ = plan_transfer(snapshots, &destination);
    }
});
