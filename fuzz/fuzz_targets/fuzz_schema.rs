//! Fuzz target for retention schema parsing and bucketing.
//!
//! Parsing arbitrary text must never panic, and any accepted schema must
//! bucket arbitrary ages without overflow.

#![no_main]

use libfuzzer_sys::fuzz_target;
use snapshot_manager::retention::RetentionSchema;

fuzz_target!(|data: (&str, i64)| {
    let (text, age) = data;

    if let Ok(schema) = text.parse::<RetentionSchema>() {
        let _ = schema.max_ceiling();
        let _ = schema.bucket_for(age);
    }
});
