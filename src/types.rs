//! Core types shared by the hierarchy index and the aggregate caches.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// NodeId: stable integer identity of a category/space
pub type NodeId = i64;

/// Metric families maintained by the aggregate caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PostCounts,
    Activity,
    FileStats,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::PostCounts => "post_counts",
            Metric::Activity => "activity",
            Metric::FileStats => "file_stats",
        };
        f.write_str(name)
    }
}

/// Apply a signed delta to an unsigned counter, saturating at zero.
///
/// Over-applied negative deltas (duplicate or reordered events) degrade to
/// zero instead of wrapping.
pub fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta < 0 {
        value.saturating_sub(delta.unsigned_abs())
    } else {
        value.saturating_add(delta as u64)
    }
}

/// Convert a millisecond UTC timestamp into its calendar day.
pub fn day_from_millis(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map(|ts| ts.date_naive())
}
