//! Eviction decision logic.
//!
//! Pure functions: the scanner gathers the facts (sizes, timestamps, ages)
//! and executes the resulting plan; nothing in here touches the filesystem.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Age of an entry in fractional days.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn age_in_days(now: DateTime<Utc>, stamp: DateTime<Utc>) -> f64 {
    (now - stamp).num_milliseconds() as f64 / 86_400_000.0
}

/// Whether `age` qualifies for the past-limit event. A negative ceiling
/// disables the policy.
#[must_use]
pub fn past_limit(age: f64, days: f64) -> bool {
    days >= 0.0 && age >= days
}

/// One tracked entry's contribution to the size budget.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeRecord {
    /// Path to evict if chosen.
    pub path: PathBuf,
    /// Byte size (aggregate for directories).
    pub size: u64,
    /// Effective timestamp; the tie-break within a size group.
    pub stamp: DateTime<Utc>,
}

/// Plans which entries to evict to bring the aggregate size within
/// `max_size`.
///
/// Returns an empty plan when the total is already within budget.
/// Otherwise: zero-size entries go first (they cost the budget nothing but
/// clutter tracking), then whole size groups from largest to smallest,
/// oldest entry first within a group, stopping the moment the running total
/// drops to or below the budget. Removing the largest entries first makes
/// the fastest progress; oldest-first approximates least-recently-relevant.
#[must_use]
pub fn plan_evictions(records: &[SizeRecord], max_size: u64) -> Vec<SizeRecord> {
    let mut total: u64 = records.iter().map(|record| record.size).sum();
    if total <= max_size {
        return Vec::new();
    }

    let mut groups: BTreeMap<u64, Vec<&SizeRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.size).or_default().push(record);
    }

    let mut plan = Vec::new();

    if let Some(empty) = groups.remove(&0) {
        plan.extend(empty.into_iter().cloned());
    }

    for (size, mut group) in groups.into_iter().rev() {
        group.sort_by_key(|record| record.stamp);
        for record in group {
            plan.push(record.clone());
            total -= size;
            if total <= max_size {
                return plan;
            }
        }
    }

    plan
}
