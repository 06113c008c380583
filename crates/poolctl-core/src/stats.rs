//! Aggregate counters shown on the dashboard.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::TokenRecord;

/// Chat units consumed by one image generation.
pub const IMAGE_QUOTA_COST: i64 = 2;

/// Summary statistics recomputed after every load or local mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of records.
    pub total: usize,
    /// Records with status `active`.
    pub active: usize,
    /// Records with status `cooling`.
    pub cooling: usize,
    /// Records that are neither active nor cooling.
    pub invalid: usize,
    /// Records tagged `nsfw`.
    pub nsfw: usize,
    /// Records without the `nsfw` tag.
    pub non_nsfw: usize,
    /// Remaining quota across active records.
    pub chat_quota: i64,
    /// Image generations the active quota still affords.
    pub image_quota: i64,
    /// Sum of historical calls.
    pub total_calls: u64,
    /// Record count per pool.
    pub per_pool: BTreeMap<String, usize>,
}

impl PoolStats {
    /// Compute statistics over the full record list.
    #[must_use]
    pub fn compute(records: &[TokenRecord]) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            if record.is_active() {
                stats.active += 1;
                stats.chat_quota = stats.chat_quota.saturating_add(record.quota.max(0));
            } else if record.is_cooling() {
                stats.cooling += 1;
            } else {
                stats.invalid += 1;
            }
            if record.is_nsfw() {
                stats.nsfw += 1;
            } else {
                stats.non_nsfw += 1;
            }
            stats.total_calls = stats.total_calls.saturating_add(record.use_count);
            *stats.per_pool.entry(record.pool.clone()).or_default() += 1;
        }
        stats.image_quota = stats.chat_quota / IMAGE_QUOTA_COST;
        stats
    }
}
