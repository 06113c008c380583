//! In-memory credential store.
//!
//! # Design
//! - The store is the single owner of records; views and rows borrow it.
//! - Every mutation recomputes statistics before returning.
//! - Token uniqueness is enforced on add, import and edit.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use poolctl_models::TokenPools;
use serde::Serialize;
use tracing::warn;

use crate::error::{PoolError, PoolResult};
use crate::record::{NOTE_MAX_CHARS, TokenRecord, TokenStatus, nest_records, normalize_pools};
use crate::stats::PoolStats;

/// Quota assigned to new tokens per pool when none is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultQuotas {
    by_pool: BTreeMap<String, i64>,
}

impl Default for DefaultQuotas {
    fn default() -> Self {
        Self {
            by_pool: BTreeMap::from([("ssoBasic".to_string(), 80), ("ssoSuper".to_string(), 140)]),
        }
    }
}

impl DefaultQuotas {
    /// Default quota for `pool`; 0 for unknown pools.
    #[must_use]
    pub fn quota_for(&self, pool: &str) -> i64 {
        self.by_pool.get(pool).copied().unwrap_or(0)
    }

    /// Override one pool's default.
    pub fn set(&mut self, pool: impl Into<String>, quota: i64) {
        self.by_pool.insert(pool.into(), quota);
    }

    /// Parse a `pool=quota` override.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing `=`, an empty pool or a
    /// non-integer quota.
    pub fn parse_override(raw: &str) -> PoolResult<(String, i64)> {
        let (pool, quota) = raw
            .split_once('=')
            .ok_or_else(|| PoolError::validation("default_quota", "expected pool=quota"))?;
        let pool = pool.trim();
        if pool.is_empty() {
            return Err(PoolError::validation("default_quota", "pool name is empty"));
        }
        let quota = quota.trim().parse::<i64>().map_err(|_| {
            PoolError::validation("default_quota", format!("quota for {pool} is not an integer"))
        })?;
        Ok((pool.to_string(), quota))
    }
}

/// Reject notes longer than [`NOTE_MAX_CHARS`] characters.
///
/// # Errors
///
/// Returns a validation error naming the limit.
pub fn validate_note(note: &str) -> PoolResult<()> {
    if note.chars().count() > NOTE_MAX_CHARS {
        return Err(PoolError::validation(
            "note",
            format!("note must be at most {NOTE_MAX_CHARS} characters"),
        ));
    }
    Ok(())
}

fn validate_pool(pool: &str) -> PoolResult<&str> {
    let pool = pool.trim();
    if pool.is_empty() {
        Err(PoolError::validation("pool", "pool name is required"))
    } else {
        Ok(pool)
    }
}

/// Input for a single add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewToken {
    /// Credential.
    pub token: String,
    /// Target pool.
    pub pool: String,
    /// Explicit quota; the pool default applies when `None`.
    pub quota: Option<i64>,
    /// Operator note.
    pub note: String,
    /// Initial tags.
    pub tags: BTreeSet<String>,
}

/// Field changes applied by an edit. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPatch {
    /// Move to another pool.
    pub pool: Option<String>,
    /// New quota.
    pub quota: Option<i64>,
    /// New note.
    pub note: Option<String>,
    /// New status.
    pub status: Option<TokenStatus>,
    /// Replacement tag set.
    pub tags: Option<BTreeSet<String>>,
}

impl TokenPatch {
    /// True when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_none()
            && self.quota.is_none()
            && self.note.is_none()
            && self.status.is_none()
            && self.tags.is_none()
    }
}

/// Result of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Tokens appended to the store.
    pub added: usize,
    /// Tokens skipped because they already existed or repeated in the input.
    pub duplicates: usize,
}

/// Result of replacing the store from a server payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Records now in the store.
    pub loaded: usize,
    /// Entries dropped for an empty token.
    pub dropped_empty: usize,
    /// Entries dropped as duplicates.
    pub dropped_duplicates: usize,
    /// Entries dropped for an unusable shape.
    pub dropped_malformed: usize,
}

/// Flat, ordered record list plus derived statistics.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<TokenRecord>,
    known_pools: BTreeSet<String>,
    stats: PoolStats,
}

impl RecordStore {
    /// Records in store order.
    #[must_use]
    pub fn records(&self) -> &[TokenRecord] {
        &self.records
    }

    /// Mutable records, for selection changes.
    ///
    /// Selection does not affect statistics, so none are recomputed.
    pub fn records_mut(&mut self) -> &mut [TokenRecord] {
        &mut self.records
    }

    /// Current statistics.
    #[must_use]
    pub const fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the store holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record.
    #[must_use]
    pub fn find(&self, token: &str) -> Option<&TokenRecord> {
        self.records.iter().find(|record| record.token == token)
    }

    /// Replace everything from a server payload, keeping the selection of
    /// tokens that still exist.
    pub fn replace_from_pools(&mut self, pools: TokenPools) -> LoadReport {
        let selected: HashSet<String> = self
            .records
            .iter()
            .filter(|record| record.selected)
            .map(|record| record.token.clone())
            .collect();
        self.known_pools = pools.keys().cloned().collect();
        let normalized = normalize_pools(pools);
        if normalized.dropped_empty + normalized.dropped_duplicates + normalized.dropped_malformed > 0 {
            warn!(
                dropped_empty = normalized.dropped_empty,
                dropped_duplicates = normalized.dropped_duplicates,
                dropped_malformed = normalized.dropped_malformed,
                "dropped malformed token entries"
            );
        }
        self.records = normalized.records;
        for record in &mut self.records {
            record.selected = selected.contains(&record.token);
        }
        self.recompute();
        LoadReport {
            loaded: self.records.len(),
            dropped_empty: normalized.dropped_empty,
            dropped_duplicates: normalized.dropped_duplicates,
            dropped_malformed: normalized.dropped_malformed,
        }
    }

    /// Nest the store into the pool mapping for a full replace.
    #[must_use]
    pub fn to_pools(&self) -> TokenPools {
        nest_records(&self.records, &self.known_pools)
    }

    /// Drop every record and pool.
    pub fn clear(&mut self) {
        self.records.clear();
        self.known_pools.clear();
        self.recompute();
    }

    /// Append one token.
    ///
    /// # Errors
    ///
    /// Validation for an empty token, empty pool or long note; `Duplicate`
    /// when the token already exists.
    pub fn add(&mut self, new: NewToken, defaults: &DefaultQuotas) -> PoolResult<()> {
        let token = new.token.trim();
        if token.is_empty() {
            return Err(PoolError::validation("token", "token is required"));
        }
        let pool = validate_pool(&new.pool)?;
        validate_note(&new.note)?;
        if self.find(token).is_some() {
            return Err(PoolError::Duplicate {
                token: token.to_string(),
            });
        }
        let quota = new.quota.unwrap_or_else(|| defaults.quota_for(pool));
        let mut record = TokenRecord::new(token, pool, quota);
        record.note = new.note;
        record.tags = new.tags;
        self.records.push(record);
        self.recompute();
        Ok(())
    }

    /// Append many tokens to one pool, skipping duplicates.
    ///
    /// Tokens are separated by whitespace or commas; empty items are ignored.
    ///
    /// # Errors
    ///
    /// Validation for an empty pool or an input without any token.
    pub fn import(
        &mut self,
        pool: &str,
        text: &str,
        quota: Option<i64>,
        defaults: &DefaultQuotas,
    ) -> PoolResult<ImportReport> {
        let pool = validate_pool(pool)?;
        let mut seen: HashSet<&str> = self.records.iter().map(|r| r.token.as_str()).collect();
        let mut fresh = Vec::new();
        let mut report = ImportReport::default();
        let mut any = false;
        for token in text
            .split(|ch: char| ch.is_whitespace() || ch == ',')
            .filter(|item| !item.is_empty())
        {
            any = true;
            if seen.insert(token) {
                fresh.push(token.to_string());
            } else {
                report.duplicates += 1;
            }
        }
        if !any {
            return Err(PoolError::validation("tokens", "no tokens to import"));
        }
        let quota = quota.unwrap_or_else(|| defaults.quota_for(pool));
        report.added = fresh.len();
        self.records
            .extend(fresh.into_iter().map(|token| TokenRecord::new(token, pool, quota)));
        if report.duplicates > 0 {
            warn!(duplicates = report.duplicates, "skipped duplicate tokens on import");
        }
        self.recompute();
        Ok(report)
    }

    /// Apply a patch to one record.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown token; validation for a long note or an
    /// empty pool.
    pub fn edit(&mut self, token: &str, patch: TokenPatch) -> PoolResult<()> {
        if let Some(note) = &patch.note {
            validate_note(note)?;
        }
        let pool = patch.pool.as_deref().map(validate_pool).transpose()?.map(str::to_string);
        let record = self
            .records
            .iter_mut()
            .find(|record| record.token == token)
            .ok_or_else(|| PoolError::NotFound {
                token: token.to_string(),
            })?;
        if let Some(pool) = pool {
            record.pool = pool;
        }
        if let Some(quota) = patch.quota {
            record.quota = quota;
        }
        if let Some(note) = patch.note {
            record.note = note;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(tags) = patch.tags {
            record.tags = tags;
        }
        self.recompute();
        Ok(())
    }

    /// Remove tokens. Returns how many were present.
    pub fn remove(&mut self, tokens: &[String]) -> usize {
        let doomed: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let before = self.records.len();
        self.records.retain(|record| !doomed.contains(record.token.as_str()));
        self.recompute();
        before - self.records.len()
    }

    /// Mark tokens disabled. Returns how many were present.
    pub fn disable(&mut self, tokens: &[String]) -> usize {
        let targets: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let mut count = 0;
        for record in &mut self.records {
            if targets.contains(record.token.as_str()) {
                record.status = TokenStatus::Disabled;
                count += 1;
            }
        }
        self.recompute();
        count
    }

    fn recompute(&mut self) {
        self.stats = PoolStats::compute(&self.records);
    }
}
