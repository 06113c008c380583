//! Canonical token records and the normalization boundary.
//!
//! # Design
//! - `RawTokenEntry` (bare string or loose object) is only inspected here.
//! - The server shape is `pool -> ordered entries`; the store works on a flat
//!   list tagged with `pool` and re-nests it for every write.

use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Display, Formatter};

use poolctl_models::{RawTokenEntry, TokenObject, TokenPools};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag marking a credential enabled for unrestricted content.
pub const NSFW_TAG: &str = "nsfw";

/// Maximum note length in characters.
pub const NOTE_MAX_CHARS: usize = 50;

/// Lifecycle status of a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TokenStatus {
    /// Usable.
    #[default]
    Active,
    /// Temporarily unusable (rate limited).
    Cooling,
    /// Switched off by an operator.
    Disabled,
    /// Rejected by the upstream service.
    Expired,
    /// Any other label the server reports.
    Other(String),
}

impl TokenStatus {
    /// Wire label for the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Cooling => "cooling",
            Self::Disabled => "disabled",
            Self::Expired => "expired",
            Self::Other(label) => label.as_str(),
        }
    }
}

impl From<String> for TokenStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "cooling" => Self::Cooling,
            "disabled" => Self::Disabled,
            "expired" => Self::Expired,
            _ => Self::Other(value),
        }
    }
}

impl From<TokenStatus> for String {
    fn from(value: TokenStatus) -> Self {
        match value {
            TokenStatus::Other(label) => label,
            other => other.as_str().to_string(),
        }
    }
}

impl Display for TokenStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One credential as held by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque credential; unique across the store.
    pub token: String,
    /// Pool the credential belongs to.
    pub pool: String,
    /// Lifecycle status.
    pub status: TokenStatus,
    /// Remaining usage budget.
    pub quota: i64,
    /// Operator note, at most [`NOTE_MAX_CHARS`] characters.
    pub note: String,
    /// Tags such as [`NSFW_TAG`].
    pub tags: BTreeSet<String>,
    /// Consecutive upstream failures.
    pub fail_count: u32,
    /// Total historical calls.
    pub use_count: u64,
    /// Creation time in epoch millis.
    pub created_at: Option<i64>,
    /// Last successful use in epoch millis.
    pub last_used_at: Option<i64>,
    /// Last failure in epoch millis.
    pub last_fail_at: Option<i64>,
    /// Last upstream sync in epoch millis.
    pub last_sync_at: Option<i64>,
    /// Last asset cleanup in epoch millis.
    pub last_asset_clear_at: Option<i64>,
    /// Reason recorded for the last failure.
    pub last_fail_reason: Option<String>,
    /// Server fields this client does not model.
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub extra: Map<String, Value>,
    /// Client-side selection flag; never sent to the server.
    #[serde(skip)]
    pub selected: bool,
}

impl TokenRecord {
    /// Fresh record with defaults for everything but identity and quota.
    #[must_use]
    pub fn new(token: impl Into<String>, pool: impl Into<String>, quota: i64) -> Self {
        Self {
            token: token.into(),
            pool: pool.into(),
            status: TokenStatus::Active,
            quota,
            note: String::new(),
            tags: BTreeSet::new(),
            fail_count: 0,
            use_count: 0,
            created_at: None,
            last_used_at: None,
            last_fail_at: None,
            last_sync_at: None,
            last_asset_clear_at: None,
            last_fail_reason: None,
            extra: Map::new(),
            selected: false,
        }
    }

    /// True when the status is [`TokenStatus::Active`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }

    /// True when the status is [`TokenStatus::Cooling`].
    #[must_use]
    pub fn is_cooling(&self) -> bool {
        self.status == TokenStatus::Cooling
    }

    /// Neither active nor cooling.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        !self.is_active() && !self.is_cooling()
    }

    /// True when the record carries [`NSFW_TAG`].
    #[must_use]
    pub fn is_nsfw(&self) -> bool {
        self.tags.contains(NSFW_TAG)
    }

    /// Decode one raw entry, tagging it with `pool`.
    ///
    /// Returns `None` when the entry has no usable token or is malformed.
    #[must_use]
    pub fn from_entry(pool: &str, entry: RawTokenEntry) -> Option<Self> {
        match entry {
            RawTokenEntry::Bare(token) => {
                let token = token.trim();
                if token.is_empty() {
                    None
                } else {
                    Some(Self::new(token, pool, 0))
                }
            }
            RawTokenEntry::Object(object) => Self::from_object(pool, object),
            RawTokenEntry::Malformed(_) => None,
        }
    }

    fn from_object(pool: &str, object: TokenObject) -> Option<Self> {
        let token = object.token.as_deref().map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return None;
        }
        Some(Self {
            token: token.to_string(),
            pool: pool.to_string(),
            status: object
                .status
                .map_or(TokenStatus::Active, TokenStatus::from),
            quota: object.quota.unwrap_or(0),
            note: object.note.unwrap_or_default(),
            tags: object
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            fail_count: object.fail_count.unwrap_or(0),
            use_count: object.use_count.unwrap_or(0),
            created_at: object.created_at,
            last_used_at: object.last_used_at,
            last_fail_at: object.last_fail_at,
            last_sync_at: object.last_sync_at,
            last_asset_clear_at: object.last_asset_clear_at,
            last_fail_reason: object.last_fail_reason,
            extra: object.extra,
            selected: false,
        })
    }

    /// Encode the record as the object shape the server stores.
    #[must_use]
    pub fn to_entry(&self) -> RawTokenEntry {
        RawTokenEntry::Object(TokenObject {
            token: Some(self.token.clone()),
            status: Some(self.status.as_str().to_string()),
            quota: Some(self.quota),
            note: Some(self.note.clone()),
            tags: Some(self.tags.iter().cloned().collect()),
            fail_count: Some(self.fail_count),
            use_count: Some(self.use_count),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            last_fail_at: self.last_fail_at,
            last_sync_at: self.last_sync_at,
            last_asset_clear_at: self.last_asset_clear_at,
            last_fail_reason: self.last_fail_reason.clone(),
            extra: self.extra.clone(),
        })
    }
}

/// Outcome of flattening a server payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    /// Canonical records in pool order, then entry order.
    pub records: Vec<TokenRecord>,
    /// Entries dropped because they had no token.
    pub dropped_empty: usize,
    /// Entries dropped because their token was already seen.
    pub dropped_duplicates: usize,
    /// Entries dropped because their shape or field types were unusable.
    pub dropped_malformed: usize,
}

/// Flatten the pool mapping into canonical records.
///
/// Entries without a token or with unusable field types are dropped one by
/// one; duplicate tokens keep the first occurrence.
#[must_use]
pub fn normalize_pools(pools: TokenPools) -> Normalized {
    let mut seen = HashSet::new();
    let mut normalized = Normalized::default();
    for (pool, entries) in pools {
        for entry in entries {
            if matches!(entry, RawTokenEntry::Malformed(_)) {
                normalized.dropped_malformed += 1;
                continue;
            }
            let Some(record) = TokenRecord::from_entry(&pool, entry) else {
                normalized.dropped_empty += 1;
                continue;
            };
            if !seen.insert(record.token.clone()) {
                normalized.dropped_duplicates += 1;
                continue;
            }
            normalized.records.push(record);
        }
    }
    normalized
}

/// Re-nest records into the pool mapping, preserving per-pool order.
///
/// Pools in `known_pools` are kept even when they end up empty so a full
/// replace does not silently delete a pool the server knows about.
#[must_use]
pub fn nest_records<'a>(
    records: &[TokenRecord],
    known_pools: impl IntoIterator<Item = &'a String>,
) -> TokenPools {
    let mut pools: TokenPools = known_pools
        .into_iter()
        .map(|pool| (pool.clone(), Vec::new()))
        .collect();
    for record in records {
        pools
            .entry(record.pool.clone())
            .or_default()
            .push(record.to_entry());
    }
    pools
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pools_from(value: Value) -> TokenPools {
        serde_json::from_value(value).expect("valid pools payload")
    }

    #[test]
    fn bare_string_gets_defaults() {
        let record = TokenRecord::from_entry("ssoBasic", RawTokenEntry::Bare(" abc ".into()))
            .expect("record");
        assert_eq!(record.token, "abc");
        assert_eq!(record.pool, "ssoBasic");
        assert_eq!(record.status, TokenStatus::Active);
        assert_eq!(record.quota, 0);
        assert!(record.note.is_empty());
        assert_eq!(record.use_count, 0);
        assert!(record.tags.is_empty());
        assert!(!record.selected);
    }

    #[test]
    fn object_missing_fields_are_filled() {
        let normalized = normalize_pools(pools_from(json!({
            "ssoSuper": [{"token": "t1", "status": "cooling", "tags": ["nsfw", " "]}]
        })));
        let record = &normalized.records[0];
        assert_eq!(record.status, TokenStatus::Cooling);
        assert_eq!(record.quota, 0);
        assert_eq!(record.fail_count, 0);
        assert!(record.is_nsfw());
        assert_eq!(record.tags.len(), 1);
    }

    #[test]
    fn unknown_status_round_trips() {
        let status = TokenStatus::from("Banned".to_string());
        assert_eq!(status, TokenStatus::Other("Banned".into()));
        assert_eq!(String::from(status), "Banned");
        assert_eq!(TokenStatus::from("ACTIVE".to_string()), TokenStatus::Active);
    }

    #[test]
    fn empty_and_duplicate_entries_are_dropped() {
        let normalized = normalize_pools(pools_from(json!({
            "a": ["t1", "", {"quota": 5}],
            "b": ["t1", "t2"]
        })));
        let tokens: Vec<_> = normalized.records.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, ["t1", "t2"]);
        assert_eq!(normalized.dropped_empty, 2);
        assert_eq!(normalized.dropped_duplicates, 1);
    }

    #[test]
    fn malformed_entries_are_counted_apart() {
        let normalized = normalize_pools(pools_from(json!({
            "ssoBasic": ["good", {"token": "t2", "quota": 80.5}, 7, {"token": "t3", "quota": 80}]
        })));
        let tokens: Vec<_> = normalized.records.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, ["good", "t3"]);
        assert_eq!(normalized.dropped_malformed, 2);
        assert_eq!(normalized.dropped_empty, 0);
    }

    #[test]
    fn nest_then_normalize_preserves_identity_fields() {
        let mut first = TokenRecord::new("t1", "ssoBasic", 80);
        first.note = "primary".into();
        first.extra.insert("heavy".into(), json!(2));
        let second = TokenRecord::new("t2", "ssoSuper", 140);
        let third = TokenRecord::new("t3", "ssoBasic", 3);
        let records = vec![first, second, third];

        let no_pools: Vec<String> = Vec::new();
        let nested = nest_records(&records, &no_pools);
        assert_eq!(nested.get("ssoBasic").map(Vec::len), Some(2));

        let round_trip = normalize_pools(nested).records;
        let key = |r: &TokenRecord| (r.token.clone(), r.pool.clone(), r.quota, r.note.clone());
        let mut expected: Vec<_> = records.iter().map(key).collect();
        let mut actual: Vec<_> = round_trip.iter().map(key).collect();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);
        assert_eq!(
            round_trip.iter().find(|r| r.token == "t1").and_then(|r| r.extra.get("heavy")),
            Some(&json!(2))
        );
    }

    #[test]
    fn known_pools_survive_when_emptied() {
        let known = vec!["ssoSuper".to_string()];
        let nested = nest_records(&[TokenRecord::new("t", "ssoBasic", 1)], &known);
        assert!(nested.get("ssoSuper").is_some_and(Vec::is_empty));
        assert_eq!(nested.get("ssoBasic").map(Vec::len), Some(1));
    }
}
