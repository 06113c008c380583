//! Read-only row model for table output.

use chrono::DateTime;
use serde::Serialize;

use crate::record::TokenRecord;

const MASK_THRESHOLD: usize = 24;
const MASK_HEAD: usize = 8;
const MASK_TAIL: usize = 16;

/// Shorten long credentials to `head...tail`.
#[must_use]
pub fn mask_token(token: &str) -> String {
    let count = token.chars().count();
    if count <= MASK_THRESHOLD {
        return token.to_string();
    }
    let head: String = token.chars().take(MASK_HEAD).collect();
    let tail: String = token.chars().skip(count - MASK_TAIL).collect();
    format!("{head}...{tail}")
}

/// Format epoch millis as `YYYY-MM-DD HH:MM:SS` (UTC); `-` when absent.
#[must_use]
pub fn format_timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// One table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowView {
    /// Full credential, for copy and addressing.
    pub token: String,
    /// Masked credential for display.
    pub masked: String,
    /// Pool name.
    pub pool: String,
    /// Status label.
    pub status: String,
    /// Remaining quota.
    pub quota: i64,
    /// Historical calls.
    pub use_count: u64,
    /// Consecutive failures.
    pub fail_count: u32,
    /// Comma-joined tags.
    pub tags: String,
    /// Operator note.
    pub note: String,
    /// Last use, formatted.
    pub last_used: String,
    /// Selection flag.
    pub selected: bool,
}

impl RowView {
    /// Build the row. Never touches the store.
    #[must_use]
    pub fn from_record(record: &TokenRecord) -> Self {
        Self {
            token: record.token.clone(),
            masked: mask_token(&record.token),
            pool: record.pool.clone(),
            status: record.status.to_string(),
            quota: record.quota,
            use_count: record.use_count,
            fail_count: record.fail_count,
            tags: record.tags.iter().cloned().collect::<Vec<_>>().join(","),
            note: record.note.clone(),
            last_used: format_timestamp(record.last_used_at),
            selected: record.selected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NSFW_TAG;

    #[test]
    fn short_tokens_are_not_masked() {
        let token = "a".repeat(24);
        assert_eq!(mask_token(&token), token);
    }

    #[test]
    fn long_tokens_keep_head_and_tail() {
        let token = format!("HEADHEAD{}{}", "x".repeat(10), "0123456789abcdef");
        assert_eq!(mask_token(&token), "HEADHEAD...0123456789abcdef");
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(None), "-");
        assert_eq!(format_timestamp(Some(0)), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(Some(1_700_000_000_000)), "2023-11-14 22:13:20");
    }

    #[test]
    fn row_reflects_record() {
        let mut record = TokenRecord::new("tok", "ssoSuper", 140);
        record.tags.insert(NSFW_TAG.into());
        record.selected = true;
        let row = RowView::from_record(&record);
        assert_eq!(row.masked, "tok");
        assert_eq!(row.status, "active");
        assert_eq!(row.tags, "nsfw");
        assert_eq!(row.last_used, "-");
        assert!(row.selected);
    }
}
