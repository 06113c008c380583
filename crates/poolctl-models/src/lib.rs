#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(unreachable_pub, clippy::all, clippy::pedantic)]
//! Wire DTOs for the token-pool admin API.
//!
//! These types mirror the JSON the admin endpoints accept and return. They stay
//! deliberately loose (every field optional, unknown fields kept) so the client
//! can decode legacy payloads; `poolctl-core` normalizes them into canonical
//! records at the boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Relative path of the token collection endpoint.
pub const TOKENS_PATH: &str = "/v1/admin/tokens";
/// Relative path of the synchronous single-token refresh endpoint.
pub const REFRESH_PATH: &str = "/v1/admin/tokens/refresh";
/// Relative path of the asynchronous refresh batch endpoint.
pub const REFRESH_ASYNC_PATH: &str = "/v1/admin/tokens/refresh/async";
/// Relative path of the asynchronous NSFW enable batch endpoint.
pub const NSFW_ENABLE_ASYNC_PATH: &str = "/v1/admin/tokens/nsfw/enable/async";

/// Relative path of the SSE progress stream for a batch task.
#[must_use]
pub fn batch_stream_path(task_id: &str) -> String {
    format!("/v1/admin/batch/{task_id}/stream")
}

/// Relative path of the cancel endpoint for a batch task.
#[must_use]
pub fn batch_cancel_path(task_id: &str) -> String {
    format!("/v1/admin/batch/{task_id}/cancel")
}

/// Full token collection keyed by pool name.
pub type TokenPools = BTreeMap<String, Vec<RawTokenEntry>>;

/// One entry of a pool list as stored by the server.
///
/// Older deployments persisted bare credential strings; newer ones store
/// objects. Both shapes appear in the same payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawTokenEntry {
    /// Legacy entry holding only the credential.
    Bare(String),
    /// Structured entry with metadata.
    Object(TokenObject),
    /// Anything else, such as a numeric token or a fractional quota.
    ///
    /// Decoded so one bad entry cannot fail the whole collection; the core
    /// drops it during normalization.
    Malformed(Value),
}

/// Structured token entry. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenObject {
    /// Opaque credential string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Lifecycle status label (`active`, `cooling`, `disabled`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Remaining usage budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    /// Free-text operator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Tags such as `nsfw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Consecutive upstream failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_count: Option<u32>,
    /// Total historical calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_count: Option<u64>,
    /// Creation time in epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last successful use in epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    /// Last failure in epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fail_at: Option<i64>,
    /// Last upstream sync in epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    /// Last asset cleanup in epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_asset_clear_at: Option<i64>,
    /// Reason recorded for the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fail_reason: Option<String>,
    /// Fields this client does not model; written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request body for the synchronous single-token refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Credential to revalidate.
    pub token: String,
}

/// Response body for the synchronous single-token refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshResponse {
    /// Outcome label reported by the server.
    #[serde(default)]
    pub status: String,
    /// Per-token validity results.
    #[serde(default)]
    pub results: BTreeMap<String, bool>,
}

/// Request body for the asynchronous batch endpoints.
///
/// `tokens: None` serializes as `null`, which the NSFW endpoint interprets as
/// "every token in the pool".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchTokensRequest {
    /// Credentials the batch applies to.
    pub tokens: Option<Vec<String>>,
}

/// Acknowledgement returned when the server accepts an asynchronous batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AsyncTaskResponse {
    /// Outcome label reported by the server.
    #[serde(default)]
    pub status: String,
    /// Server-issued task identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Number of tokens the server scheduled, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Counters carried by `snapshot` and `progress` events.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchProgressPayload {
    /// Number of tokens in the batch.
    #[serde(default)]
    pub total: u64,
    /// Number of tokens handled so far.
    #[serde(default)]
    pub processed: u64,
}

/// Payload of the terminal `done` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchDonePayload {
    /// Number of tokens in the batch.
    #[serde(default)]
    pub total: u64,
    /// Aggregated result, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BatchResult>,
    /// Non-fatal warning surfaced to the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result block inside a `done` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchResult {
    /// Success and failure counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

/// Per-token success and failure counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    /// Tokens that succeeded.
    #[serde(default)]
    pub ok: u64,
    /// Tokens that failed.
    #[serde(default)]
    pub fail: u64,
}

/// Payload of the terminal `error` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchErrorPayload {
    /// Error message reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Alternate message field used by some handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchErrorPayload {
    /// Best available human-readable message.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|text| !text.trim().is_empty())
    }
}

/// Error document returned by the admin API on failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Framework-level detail; a string or a list of validation items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// Application-level error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Alternate message field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Flatten the document into one displayable message.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        if let Some(text) = self.detail.as_ref().and_then(value_text) {
            return Some(text);
        }
        if let Some(text) = self.error.as_ref().and_then(value_text) {
            return Some(text);
        }
        self.message
            .clone()
            .filter(|text| !text.trim().is_empty())
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("msg"))
            .and_then(value_text),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}
