#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(unreachable_pub, clippy::all, clippy::pedantic)]

//! Token-pool admin logic, independent of transport and terminal.
//!
//! Layout:
//! - `record.rs`, `store.rs`, `stats.rs`: canonical records and the in-memory store
//! - `view.rs`, `selection.rs`, `render.rs`: filtering, pagination, selection, row model
//! - `batch.rs`, `sse.rs`: batch job state machine and progress stream decoding
//! - `backend.rs`, `session.rs`: admin API seam and the session driving it
//! - `error.rs`, `toast.rs`: error taxonomy and operator notifications

pub mod backend;
pub mod batch;
pub mod error;
pub mod record;
pub mod render;
pub mod selection;
pub mod session;
pub mod sse;
pub mod stats;
pub mod store;
pub mod toast;
pub mod view;

pub use backend::{AdminBackend, BatchEventStream};
pub use batch::{BatchAction, BatchEvent, BatchJob, BatchOutcome, BatchState};
pub use error::{BatchError, MSG_CONNECTION_LOST, PoolError, PoolResult};
pub use record::{NOTE_MAX_CHARS, NSFW_TAG, TokenRecord, TokenStatus};
pub use render::{RowView, mask_token};
pub use selection::HeaderCheck;
pub use session::{
    DEFAULT_BATCH_IDLE_TIMEOUT, DEFAULT_CANCEL_REQUEST_TIMEOUT, Session, SessionConfig,
};
pub use sse::{BatchEventDecoder, SseFrame, SseParser, decode_batch_event};
pub use stats::PoolStats;
pub use store::{DefaultQuotas, ImportReport, LoadReport, NewToken, RecordStore, TokenPatch};
pub use toast::{MSG_CANCELLED, TOAST_LOG_TARGET, Toast, ToastLevel};
pub use view::{DEFAULT_PAGE_SIZE, PAGE_SIZE_OPTIONS, PageView, TokenFilter};
