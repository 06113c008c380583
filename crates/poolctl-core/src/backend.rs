//! Admin API abstraction consumed by [`crate::session::Session`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use poolctl_models::{AsyncTaskResponse, RefreshResponse, TokenPools};

use crate::batch::BatchEvent;
use crate::error::PoolResult;

/// Progress stream of one server-side batch job.
pub type BatchEventStream = BoxStream<'static, PoolResult<BatchEvent>>;

#[async_trait]
/// Operations the admin client needs from the token pool service.
///
/// Implementations map HTTP 401 to [`crate::PoolError::Unauthorized`] and
/// undecodable bodies to [`crate::PoolError::InvalidJson`].
pub trait AdminBackend: Send + Sync {
    /// Fetch the whole pool mapping.
    async fn load_tokens(&self) -> PoolResult<TokenPools>;
    /// Replace the whole pool mapping.
    async fn replace_tokens(&self, pools: &TokenPools) -> PoolResult<()>;
    /// Synchronously refresh one token.
    async fn refresh_token(&self, token: &str) -> PoolResult<RefreshResponse>;
    /// Start an asynchronous validity refresh.
    async fn start_refresh(&self, tokens: &[String]) -> PoolResult<AsyncTaskResponse>;
    /// Start an asynchronous NSFW enablement. `None` targets every token.
    async fn start_nsfw_enable(&self, tokens: Option<&[String]>) -> PoolResult<AsyncTaskResponse>;
    /// Open the progress stream of a task.
    async fn open_batch_stream(&self, task_id: &str) -> PoolResult<BatchEventStream>;
    /// Ask the server to cancel a task.
    async fn cancel_batch(&self, task_id: &str) -> PoolResult<()>;
}
