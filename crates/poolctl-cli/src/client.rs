//! Shared HTTP client, error types, telemetry wiring and the HTTP admin backend.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use poolctl_core::{
    AdminBackend, BatchError, BatchEvent, BatchEventDecoder, BatchEventStream, PoolError,
    PoolResult,
};
use poolctl_models::{
    AsyncTaskResponse, BatchTokensRequest, ErrorBody, NSFW_ENABLE_ASYNC_PATH, REFRESH_ASYNC_PATH,
    REFRESH_PATH, RefreshRequest, RefreshResponse, TOKENS_PATH, TokenPools, batch_cancel_path,
    batch_stream_path,
};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const TELEMETRY_ENV_VAR: &str = "POOLCTL_TELEMETRY_ENDPOINT";
const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(2);

/// CLI-level error type separating validation, authentication and operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Unauthorized(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
            Self::Unauthorized(_) => 4,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::Unauthorized(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.display_message())
    }
}

impl std::error::Error for CliError {}

impl From<PoolError> for CliError {
    fn from(err: PoolError) -> Self {
        let message = err.toast_message();
        match err {
            PoolError::Validation { .. }
            | PoolError::Duplicate { .. }
            | PoolError::NotFound { .. }
            | PoolError::Batch(
                BatchError::Busy { .. } | BatchError::EmptySelection | BatchError::NotRunning,
            ) => Self::Validation(message),
            PoolError::Unauthorized { .. } => Self::Unauthorized(format!(
                "{message} (pass --admin-key or set POOLCTL_ADMIN_KEY)"
            )),
            other => Self::Failure(anyhow::Error::new(other).context(message)),
        }
    }
}

/// HTTP clients and telemetry built once per invocation.
#[derive(Clone)]
pub(crate) struct CliDependencies {
    pub(crate) client: Client,
    pub(crate) stream_client: Client,
    pub(crate) telemetry: Option<TelemetryEmitter>,
}

impl CliDependencies {
    /// Build the request client (overall timeout) and the stream client
    /// (connect timeout only; the idle watchdog covers stalls).
    pub(crate) fn new(timeout_secs: u64, trace_id: &str) -> CliResult<Self> {
        let mut default_headers = HeaderMap::new();
        let request_id = HeaderValue::from_str(trace_id).map_err(|_| {
            CliError::failure(anyhow!("trace identifier contains invalid characters"))
        })?;
        default_headers.insert(HEADER_REQUEST_ID, request_id);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(default_headers.clone())
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;
        let stream_client = Client::builder()
            .connect_timeout(STREAM_CONNECT_TIMEOUT)
            .default_headers(default_headers)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build stream client: {err}")))?;

        Ok(Self {
            client,
            stream_client,
            telemetry: TelemetryEmitter::from_env(),
        })
    }
}

/// Admin API context; implements [`AdminBackend`] over HTTP.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) client: Client,
    pub(crate) stream_client: Client,
    pub(crate) base_url: Url,
    pub(crate) admin_key: String,
}

impl AppContext {
    /// Resolve an endpoint below the base URL, keeping any mount prefix such as `/grok/`.
    fn url(&self, path: &str) -> PoolResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let mount = format!("{}/", base.path());
            base.set_path(&mount);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|err| PoolError::validation("api_url", format!("invalid base URL: {err}")))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(AUTHORIZATION, format!("Bearer {}", self.admin_key))
    }

    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> PoolResult<Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|err| PoolError::transport(operation, err))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_problem(operation, response).await)
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> PoolResult<T> {
        let response = self.send(operation, builder).await?;
        decode_json(operation, response).await
    }
}

#[async_trait]
impl AdminBackend for AppContext {
    async fn load_tokens(&self) -> PoolResult<TokenPools> {
        let url = self.url(TOKENS_PATH)?;
        self.send_json("tokens.load", self.client.get(url)).await
    }

    async fn replace_tokens(&self, pools: &TokenPools) -> PoolResult<()> {
        let url = self.url(TOKENS_PATH)?;
        self.send("tokens.replace", self.client.post(url).json(pools))
            .await
            .map(drop)
    }

    async fn refresh_token(&self, token: &str) -> PoolResult<RefreshResponse> {
        let url = self.url(REFRESH_PATH)?;
        let body = RefreshRequest {
            token: token.to_string(),
        };
        self.send_json("tokens.refresh", self.client.post(url).json(&body))
            .await
    }

    async fn start_refresh(&self, tokens: &[String]) -> PoolResult<AsyncTaskResponse> {
        let url = self.url(REFRESH_ASYNC_PATH)?;
        let body = BatchTokensRequest {
            tokens: Some(tokens.to_vec()),
        };
        self.send_json("batch.refresh", self.client.post(url).json(&body))
            .await
    }

    async fn start_nsfw_enable(&self, tokens: Option<&[String]>) -> PoolResult<AsyncTaskResponse> {
        let url = self.url(NSFW_ENABLE_ASYNC_PATH)?;
        let body = BatchTokensRequest {
            tokens: tokens.map(<[String]>::to_vec),
        };
        self.send_json("batch.nsfw_enable", self.client.post(url).json(&body))
            .await
    }

    async fn open_batch_stream(&self, task_id: &str) -> PoolResult<BatchEventStream> {
        let mut url = self.url(&batch_stream_path(task_id))?;
        url.query_pairs_mut().append_pair("app_key", &self.admin_key);
        let builder = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream");
        let response = self.send("batch.stream", builder).await?;
        Ok(event_stream(response))
    }

    async fn cancel_batch(&self, task_id: &str) -> PoolResult<()> {
        let url = self.url(&batch_cancel_path(task_id))?;
        self.send("batch.cancel", self.client.post(url)).await.map(drop)
    }
}

struct BodyEvents<S> {
    body: S,
    decoder: BatchEventDecoder,
    queue: VecDeque<BatchEvent>,
    closed: bool,
}

/// Turn an SSE response body into decoded batch events.
pub(crate) fn event_stream(response: Response) -> BatchEventStream {
    let state = BodyEvents {
        body: response.bytes_stream().boxed(),
        decoder: BatchEventDecoder::default(),
        queue: VecDeque::new(),
        closed: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.closed {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.queue.extend(state.decoder.push_bytes(&chunk)),
                Some(Err(err)) => {
                    state.closed = true;
                    return Some((Err(PoolError::transport("batch.stream", err)), state));
                }
                None => {
                    state.closed = true;
                    state.queue.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

/// Decode a success body, mapping parse failures to `InvalidJson`.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> PoolResult<T> {
    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| PoolError::transport(operation, err))?;
    serde_json::from_slice(&bytes).map_err(|_| PoolError::InvalidJson { operation, status })
}

/// Classify a non-success response.
pub(crate) async fn classify_problem(operation: &'static str, response: Response) -> PoolError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return PoolError::Unauthorized { operation };
    }
    let bytes = response.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<ErrorBody>(&bytes)
        .ok()
        .and_then(|body| body.message())
        .or_else(|| {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            (!text.is_empty() && text.len() <= 200).then_some(text)
        });
    PoolError::HttpStatus {
        operation,
        status: status.as_u16(),
        message,
    }
}

/// Posts one [`CommandReport`] per invocation when `POOLCTL_TELEMETRY_ENDPOINT` is set.
#[derive(Clone)]
pub(crate) struct TelemetryEmitter {
    pub(crate) client: Client,
    pub(crate) endpoint: Url,
}

impl TelemetryEmitter {
    pub(crate) fn from_env() -> Option<Self> {
        let raw = std::env::var(TELEMETRY_ENV_VAR).ok()?;
        let endpoint = match parse_url(raw.trim()) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring {TELEMETRY_ENV_VAR}");
                return None;
            }
        };
        let client = Client::builder()
            .timeout(TELEMETRY_TIMEOUT)
            .build()
            .ok()?;
        Some(Self { client, endpoint })
    }

    /// Best effort; failures are only logged.
    pub(crate) async fn emit(&self, report: &CommandReport<'_>) {
        match self
            .client
            .post(self.endpoint.clone())
            .json(report)
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                tracing::debug!(status = %response.status(), "telemetry endpoint refused report");
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "telemetry emit failed"),
        }
    }
}

/// Outcome of one CLI invocation.
#[derive(Debug, Serialize)]
pub(crate) struct CommandReport<'a> {
    pub(crate) command: &'a str,
    pub(crate) trace_id: &'a str,
    pub(crate) outcome: &'static str,
    pub(crate) exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<&'a str>,
    pub(crate) duration_ms: u64,
    pub(crate) timestamp_ms: u64,
}

/// Parse the API URL provided to the CLI.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}

/// Wall-clock epoch millis; 0 if the clock is before the epoch.
#[must_use]
pub(crate) fn timestamp_now_ms() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    millis(since_epoch)
}

/// Saturating conversion of a duration to whole milliseconds.
#[must_use]
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
