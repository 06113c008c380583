//! Admin session: store, view, selection and batch slot behind one owner.
//!
//! # Design
//! - Driven through `&mut self`; async I/O is the only suspension point.
//! - Every failing operation queues a toast before returning its error.
//! - A 401 from any call logs the session out and clears local state.
//! - Each batch terminal transition triggers exactly one reload.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use poolctl_models::RefreshResponse;
use tracing::{debug, info, warn};

use crate::backend::{AdminBackend, BatchEventStream};
use crate::batch::{BatchAction, BatchEvent, BatchJob, BatchOutcome, BatchState};
use crate::error::{BatchError, MSG_CONNECTION_LOST, PoolError, PoolResult};
use crate::record::TokenRecord;
use crate::selection::{self, HeaderCheck};
use crate::stats::PoolStats;
use crate::store::{DefaultQuotas, ImportReport, LoadReport, NewToken, RecordStore, TokenPatch};
use crate::toast::{MSG_CANCELLED, Toast, ToastLevel, Toasts};
use crate::view::{PageView, TokenFilter, ViewState};

/// Default idle window before a silent progress stream is abandoned.
pub const DEFAULT_BATCH_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// Longest wait for the server to acknowledge a cancel request.
pub const DEFAULT_CANCEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Abandon a batch stream after this long without events; `None` waits forever.
    pub batch_idle_timeout: Option<Duration>,
    /// Cap on the cancel request; the job is already finished locally when it is sent.
    pub cancel_request_timeout: Duration,
    /// Quota for new tokens when none is given.
    pub default_quotas: DefaultQuotas,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_idle_timeout: Some(DEFAULT_BATCH_IDLE_TIMEOUT),
            cancel_request_timeout: DEFAULT_CANCEL_REQUEST_TIMEOUT,
            default_quotas: DefaultQuotas::default(),
        }
    }
}

enum StreamStep {
    Item(PoolResult<BatchEvent>),
    Ended,
    Stalled,
}

async fn next_step(stream: &mut BatchEventStream, idle: Option<Duration>) -> StreamStep {
    let item = match idle {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(item) => item,
            Err(_) => return StreamStep::Stalled,
        },
        None => stream.next().await,
    };
    item.map_or(StreamStep::Ended, StreamStep::Item)
}

/// One operator's view of the token pool.
pub struct Session<B> {
    backend: B,
    config: SessionConfig,
    store: RecordStore,
    view: ViewState,
    batch: BatchState,
    toasts: Toasts,
    logged_in: bool,
}

impl<B: AdminBackend> Session<B> {
    /// New, logged-in session with an empty store.
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            store: RecordStore::default(),
            view: ViewState::default(),
            batch: BatchState::default(),
            toasts: Toasts::default(),
            logged_in: true,
        }
    }

    /// Backend in use.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Records in store order.
    pub fn records(&self) -> &[TokenRecord] {
        self.store.records()
    }

    /// Look up a record.
    pub fn find(&self, token: &str) -> Option<&TokenRecord> {
        self.store.find(token)
    }

    /// Current statistics.
    pub const fn stats(&self) -> &PoolStats {
        self.store.stats()
    }

    /// Batch slot.
    pub const fn batch_state(&self) -> &BatchState {
        &self.batch
    }

    /// False once the admin key has been rejected.
    pub const fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Take pending toasts.
    pub fn drain_toasts(&mut self) -> Vec<Toast> {
        self.toasts.drain()
    }

    /// Pending toasts.
    pub fn toasts(&self) -> &[Toast] {
        self.toasts.pending()
    }

    /// Current page with the clamped page number written back.
    pub fn page(&mut self) -> PageView {
        self.view.refresh(self.store.records())
    }

    /// Change the filter.
    pub fn set_filter(&mut self, filter: TokenFilter) -> PageView {
        self.view.set_filter(self.store.records(), filter)
    }

    /// Change the page size.
    ///
    /// # Errors
    ///
    /// Rejects sizes outside the fixed options.
    pub fn set_page_size(&mut self, page_size: usize) -> PoolResult<PageView> {
        match self.view.set_page_size(self.store.records(), page_size) {
            Ok(view) => Ok(view),
            Err(err) => Err(self.report(err)),
        }
    }

    /// Jump to a page.
    pub fn go_to_page(&mut self, page: usize) -> PageView {
        self.view.go_to(self.store.records(), page)
    }

    /// Flip one token's selection.
    pub fn toggle(&mut self, token: &str) -> Option<bool> {
        selection::toggle_one(self.store.records_mut(), token)
    }

    /// Select the visible rows.
    pub fn select_visible(&mut self) {
        let page = self.page();
        selection::select_visible(self.store.records_mut(), &page);
    }

    /// Header checkbox: set every visible row.
    pub fn set_visible(&mut self, checked: bool) {
        let page = self.page();
        selection::set_visible(self.store.records_mut(), &page, checked);
    }

    /// Select everything matching `filter`.
    pub fn select_filtered(&mut self, filter: TokenFilter) -> usize {
        selection::select_filtered(self.store.records_mut(), filter)
    }

    /// Clear the selection.
    pub fn clear_selection(&mut self) {
        selection::clear_all(self.store.records_mut());
    }

    /// Selected tokens in store order.
    pub fn selected_tokens(&self) -> Vec<String> {
        selection::selected_tokens(self.store.records())
    }

    /// Number of selected records.
    pub fn selected_count(&self) -> usize {
        selection::selected_count(self.store.records())
    }

    /// Header checkbox state for the current page.
    pub fn header_state(&mut self) -> HeaderCheck {
        let page = self.page();
        selection::header_state(self.store.records(), &page)
    }

    /// Fetch the collection and replace local state.
    ///
    /// # Errors
    ///
    /// Any backend error. Prior state is kept, except on 401 which logs out.
    pub async fn load(&mut self) -> PoolResult<LoadReport> {
        match self.backend.load_tokens().await {
            Ok(pools) => {
                let report = self.store.replace_from_pools(pools);
                self.view.refresh(self.store.records());
                debug!(loaded = report.loaded, "token pool loaded");
                Ok(report)
            }
            Err(err) => Err(self.report(err)),
        }
    }

    /// Push the whole store to the server.
    ///
    /// A failure leaves the optimistic local state in place until the next load.
    ///
    /// # Errors
    ///
    /// Any backend error.
    pub async fn sync(&mut self) -> PoolResult<()> {
        let pools = self.store.to_pools();
        match self.backend.replace_tokens(&pools).await {
            Ok(()) => {
                debug!(records = self.store.len(), "token pool saved");
                Ok(())
            }
            Err(err) => Err(self.report(err)),
        }
    }

    /// Add one token and save.
    ///
    /// # Errors
    ///
    /// Validation, duplicate or sync errors.
    pub async fn add(&mut self, new: NewToken) -> PoolResult<()> {
        let token = new.token.trim().to_string();
        if let Err(err) = self.store.add(new, &self.config.default_quotas) {
            return Err(self.report(err));
        }
        self.sync().await?;
        self.toasts.push(ToastLevel::Success, format!("added {token}"));
        Ok(())
    }

    /// Import many tokens into one pool and save.
    ///
    /// # Errors
    ///
    /// Validation or sync errors.
    pub async fn import(
        &mut self,
        pool: &str,
        text: &str,
        quota: Option<i64>,
    ) -> PoolResult<ImportReport> {
        let report = match self.store.import(pool, text, quota, &self.config.default_quotas) {
            Ok(report) => report,
            Err(err) => return Err(self.report(err)),
        };
        if report.added > 0 {
            self.sync().await?;
        }
        let level = if report.duplicates > 0 {
            ToastLevel::Warning
        } else {
            ToastLevel::Success
        };
        self.toasts.push(
            level,
            format!(
                "imported {} tokens, skipped {} duplicates",
                report.added, report.duplicates
            ),
        );
        Ok(report)
    }

    /// Patch one token and save.
    ///
    /// # Errors
    ///
    /// Validation, not-found or sync errors.
    pub async fn edit(&mut self, token: &str, patch: TokenPatch) -> PoolResult<()> {
        if let Err(err) = self.store.edit(token, patch) {
            return Err(self.report(err));
        }
        self.sync().await?;
        self.toasts.push(ToastLevel::Success, format!("updated {token}"));
        Ok(())
    }

    /// Remove tokens and save. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// `NotFound` when none of the tokens exist, or sync errors.
    pub async fn delete(&mut self, tokens: &[String]) -> PoolResult<usize> {
        let removed = self.store.remove(tokens);
        if removed == 0 {
            let err = PoolError::NotFound {
                token: tokens.join(","),
            };
            return Err(self.report(err));
        }
        self.sync().await?;
        self.toasts
            .push(ToastLevel::Success, format!("deleted {removed} tokens"));
        Ok(removed)
    }

    /// Synchronously refresh one token, then reload.
    ///
    /// # Errors
    ///
    /// Backend errors, or `Rejected` when the server reports a failure status.
    pub async fn refresh_one(&mut self, token: &str) -> PoolResult<RefreshResponse> {
        let response = match self.backend.refresh_token(token).await {
            Ok(response) if response.status == "success" => response,
            Ok(response) => {
                let err = PoolError::Rejected {
                    operation: "tokens.refresh",
                    detail: response.status,
                };
                return Err(self.report(err));
            }
            Err(err) => return Err(self.report(err)),
        };
        match response.results.get(token) {
            Some(true) => self
                .toasts
                .push(ToastLevel::Success, format!("{token} is valid")),
            Some(false) => self
                .toasts
                .push(ToastLevel::Warning, format!("{token} failed validation")),
            None => self
                .toasts
                .push(ToastLevel::Info, format!("refresh requested for {token}")),
        }
        let _ = self.load().await;
        Ok(response)
    }

    /// Start a batch over the current selection.
    ///
    /// Server-side actions end in `Running`; client-local actions complete
    /// immediately and return their outcome.
    ///
    /// # Errors
    ///
    /// `Busy` or `EmptySelection` without touching the running job; a failed
    /// start finishes the job as `Error` and returns the cause.
    pub async fn begin_batch(&mut self, action: BatchAction) -> PoolResult<Option<BatchOutcome>> {
        let tokens = self.selected_tokens();
        if let Err(err) = self.batch.begin(action, tokens.len()) {
            return Err(self.report(err.into()));
        }
        info!(action = %action, tokens = tokens.len(), "batch starting");
        if action.is_server_side() {
            let (operation, started) = if action == BatchAction::Refresh {
                ("batch.refresh", self.backend.start_refresh(&tokens).await)
            } else {
                ("batch.nsfw_enable", self.backend.start_nsfw_enable(Some(&tokens)).await)
            };
            let task = started.and_then(|response| {
                if response.status != "success" {
                    return Err(PoolError::Rejected {
                        operation,
                        detail: response.status,
                    });
                }
                let task_id = response
                    .task_id
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(PoolError::Batch(BatchError::MissingTaskId))?;
                Ok((task_id, response.total))
            });
            return match task {
                Ok((task_id, total)) => {
                    self.batch.started(task_id, total)?;
                    Ok(None)
                }
                Err(err) => {
                    self.fail_batch(&err).await;
                    Err(err)
                }
            };
        }

        self.batch.started(String::new(), None)?;
        let affected = if action == BatchAction::Delete {
            self.store.remove(&tokens)
        } else {
            self.store.disable(&tokens)
        };
        let pools = self.store.to_pools();
        match self.backend.replace_tokens(&pools).await {
            Ok(()) => {
                self.batch.apply(BatchEvent::Done {
                    total: u64::try_from(affected).unwrap_or(u64::MAX),
                    summary: None,
                    warning: None,
                });
                Ok(self.conclude().await)
            }
            Err(err) if err.is_unauthorized() => {
                self.fail_batch(&err).await;
                Err(err)
            }
            Err(err) => Ok(Some(self.fail_batch(&err).await)),
        }
    }

    /// Apply one stream event to the running job.
    pub fn apply_event(&mut self, event: BatchEvent) -> Option<BatchOutcome> {
        self.batch.apply(event)
    }

    /// Cancel the running job without waiting for the server.
    ///
    /// The job finishes locally before the cancel request goes out. The
    /// request is capped by `cancel_request_timeout`; a failure or timeout is
    /// only logged.
    ///
    /// # Errors
    ///
    /// `NotRunning` when no job is active.
    pub async fn cancel_batch(&mut self) -> PoolResult<BatchOutcome> {
        let task_id = match &self.batch {
            BatchState::Running(job) => job.task_id.clone(),
            BatchState::Starting { .. } => String::new(),
            BatchState::Idle | BatchState::Finished { .. } => {
                return Err(self.report(BatchError::NotRunning.into()));
            }
        };
        self.batch.finish(BatchOutcome::Cancelled);
        if !task_id.is_empty() {
            let limit = self.config.cancel_request_timeout;
            match tokio::time::timeout(limit, self.backend.cancel_batch(&task_id)).await {
                Ok(Ok(())) => debug!(task_id = %task_id, "batch cancel acknowledged"),
                Ok(Err(err)) => {
                    warn!(task_id = %task_id, error = %err, "batch cancel request failed");
                }
                Err(_) => warn!(
                    task_id = %task_id,
                    limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "batch cancel request not acknowledged in time"
                ),
            }
        }
        Ok(self.conclude().await.unwrap_or(BatchOutcome::Cancelled))
    }

    /// Follow the running job's progress stream until it ends.
    ///
    /// Races the stream, the idle watchdog and `cancel`. `observer` sees the
    /// job after every non-terminal event.
    ///
    /// # Errors
    ///
    /// `NotRunning` when no server-side job is active; `Unauthorized` when the
    /// stream is refused for the admin key.
    pub async fn drive_batch<C, F>(&mut self, cancel: C, mut observer: F) -> PoolResult<BatchOutcome>
    where
        C: Future<Output = ()> + Send,
        F: FnMut(&BatchJob) + Send,
    {
        let task_id = match &self.batch {
            BatchState::Running(job) if !job.task_id.is_empty() => job.task_id.clone(),
            _ => return Err(self.report(BatchError::NotRunning.into())),
        };
        let mut stream = match self.backend.open_batch_stream(&task_id).await {
            Ok(stream) => stream,
            Err(err) => {
                let outcome = self.fail_batch(&err).await;
                return if err.is_unauthorized() { Err(err) } else { Ok(outcome) };
            }
        };
        let idle = self.config.batch_idle_timeout;
        tokio::pin!(cancel);
        let finished = loop {
            tokio::select! {
                biased;
                () = &mut cancel => break None,
                step = next_step(&mut stream, idle) => {
                    let failure = match step {
                        StreamStep::Item(Ok(event)) => {
                            if let Some(outcome) = self.batch.apply(event) {
                                break Some(outcome);
                            }
                            if let Some(job) = self.batch.job() {
                                observer(job);
                            }
                            continue;
                        }
                        StreamStep::Item(Err(err)) => {
                            warn!(task_id = %task_id, error = %err, "batch stream failed");
                            MSG_CONNECTION_LOST.to_string()
                        }
                        StreamStep::Ended => {
                            warn!(task_id = %task_id, "batch stream closed before a terminal event");
                            MSG_CONNECTION_LOST.to_string()
                        }
                        StreamStep::Stalled => {
                            let secs = idle.map_or(0, |limit| limit.as_secs());
                            warn!(task_id = %task_id, idle_secs = secs, "batch stream stalled");
                            format!("{MSG_CONNECTION_LOST}: no progress for {secs}s")
                        }
                    };
                    let outcome = BatchOutcome::Error { message: failure };
                    self.batch.finish(outcome.clone());
                    break Some(outcome);
                }
            }
        };
        drop(stream);
        match finished {
            None => {
                info!(task_id = %task_id, "batch cancelled by operator");
                self.cancel_batch().await
            }
            Some(outcome) => Ok(self.conclude().await.unwrap_or(outcome)),
        }
    }

    /// Start a batch over the selection and, for server-side actions, follow it.
    ///
    /// # Errors
    ///
    /// Admission and start errors from [`Self::begin_batch`], stream errors
    /// from [`Self::drive_batch`].
    pub async fn run_batch<C, F>(
        &mut self,
        action: BatchAction,
        cancel: C,
        observer: F,
    ) -> PoolResult<BatchOutcome>
    where
        C: Future<Output = ()> + Send,
        F: FnMut(&BatchJob) + Send,
    {
        match self.begin_batch(action).await? {
            Some(outcome) => Ok(outcome),
            None => self.drive_batch(cancel, observer).await,
        }
    }

    async fn fail_batch(&mut self, err: &PoolError) -> BatchOutcome {
        if err.is_unauthorized() {
            self.logout();
        }
        let outcome = BatchOutcome::Error {
            message: err.toast_message(),
        };
        self.batch.finish(outcome.clone());
        self.conclude().await.unwrap_or(outcome)
    }

    // Toast the outcome, return the slot to Idle and reload once.
    async fn conclude(&mut self) -> Option<BatchOutcome> {
        let (job, outcome) = self.batch.reset()?;
        match &outcome {
            BatchOutcome::Done { summary, warning } => {
                let mut message = format!("batch {} finished ({} tokens)", job.action, job.total);
                if let Some(summary) = summary {
                    message.push_str(&format!(", ok {} fail {}", summary.ok, summary.fail));
                }
                if let Some(warning) = warning {
                    message.push_str(&format!(": {warning}"));
                }
                let level = if outcome.needs_attention() {
                    ToastLevel::Warning
                } else {
                    ToastLevel::Success
                };
                self.toasts.push(level, message);
            }
            BatchOutcome::Cancelled => self.toasts.push(ToastLevel::Warning, MSG_CANCELLED),
            BatchOutcome::Error { message } => {
                self.toasts.push(ToastLevel::Error, message.clone());
            }
        }
        info!(
            action = %job.action,
            task_id = %job.task_id,
            processed = job.processed,
            total = job.total,
            "batch finished"
        );
        if self.logged_in {
            let _ = self.load().await;
        }
        Some(outcome)
    }

    fn report(&mut self, err: PoolError) -> PoolError {
        if err.is_unauthorized() {
            self.logout();
        }
        self.toasts.push(ToastLevel::Error, err.toast_message());
        err
    }

    /// Forget the admin session and every local record.
    pub fn logout(&mut self) {
        if self.logged_in {
            warn!("admin key rejected; session logged out");
        }
        self.logged_in = false;
        self.store.clear();
        self.view = ViewState::default();
    }
}
