use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use poolctl_core::{
    AdminBackend, BatchAction, BatchError, BatchEvent, BatchEventStream, BatchOutcome, BatchState,
    MSG_CANCELLED, NewToken, PoolError, PoolResult, Session, SessionConfig, TokenFilter,
    ToastLevel,
};
use poolctl_models::{AsyncTaskResponse, BatchSummary, RawTokenEntry, RefreshResponse, TokenPools};
use serde_json::json;

#[derive(Default)]
struct FakeBackend {
    pools: Mutex<TokenPools>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    reject_key: AtomicBool,
    fail_saves: AtomicBool,
    script: Mutex<Vec<PoolResult<BatchEvent>>>,
    hang_after_script: AtomicBool,
    hang_cancel: AtomicBool,
    reject_start: AtomicBool,
    cancels: Mutex<Vec<String>>,
    started: Mutex<Vec<Vec<String>>>,
}

impl FakeBackend {
    fn with_tokens(pool: &str, tokens: &[&str]) -> Self {
        let backend = Self::default();
        backend.pools.lock().expect("pools").insert(
            pool.to_string(),
            tokens
                .iter()
                .map(|token| RawTokenEntry::Bare((*token).to_string()))
                .collect(),
        );
        backend
    }

    fn script(&self, events: Vec<PoolResult<BatchEvent>>, hang: bool) {
        *self.script.lock().expect("script") = events;
        self.hang_after_script.store(hang, Ordering::SeqCst);
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminBackend for FakeBackend {
    async fn load_tokens(&self) -> PoolResult<TokenPools> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.reject_key.load(Ordering::SeqCst) {
            return Err(PoolError::Unauthorized {
                operation: "tokens.load",
            });
        }
        Ok(self.pools.lock().expect("pools").clone())
    }

    async fn replace_tokens(&self, pools: &TokenPools) -> PoolResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PoolError::HttpStatus {
                operation: "tokens.replace",
                status: 500,
                message: None,
            });
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.pools.lock().expect("pools") = pools.clone();
        Ok(())
    }

    async fn refresh_token(&self, token: &str) -> PoolResult<RefreshResponse> {
        Ok(RefreshResponse {
            status: "success".into(),
            results: [(token.to_string(), true)].into_iter().collect(),
        })
    }

    async fn start_refresh(&self, tokens: &[String]) -> PoolResult<AsyncTaskResponse> {
        self.started.lock().expect("started").push(tokens.to_vec());
        let status = if self.reject_start.load(Ordering::SeqCst) {
            "error"
        } else {
            "success"
        };
        Ok(AsyncTaskResponse {
            status: status.into(),
            task_id: Some("task-1".into()),
            total: Some(tokens.len() as u64),
        })
    }

    async fn start_nsfw_enable(&self, _tokens: Option<&[String]>) -> PoolResult<AsyncTaskResponse> {
        Ok(AsyncTaskResponse {
            status: "success".into(),
            task_id: None,
            total: None,
        })
    }

    async fn open_batch_stream(&self, _task_id: &str) -> PoolResult<BatchEventStream> {
        let events = std::mem::take(&mut *self.script.lock().expect("script"));
        let scripted = stream::iter(events);
        if self.hang_after_script.load(Ordering::SeqCst) {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    async fn cancel_batch(&self, task_id: &str) -> PoolResult<()> {
        self.cancels.lock().expect("cancels").push(task_id.to_string());
        if self.hang_cancel.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

async fn loaded(backend: FakeBackend) -> anyhow::Result<Session<FakeBackend>> {
    let mut session = Session::new(backend, SessionConfig::default());
    session.load().await?;
    Ok(session)
}

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

#[tokio::test]
async fn refresh_batch_runs_to_done_and_reloads_once() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a", "b", "c"])).await?;
    session.select_filtered(TokenFilter::All);
    session.backend().script(
        vec![
            Ok(BatchEvent::Progress {
                total: 3,
                processed: 1,
            }),
            Ok(BatchEvent::Done {
                total: 3,
                summary: Some(BatchSummary { ok: 3, fail: 0 }),
                warning: None,
            }),
        ],
        false,
    );
    let loads_before = session.backend().loads();

    let mut seen = Vec::new();
    let outcome = session
        .run_batch(BatchAction::Refresh, never(), |job| {
            seen.push((job.processed, job.total, job.percent()));
        })
        .await?;

    assert_eq!(seen, [(1, 3, 33)]);
    assert!(matches!(outcome, BatchOutcome::Done { .. }));
    assert!(!outcome.needs_attention());
    assert_eq!(session.backend().loads() - loads_before, 1);
    assert_eq!(*session.batch_state(), BatchState::Idle);
    let toasts = session.drain_toasts();
    assert_eq!(toasts.last().map(|toast| toast.level), Some(ToastLevel::Success));
    Ok(())
}

#[tokio::test]
async fn second_batch_is_rejected_while_running() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a", "b", "c"])).await?;
    session.select_filtered(TokenFilter::All);
    assert!(session.begin_batch(BatchAction::Refresh).await?.is_none());
    session.apply_event(BatchEvent::Progress {
        total: 3,
        processed: 2,
    });
    let before = session.batch_state().clone();

    let err = session
        .begin_batch(BatchAction::Refresh)
        .await
        .expect_err("busy");
    assert!(matches!(err, PoolError::Batch(BatchError::Busy { .. })));
    assert_eq!(*session.batch_state(), before);
    assert_eq!(session.backend().started.lock().expect("started").len(), 1);
    assert_eq!(
        session.toasts().last().map(|toast| toast.level),
        Some(ToastLevel::Error)
    );
    Ok(())
}

#[tokio::test]
async fn empty_selection_never_reaches_the_server() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a"])).await?;
    let err = session
        .begin_batch(BatchAction::Refresh)
        .await
        .expect_err("empty");
    assert!(matches!(err, PoolError::Batch(BatchError::EmptySelection)));
    assert!(session.backend().started.lock().expect("started").is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_drops_stream_and_reloads() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a", "b", "c"])).await?;
    session.select_filtered(TokenFilter::All);
    session.backend().script(
        vec![Ok(BatchEvent::Progress {
            total: 3,
            processed: 1,
        })],
        true,
    );
    let loads_before = session.backend().loads();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let mut trigger = Some(tx);
    let cancel = async move {
        let _ = rx.await;
    };
    let outcome = session
        .run_batch(BatchAction::Refresh, cancel, move |_| {
            if let Some(tx) = trigger.take() {
                let _ = tx.send(());
            }
        })
        .await?;

    assert_eq!(outcome, BatchOutcome::Cancelled);
    assert_eq!(*session.backend().cancels.lock().expect("cancels"), ["task-1"]);
    assert_eq!(session.backend().loads() - loads_before, 1);
    assert_eq!(*session.batch_state(), BatchState::Idle);
    assert!(session.toasts().iter().any(|toast| toast.message == MSG_CANCELLED));
    Ok(())
}

#[tokio::test]
async fn silent_stream_trips_the_watchdog() -> anyhow::Result<()> {
    let backend = FakeBackend::with_tokens("ssoBasic", &["a"]);
    let config = SessionConfig {
        batch_idle_timeout: Some(Duration::from_millis(20)),
        ..SessionConfig::default()
    };
    let mut session = Session::new(backend, config);
    session.load().await?;
    session.select_filtered(TokenFilter::All);
    session.backend().script(Vec::new(), true);

    let outcome = session
        .run_batch(BatchAction::Refresh, never(), |_| {})
        .await?;
    assert!(matches!(outcome, BatchOutcome::Error { .. }));
    assert_eq!(*session.batch_state(), BatchState::Idle);
    Ok(())
}

#[tokio::test]
async fn stream_ending_early_is_an_error() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a"])).await?;
    session.select_filtered(TokenFilter::All);
    session.backend().script(
        vec![Ok(BatchEvent::Snapshot {
            total: 1,
            processed: 0,
        })],
        false,
    );
    let outcome = session
        .run_batch(BatchAction::Refresh, never(), |_| {})
        .await?;
    assert!(matches!(outcome, BatchOutcome::Error { .. }));
    Ok(())
}

#[tokio::test]
async fn missing_task_id_fails_the_start() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a"])).await?;
    session.select_filtered(TokenFilter::All);
    let loads_before = session.backend().loads();
    let err = session
        .begin_batch(BatchAction::NsfwEnable)
        .await
        .expect_err("no task id");
    assert!(matches!(err, PoolError::Batch(BatchError::MissingTaskId)));
    assert_eq!(session.backend().loads() - loads_before, 1);
    assert_eq!(*session.batch_state(), BatchState::Idle);
    Ok(())
}

#[tokio::test]
async fn local_delete_saves_and_reloads() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a", "b", "c"])).await?;
    session.toggle("b");
    let loads_before = session.backend().loads();
    let outcome = session
        .run_batch(BatchAction::Delete, never(), |_| {})
        .await?;
    assert!(matches!(outcome, BatchOutcome::Done { .. }));
    assert_eq!(session.backend().loads() - loads_before, 1);
    let tokens: Vec<_> = session.records().iter().map(|r| r.token.as_str()).collect();
    assert_eq!(tokens, ["a", "c"]);
    Ok(())
}

#[tokio::test]
async fn duplicate_import_adds_only_new_tokens() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a", "b"])).await?;
    let report = session.import("ssoBasic", "a\nb\nc\nd\nd", None).await?;
    assert_eq!((report.added, report.duplicates), (2, 3));
    assert_eq!(session.records().len(), 4);
    assert_eq!(session.backend().saves.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn unauthorized_load_logs_out() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a"])).await?;
    session.backend().reject_key.store(true, Ordering::SeqCst);
    let err = session.load().await.expect_err("rejected");
    assert!(err.is_unauthorized());
    assert!(!session.is_logged_in());
    assert!(session.records().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_save_keeps_optimistic_edit() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a"])).await?;
    session.backend().fail_saves.store(true, Ordering::SeqCst);
    let result = session
        .add(NewToken {
            token: "b".into(),
            pool: "ssoBasic".into(),
            ..NewToken::default()
        })
        .await;
    assert!(matches!(result, Err(PoolError::HttpStatus { status: 500, .. })));
    assert!(session.find("b").is_some());
    assert_eq!(
        session.toasts().last().map(|toast| toast.message.as_str()),
        Some("request failed (HTTP 500)")
    );
    Ok(())
}

#[tokio::test]
async fn refresh_one_reloads_after_success() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a"])).await?;
    let loads_before = session.backend().loads();
    let response = session.refresh_one("a").await?;
    assert_eq!(response.results.get("a"), Some(&true));
    assert_eq!(session.backend().loads() - loads_before, 1);
    Ok(())
}

#[tokio::test]
async fn cancel_finishes_even_if_the_server_never_answers() -> anyhow::Result<()> {
    let backend = FakeBackend::with_tokens("ssoBasic", &["a", "b"]);
    backend.hang_cancel.store(true, Ordering::SeqCst);
    let config = SessionConfig {
        cancel_request_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let mut session = Session::new(backend, config);
    session.load().await?;
    session.select_filtered(TokenFilter::All);
    session.backend().script(Vec::new(), true);
    let loads_before = session.backend().loads();

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        session.run_batch(BatchAction::Refresh, async {}, |_| {}),
    )
    .await??;

    assert_eq!(outcome, BatchOutcome::Cancelled);
    assert_eq!(*session.backend().cancels.lock().expect("cancels"), ["task-1"]);
    assert_eq!(*session.batch_state(), BatchState::Idle);
    assert_eq!(session.backend().loads() - loads_before, 1);
    assert!(session.toasts().iter().any(|toast| toast.message == MSG_CANCELLED));
    Ok(())
}

#[tokio::test]
async fn partial_failure_ends_done_with_a_warning() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a", "b", "c"])).await?;
    session.select_filtered(TokenFilter::All);

    session.backend().script(
        vec![Ok(BatchEvent::Done {
            total: 3,
            summary: Some(BatchSummary { ok: 2, fail: 1 }),
            warning: None,
        })],
        false,
    );
    let loads_before = session.backend().loads();
    let outcome = session
        .run_batch(BatchAction::Refresh, never(), |_| {})
        .await?;
    assert!(matches!(outcome, BatchOutcome::Done { .. }));
    assert_eq!(session.backend().loads() - loads_before, 1);
    let toasts = session.drain_toasts();
    let last = toasts.last().expect("outcome toast");
    assert_eq!(last.level, ToastLevel::Warning);
    assert!(last.message.contains("fail 1"));

    session.backend().script(
        vec![Ok(BatchEvent::Done {
            total: 3,
            summary: Some(BatchSummary { ok: 3, fail: 0 }),
            warning: Some("2 tokens hit rate limits".into()),
        })],
        false,
    );
    let loads_before = session.backend().loads();
    session
        .run_batch(BatchAction::Refresh, never(), |_| {})
        .await?;
    assert_eq!(session.backend().loads() - loads_before, 1);
    let toasts = session.drain_toasts();
    let last = toasts.last().expect("outcome toast");
    assert_eq!(last.level, ToastLevel::Warning);
    assert!(last.message.ends_with(": 2 tokens hit rate limits"));
    Ok(())
}

#[tokio::test]
async fn server_cancelled_event_skips_the_cancel_call() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a", "b"])).await?;
    session.select_filtered(TokenFilter::All);
    session.backend().script(
        vec![
            Ok(BatchEvent::Progress {
                total: 2,
                processed: 1,
            }),
            Ok(BatchEvent::Cancelled),
        ],
        true,
    );
    let loads_before = session.backend().loads();

    let outcome = session
        .run_batch(BatchAction::Refresh, never(), |_| {})
        .await?;

    assert_eq!(outcome, BatchOutcome::Cancelled);
    assert!(session.backend().cancels.lock().expect("cancels").is_empty());
    assert_eq!(session.backend().loads() - loads_before, 1);
    assert_eq!(*session.batch_state(), BatchState::Idle);
    assert_eq!(
        session.toasts().last().map(|toast| toast.message.as_str()),
        Some(MSG_CANCELLED)
    );
    Ok(())
}

#[tokio::test]
async fn start_with_error_status_is_rejected() -> anyhow::Result<()> {
    let mut session = loaded(FakeBackend::with_tokens("ssoBasic", &["a"])).await?;
    session.select_filtered(TokenFilter::All);
    session.backend().reject_start.store(true, Ordering::SeqCst);
    let loads_before = session.backend().loads();

    let err = session
        .begin_batch(BatchAction::Refresh)
        .await
        .expect_err("rejected start");
    assert!(matches!(
        &err,
        PoolError::Rejected { operation: "batch.refresh", detail } if detail == "error"
    ));
    assert_eq!(session.backend().loads() - loads_before, 1);
    assert_eq!(*session.batch_state(), BatchState::Idle);
    Ok(())
}

#[tokio::test]
async fn one_malformed_entry_does_not_block_the_load() -> anyhow::Result<()> {
    let backend = FakeBackend::with_tokens("ssoBasic", &["good"]);
    backend
        .pools
        .lock()
        .expect("pools")
        .entry("ssoBasic".into())
        .or_default()
        .push(RawTokenEntry::Malformed(json!({"token": "t2", "quota": 80.5})));
    let mut session = Session::new(backend, SessionConfig::default());

    let report = session.load().await?;
    assert_eq!(report.loaded, 1);
    assert_eq!(report.dropped_malformed, 1);
    assert!(session.find("good").is_some());
    Ok(())
}
