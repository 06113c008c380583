use std::future;

use anyhow::anyhow;
use poolctl_core::{BatchOutcome, Session, SessionConfig, TokenFilter};

use crate::cli::{BatchArgs, OutputFormat, confirm};
use crate::client::{AppContext, CliError, CliResult};
use crate::commands::{flush_toasts, open_session};
use crate::output::{print_progress, render_outcome};

pub(crate) async fn handle_batch(
    ctx: AppContext,
    config: SessionConfig,
    args: BatchArgs,
    output: OutputFormat,
) -> CliResult<()> {
    if args.tokens.is_empty() && args.filter.is_none() && !args.all {
        return Err(CliError::validation(
            "select tokens with --token, --filter or --all",
        ));
    }

    let mut session = open_session(ctx, config).await?;
    select_targets(&mut session, &args)?;
    if args.action.is_destructive() {
        confirm(
            &format!("{} {} token(s)?", args.action, session.selected_count()),
            args.yes,
        )?;
    }

    // Ctrl-C stops following the stream and asks the server to cancel.
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            future::pending::<()>().await;
        }
    };
    let mut progress_shown = false;
    let result = session
        .run_batch(args.action, cancel, |job| {
            print_progress(job);
            progress_shown = true;
        })
        .await;
    if progress_shown {
        eprintln!();
    }

    let failed = matches!(result, Err(_) | Ok(BatchOutcome::Error { .. }));
    flush_toasts(&mut session, failed);
    let outcome = result?;
    if !failed || matches!(output, OutputFormat::Json) {
        render_outcome(&outcome, output)?;
    }
    match outcome {
        BatchOutcome::Error { message } => Err(CliError::failure(anyhow!(
            "batch {} failed: {message}",
            args.action
        ))),
        BatchOutcome::Done { .. } | BatchOutcome::Cancelled => Ok(()),
    }
}

fn select_targets(session: &mut Session<AppContext>, args: &BatchArgs) -> CliResult<()> {
    if args.all {
        session.select_filtered(TokenFilter::All);
    }
    if let Some(filter) = args.filter {
        session.select_filtered(filter);
    }
    for token in &args.tokens {
        match session.find(token) {
            None => return Err(CliError::validation(format!("token not found: {token}"))),
            Some(record) if !record.selected => {
                session.toggle(token);
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use poolctl_core::BatchAction;
    use poolctl_models::{REFRESH_ASYNC_PATH, TOKENS_PATH, batch_stream_path};
    use reqwest::Client;
    use serde_json::json;

    use crate::client::{CliDependencies, HEADER_REQUEST_ID};

    fn context_with(server: &MockServer, deps: &CliDependencies) -> AppContext {
        AppContext {
            client: deps.client.clone(),
            stream_client: deps.stream_client.clone(),
            base_url: server.base_url().parse().expect("valid URL"),
            admin_key: "admin".to_string(),
        }
    }

    fn mock_pools(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path(TOKENS_PATH);
            then.status(200).json_body(json!({
                "ssoBasic": [
                    {"token": "tok-a", "status": "active"},
                    {"token": "tok-b", "status": "expired"}
                ]
            }));
        });
    }

    fn batch_args(action: BatchAction) -> BatchArgs {
        BatchArgs {
            action,
            tokens: Vec::new(),
            filter: None,
            all: false,
            yes: true,
        }
    }

    #[tokio::test]
    async fn refresh_batch_follows_stream_to_done() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_pools(&server);
        let start = server.mock(|when, then| {
            when.method(POST)
                .path(REFRESH_ASYNC_PATH)
                .header("authorization", "Bearer admin")
                .header(HEADER_REQUEST_ID, "trace-batch")
                .json_body(json!({"tokens": ["tok-a", "tok-b"]}));
            then.status(200)
                .json_body(json!({"status": "success", "task_id": "t-1", "total": 2}));
        });
        let stream = server.mock(|when, then| {
            when.method(GET)
                .path(batch_stream_path("t-1"))
                .query_param("app_key", "admin")
                .header("accept", "text/event-stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"type\":\"snapshot\",\"total\":2,\"processed\":0}\n\n",
                    "data: {\"type\":\"progress\",\"total\":2,\"processed\":1}\n\n",
                    "data: {\"type\":\"done\",\"total\":2,",
                    "\"result\":{\"summary\":{\"ok\":2,\"fail\":0}}}\n\n"
                ));
        });

        let deps = CliDependencies::new(5, "trace-batch")
            .map_err(|err| anyhow!(err.display_message()))?;
        let mut args = batch_args(BatchAction::Refresh);
        args.all = true;
        handle_batch(context_with(&server, &deps), SessionConfig::default(), args, OutputFormat::Json)
            .await
            .map_err(|err| anyhow!(err.display_message()))?;
        start.assert();
        stream.assert();
        Ok(())
    }

    #[tokio::test]
    async fn stream_error_event_fails_the_command() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_pools(&server);
        server.mock(|when, then| {
            when.method(POST).path(REFRESH_ASYNC_PATH);
            then.status(200).json_body(json!({"status": "success", "task_id": "t-2"}));
        });
        server.mock(|when, then| {
            when.method(GET).path(batch_stream_path("t-2"));
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("event: error\ndata: upstream exploded\n\n");
        });

        let deps = CliDependencies::new(5, "trace-error")
            .map_err(|err| anyhow!(err.display_message()))?;
        let mut args = batch_args(BatchAction::Refresh);
        args.tokens = vec!["tok-a".into()];
        let err = handle_batch(context_with(&server, &deps), SessionConfig::default(), args, OutputFormat::Table)
            .await
            .expect_err("error event");
        assert_eq!(err.exit_code(), 3);
        assert!(err.display_message().contains("upstream exploded"));
        Ok(())
    }

    #[tokio::test]
    async fn local_disable_saves_the_collection() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_pools(&server);
        let save = server.mock(|when, then| {
            when.method(POST).path(TOKENS_PATH).body_includes("disabled");
            then.status(200);
        });

        let mut args = batch_args(BatchAction::Disable);
        args.filter = Some(TokenFilter::Expired);
        let ctx = AppContext {
            client: Client::new(),
            stream_client: Client::new(),
            base_url: server.base_url().parse()?,
            admin_key: "admin".into(),
        };
        handle_batch(ctx, SessionConfig::default(), args, OutputFormat::Table)
            .await
            .map_err(|err| anyhow!(err.display_message()))?;
        save.assert();
        Ok(())
    }

    #[tokio::test]
    async fn batch_requires_a_selection_flag() {
        let ctx = AppContext {
            client: Client::new(),
            stream_client: Client::new(),
            base_url: "http://127.0.0.1:9".parse().expect("valid URL"),
            admin_key: "admin".into(),
        };
        let err = handle_batch(
            ctx,
            SessionConfig::default(),
            batch_args(BatchAction::Refresh),
            OutputFormat::Table,
        )
        .await
        .expect_err("no selection");
        assert!(matches!(err, CliError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_pools(&server);
        let deps = CliDependencies::new(5, "trace-unknown")
            .map_err(|err| anyhow!(err.display_message()))?;
        let mut args = batch_args(BatchAction::NsfwEnable);
        args.tokens = vec!["ghost".into()];
        let err = handle_batch(context_with(&server, &deps), SessionConfig::default(), args, OutputFormat::Table)
            .await
            .expect_err("unknown token");
        assert!(err.display_message().contains("ghost"));
        Ok(())
    }
}
