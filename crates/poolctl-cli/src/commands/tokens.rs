use std::collections::BTreeSet;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::Path;

use anyhow::anyhow;
use poolctl_core::{NewToken, SessionConfig, TokenPatch, TokenStatus};

use crate::cli::{
    AddArgs, EditArgs, ImportArgs, LsArgs, OutputFormat, RefreshArgs, RmArgs, confirm,
};
use crate::client::{AppContext, CliError, CliResult};
use crate::commands::{open_session, settle};
use crate::output::{render_import, render_page, render_refresh, render_stats};

pub(crate) async fn handle_ls(
    ctx: AppContext,
    config: SessionConfig,
    args: LsArgs,
    output: OutputFormat,
) -> CliResult<()> {
    let mut session = open_session(ctx, config).await?;
    for token in &args.select {
        if session.toggle(token).is_none() {
            return Err(CliError::validation(format!("token not found: {token}")));
        }
    }

    let sized = session.set_page_size(args.page_size);
    settle(&mut session, sized)?;
    session.set_filter(args.filter);
    let page = session.go_to_page(args.page);
    let header = session.header_state();
    render_page(session.records(), &page, header, session.stats(), output)
}

pub(crate) async fn handle_stats(
    ctx: AppContext,
    config: SessionConfig,
    output: OutputFormat,
) -> CliResult<()> {
    let session = open_session(ctx, config).await?;
    render_stats(session.stats(), output)
}

pub(crate) async fn handle_add(
    ctx: AppContext,
    config: SessionConfig,
    args: AddArgs,
) -> CliResult<()> {
    let mut session = open_session(ctx, config).await?;
    let tags: BTreeSet<String> = args.tags.into_iter().collect();
    for token in args.tokens {
        let new = NewToken {
            token,
            pool: args.pool.clone(),
            quota: args.quota,
            note: args.note.clone(),
            tags: tags.clone(),
        };
        let added = session.add(new).await;
        settle(&mut session, added)?;
    }
    Ok(())
}

pub(crate) async fn handle_import(
    ctx: AppContext,
    config: SessionConfig,
    args: ImportArgs,
    output: OutputFormat,
) -> CliResult<()> {
    let text = read_import_source(args.file.as_deref())?;
    let mut session = open_session(ctx, config).await?;
    let imported = session.import(&args.pool, &text, args.quota).await;
    let report = settle(&mut session, imported)?;
    render_import(&report, output)
}

fn read_import_source(file: Option<&Path>) -> CliResult<String> {
    match file {
        Some(path) if path != Path::new("-") => fs::read_to_string(path).map_err(|err| {
            CliError::failure(anyhow!("failed to read '{}': {err}", path.display()))
        }),
        _ => {
            let stdin = io::stdin();
            if stdin.is_terminal() {
                return Err(CliError::validation(
                    "pass --file or pipe tokens on stdin",
                ));
            }
            io::read_to_string(stdin)
                .map_err(|err| CliError::failure(anyhow!("failed to read stdin: {err}")))
        }
    }
}

pub(crate) async fn handle_edit(
    ctx: AppContext,
    config: SessionConfig,
    args: EditArgs,
) -> CliResult<()> {
    let patch = edit_patch(args.pool, args.quota, args.note, args.status, args.tags, args.clear_tags);
    if patch.is_empty() {
        return Err(CliError::validation(
            "nothing to change; pass --pool, --quota, --note, --status, --tag or --clear-tags",
        ));
    }
    let mut session = open_session(ctx, config).await?;
    let edited = session.edit(&args.token, patch).await;
    settle(&mut session, edited)
}

fn edit_patch(
    pool: Option<String>,
    quota: Option<i64>,
    note: Option<String>,
    status: Option<String>,
    tags: Vec<String>,
    clear_tags: bool,
) -> TokenPatch {
    let tags = if clear_tags {
        Some(BTreeSet::new())
    } else if tags.is_empty() {
        None
    } else {
        Some(tags.into_iter().collect())
    };
    TokenPatch {
        pool,
        quota,
        note,
        status: status.map(TokenStatus::from),
        tags,
    }
}

pub(crate) async fn handle_rm(
    ctx: AppContext,
    config: SessionConfig,
    args: RmArgs,
) -> CliResult<()> {
    confirm(
        &format!("delete {} token(s)?", args.tokens.len()),
        args.yes,
    )?;
    let mut session = open_session(ctx, config).await?;
    let deleted = session.delete(&args.tokens).await;
    settle(&mut session, deleted).map(drop)
}

pub(crate) async fn handle_refresh(
    ctx: AppContext,
    config: SessionConfig,
    args: RefreshArgs,
    output: OutputFormat,
) -> CliResult<()> {
    let mut session = open_session(ctx, config).await?;
    let refreshed = session.refresh_one(&args.token).await;
    let response = settle(&mut session, refreshed)?;
    render_refresh(&response, output)
}
