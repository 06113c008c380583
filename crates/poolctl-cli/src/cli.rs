//! Argument parsing and command dispatch.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand, ValueEnum};
use poolctl_core::{BatchAction, DefaultQuotas, SessionConfig, TOAST_LOG_TARGET, TokenFilter};
use poolctl_telemetry::{LogFormat, LoggingConfig, TelemetryError, command_span, init_logging};
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::client::{
    AppContext, CliDependencies, CliError, CliResult, CommandReport, millis, parse_url,
    timestamp_now_ms,
};
use crate::commands::batch::handle_batch;
use crate::commands::tokens::{
    handle_add, handle_edit, handle_import, handle_ls, handle_refresh, handle_rm, handle_stats,
};

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BATCH_IDLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Parse arguments, run the command and return the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    // Toasts are printed directly; keep them out of the log stream.
    let level = format!("{},{TOAST_LOG_TARGET}=off", cli.log_level);
    if let Err(err) = init_logging(&LoggingConfig {
        level: &level,
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        ..LoggingConfig::default()
    }) {
        eprintln!("warning: {err}");
    }
    let command_name = command_label(&cli.command);
    let trace_id = Uuid::new_v4().to_string();
    let deps = match CliDependencies::new(cli.timeout, &trace_id) {
        Ok(deps) => deps,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            return err.exit_code();
        }
    };
    let telemetry = deps.telemetry.clone();

    let started = Instant::now();
    let result = dispatch(cli, &deps)
        .instrument(command_span(command_name, &trace_id))
        .await;

    let (exit_code, message, outcome) = match result {
        Ok(()) => (0, None, "success"),
        Err(err) => {
            let exit_code = err.exit_code();
            let message = err.display_message();
            eprintln!("error: {message}");
            (exit_code, Some(message), "error")
        }
    };

    if let Some(emitter) = &telemetry {
        emitter
            .emit(&CommandReport {
                command: command_name,
                trace_id: &trace_id,
                outcome,
                exit_code,
                message: message.as_deref(),
                duration_ms: millis(started.elapsed()),
                timestamp_ms: timestamp_now_ms(),
            })
            .await;
    }

    exit_code
}

async fn dispatch(cli: Cli, deps: &CliDependencies) -> CliResult<()> {
    let admin_key = ensure_admin_key(cli.admin_key)?;
    let config = session_config(cli.batch_idle_timeout, &cli.default_quota)?;
    let ctx = AppContext {
        client: deps.client.clone(),
        stream_client: deps.stream_client.clone(),
        base_url: cli.api_url,
        admin_key,
    };
    let output = cli.output;

    match cli.command {
        Command::Ls(args) => handle_ls(ctx, config, args, output).await,
        Command::Stats => handle_stats(ctx, config, output).await,
        Command::Add(args) => handle_add(ctx, config, args).await,
        Command::Import(args) => handle_import(ctx, config, args, output).await,
        Command::Edit(args) => handle_edit(ctx, config, args).await,
        Command::Rm(args) => handle_rm(ctx, config, args).await,
        Command::Refresh(args) => handle_refresh(ctx, config, args, output).await,
        Command::Batch(args) => handle_batch(ctx, config, args, output).await,
    }
}

#[derive(Parser)]
#[command(name = "poolctl", about = "Administrative CLI for the token pool")]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "POOLCTL_API_URL",
        value_parser = parse_url,
        default_value = DEFAULT_API_URL
    )]
    api_url: Url,
    #[arg(long, global = true, env = "POOLCTL_ADMIN_KEY", hide_env_values = true)]
    admin_key: Option<String>,
    #[arg(
        long,
        global = true,
        env = "POOLCTL_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    timeout: u64,
    #[arg(
        long,
        global = true,
        env = "POOLCTL_BATCH_IDLE_TIMEOUT_SECS",
        default_value_t = DEFAULT_BATCH_IDLE_TIMEOUT_SECS,
        help = "Abandon a silent batch progress stream after this many seconds (0 waits forever)"
    )]
    batch_idle_timeout: u64,
    #[arg(
        long = "default-quota",
        global = true,
        value_name = "POOL=QUOTA",
        help = "Override the quota given to new tokens of a pool"
    )]
    default_quota: Vec<String>,
    #[arg(long, global = true, env = "POOLCTL_LOG_LEVEL", default_value = poolctl_telemetry::DEFAULT_LOG_LEVEL)]
    log_level: String,
    #[arg(
        long,
        global = true,
        env = "POOLCTL_LOG_FORMAT",
        value_parser = parse_log_format,
        help = "Log line format: json or pretty (default: pretty on a terminal)"
    )]
    log_format: Option<LogFormat>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    output: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// List tokens, one page at a time.
    Ls(LsArgs),
    /// Show pool statistics.
    Stats,
    /// Add one or more tokens.
    Add(AddArgs),
    /// Import tokens from a file or stdin.
    Import(ImportArgs),
    /// Edit a token.
    Edit(EditArgs),
    /// Delete tokens.
    Rm(RmArgs),
    /// Refresh one token synchronously.
    Refresh(RefreshArgs),
    /// Run a batch operation over selected tokens.
    Batch(BatchArgs),
}

#[derive(Args)]
pub(crate) struct LsArgs {
    #[arg(long, value_parser = parse_filter, default_value = "all")]
    pub(crate) filter: TokenFilter,
    #[arg(long, default_value_t = 1)]
    pub(crate) page: usize,
    #[arg(long, default_value_t = poolctl_core::DEFAULT_PAGE_SIZE)]
    pub(crate) page_size: usize,
    #[arg(long = "select", value_name = "TOKEN", help = "Mark tokens as selected in the listing")]
    pub(crate) select: Vec<String>,
}

#[derive(Args)]
pub(crate) struct AddArgs {
    #[arg(required = true)]
    pub(crate) tokens: Vec<String>,
    #[arg(long)]
    pub(crate) pool: String,
    #[arg(long)]
    pub(crate) quota: Option<i64>,
    #[arg(long, default_value = "")]
    pub(crate) note: String,
    #[arg(long = "tag")]
    pub(crate) tags: Vec<String>,
}

#[derive(Args)]
pub(crate) struct ImportArgs {
    #[arg(long)]
    pub(crate) pool: String,
    #[arg(long, help = "File with one token per line; '-' or absent reads stdin")]
    pub(crate) file: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quota: Option<i64>,
}

#[derive(Args)]
pub(crate) struct EditArgs {
    pub(crate) token: String,
    #[arg(long)]
    pub(crate) pool: Option<String>,
    #[arg(long)]
    pub(crate) quota: Option<i64>,
    #[arg(long)]
    pub(crate) note: Option<String>,
    #[arg(long)]
    pub(crate) status: Option<String>,
    #[arg(long = "tag")]
    pub(crate) tags: Vec<String>,
    #[arg(long, conflicts_with = "tags")]
    pub(crate) clear_tags: bool,
}

#[derive(Args)]
pub(crate) struct RmArgs {
    #[arg(required = true)]
    pub(crate) tokens: Vec<String>,
    #[arg(long)]
    pub(crate) yes: bool,
}

#[derive(Args)]
pub(crate) struct RefreshArgs {
    pub(crate) token: String,
}

#[derive(Args)]
pub(crate) struct BatchArgs {
    #[arg(value_parser = parse_action)]
    pub(crate) action: BatchAction,
    #[arg(long = "token", help = "Select a token (repeatable)")]
    pub(crate) tokens: Vec<String>,
    #[arg(long, value_parser = parse_filter, help = "Select every token matching the filter")]
    pub(crate) filter: Option<TokenFilter>,
    #[arg(long, help = "Select every token")]
    pub(crate) all: bool,
    #[arg(long)]
    pub(crate) yes: bool,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn parse_filter(input: &str) -> Result<TokenFilter, String> {
    input.parse().map_err(|err: poolctl_core::PoolError| err.toast_message())
}

fn parse_action(input: &str) -> Result<BatchAction, String> {
    input.parse().map_err(|err: poolctl_core::PoolError| err.toast_message())
}

fn parse_log_format(input: &str) -> Result<LogFormat, String> {
    input.parse().map_err(|err: TelemetryError| err.to_string())
}

pub(crate) fn session_config(idle_secs: u64, overrides: &[String]) -> CliResult<SessionConfig> {
    let mut default_quotas = DefaultQuotas::default();
    for raw in overrides {
        let (pool, quota) = DefaultQuotas::parse_override(raw)?;
        default_quotas.set(pool, quota);
    }
    Ok(SessionConfig {
        batch_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        default_quotas,
        ..SessionConfig::default()
    })
}

/// Resolve the admin key from flags/env, or prompt on a terminal.
pub(crate) fn ensure_admin_key(provided: Option<String>) -> CliResult<String> {
    if let Some(key) = provided {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(CliError::validation("admin key cannot be empty"));
        }
        return Ok(trimmed.to_string());
    }

    if io::stdin().is_terminal() {
        let key = rpassword::prompt_password("Admin key: ")
            .map_err(|err| CliError::failure(anyhow!("failed to read admin key: {err}")))?;
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(CliError::validation("admin key cannot be empty"));
        }
        Ok(trimmed.to_string())
    } else {
        Err(CliError::validation(
            "admin key required; pass --admin-key or set POOLCTL_ADMIN_KEY",
        ))
    }
}

/// Ask before a destructive command unless `--yes` was given.
pub(crate) fn confirm(prompt: &str, assume_yes: bool) -> CliResult<()> {
    if assume_yes {
        return Ok(());
    }
    if !io::stdin().is_terminal() {
        return Err(CliError::validation(
            "refusing to run a destructive command without --yes",
        ));
    }
    eprint!("{prompt} [y/N] ");
    io::stderr()
        .flush()
        .map_err(|err| CliError::failure(anyhow!("failed to write prompt: {err}")))?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|err| CliError::failure(anyhow!("failed to read confirmation: {err}")))?;
    if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
        Ok(())
    } else {
        Err(CliError::validation("aborted"))
    }
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Ls(_) => "ls",
        Command::Stats => "stats",
        Command::Add(_) => "add",
        Command::Import(_) => "import",
        Command::Edit(_) => "edit",
        Command::Rm(_) => "rm",
        Command::Refresh(_) => "refresh",
        Command::Batch(args) => match args.action {
            BatchAction::Refresh => "batch_refresh",
            BatchAction::NsfwEnable => "batch_nsfw_enable",
            BatchAction::Delete => "batch_delete",
            BatchAction::Disable => "batch_disable",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn batch_command_parses_selection_flags() {
        let cli = Cli::try_parse_from([
            "poolctl",
            "--admin-key",
            "k",
            "batch",
            "nsfw-enable",
            "--filter",
            "no-nsfw",
            "--token",
            "a",
        ])
        .expect("parses");
        assert_eq!(command_label(&cli.command), "batch_nsfw_enable");
        let Command::Batch(args) = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(args.filter, Some(TokenFilter::NoNsfw));
        assert_eq!(args.tokens, ["a"]);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        assert!(Cli::try_parse_from(["poolctl", "ls", "--filter", "bogus"]).is_err());
    }

    #[test]
    fn log_format_flag_uses_telemetry_names() {
        let cli = Cli::try_parse_from(["poolctl", "--log-format", "text", "stats"]).expect("parses");
        assert_eq!(cli.log_format, Some(LogFormat::Pretty));
        assert!(Cli::try_parse_from(["poolctl", "--log-format", "xml", "stats"]).is_err());
    }

    #[test]
    fn session_config_applies_overrides() -> CliResult<()> {
        let config = session_config(0, &["ssoHeavy=300".to_string()])?;
        assert!(config.batch_idle_timeout.is_none());
        assert_eq!(config.default_quotas.quota_for("ssoHeavy"), 300);
        assert_eq!(config.default_quotas.quota_for("ssoBasic"), 80);
        assert!(session_config(5, &["broken".to_string()]).is_err());
        Ok(())
    }

    #[test]
    fn explicit_admin_key_is_trimmed() -> CliResult<()> {
        assert_eq!(ensure_admin_key(Some(" secret ".into()))?, "secret");
        assert!(matches!(
            ensure_admin_key(Some("   ".into())),
            Err(CliError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn confirmation_is_skipped_with_yes() {
        assert!(confirm("delete?", true).is_ok());
    }
}
