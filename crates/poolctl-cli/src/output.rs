//! Output renderers and formatting helpers for CLI commands.

use std::io::{self, Write};

use anyhow::anyhow;
use poolctl_core::{
    BatchJob, BatchOutcome, HeaderCheck, ImportReport, PageView, PoolStats, RowView, Toast,
    ToastLevel, TokenRecord,
};
use poolctl_models::RefreshResponse;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

#[derive(Serialize)]
struct PageDocument<'a> {
    rows: Vec<RowView>,
    page: &'a PageView,
    header: HeaderCheck,
    stats: &'a PoolStats,
}

pub(crate) fn render_page(
    records: &[TokenRecord],
    page: &PageView,
    header: HeaderCheck,
    stats: &PoolStats,
    format: OutputFormat,
) -> CliResult<()> {
    let rows: Vec<RowView> = page.rows(records).map(RowView::from_record).collect();
    match format {
        OutputFormat::Json => print_json(&PageDocument {
            rows,
            page,
            header,
            stats,
        }),
        OutputFormat::Table => {
            println!(
                "{} {:<27} {:<10} {:<9} {:>6} {:>6} {:>4} {:<19} {:<10} NOTE",
                header_marker(header),
                "TOKEN",
                "POOL",
                "STATUS",
                "QUOTA",
                "CALLS",
                "FAIL",
                "LAST USED",
                "TAGS"
            );
            for row in &rows {
                println!(
                    "{} {:<27} {:<10} {:<9} {:>6} {:>6} {:>4} {:<19} {:<10} {}",
                    if row.selected { "[x]" } else { "[ ]" },
                    row.masked,
                    row.pool,
                    row.status,
                    row.quota,
                    row.use_count,
                    row.fail_count,
                    row.last_used,
                    if row.tags.is_empty() { "-" } else { row.tags.as_str() },
                    row.note
                );
            }
            if rows.is_empty() {
                println!("(no tokens match filter '{}')", page.filter);
            }
            println!(
                "page {}/{} | {} matching | {} per page",
                page.page, page.total_pages, page.total_count, page.page_size
            );
            print_stats_line(stats);
            Ok(())
        }
    }
}

const fn header_marker(header: HeaderCheck) -> &'static str {
    match header {
        HeaderCheck::Checked => "[x]",
        HeaderCheck::Indeterminate => "[-]",
        HeaderCheck::Unchecked => "[ ]",
    }
}

fn print_stats_line(stats: &PoolStats) {
    println!(
        "total {} | active {} | cooling {} | invalid {} | nsfw {} | chat quota {} | image quota {} | calls {}",
        stats.total,
        stats.active,
        stats.cooling,
        stats.invalid,
        stats.nsfw,
        stats.chat_quota,
        stats.image_quota,
        stats.total_calls
    );
}

pub(crate) fn render_stats(stats: &PoolStats, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Table => {
            println!("total: {}", stats.total);
            println!("active: {}", stats.active);
            println!("cooling: {}", stats.cooling);
            println!("invalid: {}", stats.invalid);
            println!("nsfw: {} / non-nsfw: {}", stats.nsfw, stats.non_nsfw);
            println!("chat quota: {}", stats.chat_quota);
            println!("image quota: {}", stats.image_quota);
            println!("total calls: {}", stats.total_calls);
            if !stats.per_pool.is_empty() {
                println!("{:<16} {:>6}", "POOL", "TOKENS");
                for (pool, count) in &stats.per_pool {
                    println!("{pool:<16} {count:>6}");
                }
            }
            Ok(())
        }
    }
}

pub(crate) fn render_import(report: &ImportReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            println!("added: {}", report.added);
            println!("duplicates skipped: {}", report.duplicates);
            Ok(())
        }
    }
}

pub(crate) fn render_refresh(response: &RefreshResponse, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(response),
        OutputFormat::Table => {
            for (token, valid) in &response.results {
                println!(
                    "{} {}",
                    poolctl_core::mask_token(token),
                    if *valid { "valid" } else { "invalid" }
                );
            }
            Ok(())
        }
    }
}

pub(crate) fn render_outcome(outcome: &BatchOutcome, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(outcome),
        OutputFormat::Table => {
            match outcome {
                BatchOutcome::Done { summary, warning } => {
                    match summary {
                        Some(summary) => println!("done: ok {} fail {}", summary.ok, summary.fail),
                        None => println!("done"),
                    }
                    if let Some(warning) = warning {
                        println!("warning: {warning}");
                    }
                }
                BatchOutcome::Cancelled => println!("cancelled"),
                BatchOutcome::Error { message } => println!("failed: {message}"),
            }
            Ok(())
        }
    }
}

/// Progress line rewritten in place on stderr.
pub(crate) fn progress_line(job: &BatchJob) -> String {
    format!(
        "{} {}/{} ({}%)",
        job.action,
        job.processed,
        job.total,
        job.percent()
    )
}

pub(crate) fn print_progress(job: &BatchJob) {
    let mut stderr = io::stderr();
    let _ = write!(stderr, "\r{}", progress_line(job));
    let _ = stderr.flush();
}

pub(crate) fn print_toasts(toasts: &[Toast]) {
    for toast in toasts {
        let label = match toast.level {
            ToastLevel::Success => "ok",
            ToastLevel::Info => "info",
            ToastLevel::Warning => "warning",
            ToastLevel::Error => "error",
        };
        eprintln!("{label}: {}", toast.message);
    }
}
