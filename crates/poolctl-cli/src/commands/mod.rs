//! Command handlers grouped by concern.

pub(crate) mod batch;
pub(crate) mod tokens;

use poolctl_core::{PoolResult, Session, SessionConfig, Toast, ToastLevel};

use crate::client::{AppContext, CliResult};
use crate::output::print_toasts;

/// Open a session and load the current collection.
pub(crate) async fn open_session(
    ctx: AppContext,
    config: SessionConfig,
) -> CliResult<Session<AppContext>> {
    let mut session = Session::new(ctx, config);
    let loaded = session.load().await;
    settle(&mut session, loaded)?;
    Ok(session)
}

/// Print pending toasts and convert the session result.
///
/// Error toasts are dropped when the command fails; the final error line
/// already carries the same text.
pub(crate) fn settle<T>(session: &mut Session<AppContext>, result: PoolResult<T>) -> CliResult<T> {
    flush_toasts(session, result.is_err());
    result.map_err(Into::into)
}

pub(crate) fn flush_toasts(session: &mut Session<AppContext>, failed: bool) {
    let toasts: Vec<Toast> = session
        .drain_toasts()
        .into_iter()
        .filter(|toast| !failed || toast.level != ToastLevel::Error)
        .collect();
    print_toasts(&toasts);
}
