//! Command-level span helpers.

use tracing::Span;

use crate::init::build_sha;

/// Build the top-level span for one CLI invocation.
///
/// Attach it with `tracing::Instrument::instrument` so every event emitted
/// while the command runs carries the command name, trace id and build SHA.
#[must_use]
pub fn command_span(command: &str, trace_id: &str) -> Span {
    tracing::info_span!(
        "command",
        command = %command,
        trace_id = %trace_id,
        build_sha = %build_sha()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_span_can_be_entered_without_subscriber() {
        let span = command_span("ls", "trace-1");
        let _entered = span.enter();
        tracing::info!("inside command span");
    }
}
