//! Telemetry forwarding port

use crate::domain::{ErrorRecord, User};

/// Sink for error reports sent to external telemetry.
///
/// Only errors not classified as auto-resolved reach this port; the
/// orchestrator filters before forwarding.
pub trait ErrorTelemetry: Send + Sync {
    fn capture_error(&self, record: &ErrorRecord, user: Option<&User>);
}

/// Telemetry sink that only writes to the process log.
#[derive(Debug, Default)]
pub struct LogOnlyTelemetry;

impl ErrorTelemetry for LogOnlyTelemetry {
    fn capture_error(&self, record: &ErrorRecord, user: Option<&User>) {
        tracing::warn!(
            function = %record.function_name,
            exit_code = %record.exit_code,
            exit_cause = %record.exit_cause,
            sync_db_id = record.sync_db_id,
            user = user.map(|u| u.email.as_str()).unwrap_or("-"),
            "Telemetry error report"
        );
    }
}
