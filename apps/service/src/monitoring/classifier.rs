use chrono::{DateTime, Utc};

use super::types::{CheckResult, RawAttempt};
use crate::database::models::Monitor;

/// Judge a raw attempt against the monitor's expectations.
///
/// Without an expected status code any response counts as success; with one,
/// only an exact match does. A mismatch still records the code received.
pub fn classify(monitor: &Monitor, executed_at: DateTime<Utc>, attempt: RawAttempt) -> CheckResult {
    match attempt {
        RawAttempt::TransportError { message, elapsed_ms, .. } => {
            CheckResult::failure(monitor.id, executed_at, elapsed_ms, None, message)
        }
        RawAttempt::Responded { status_code, elapsed_ms } => match monitor.expected_status_code {
            Some(expected) if expected != status_code => CheckResult::failure(
                monitor.id,
                executed_at,
                elapsed_ms,
                Some(status_code),
                format!("expected {expected}, got {status_code}"),
            ),
            _ => CheckResult::success(monitor.id, executed_at, elapsed_ms, status_code),
        },
    }
}
