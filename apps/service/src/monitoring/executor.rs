use std::sync::Arc;

use chrono::Utc;

use super::checker::{Checker, HttpChecker};
use super::classifier::classify;
use super::types::CheckResult;
use crate::database::models::Monitor;

/// Monitoring executor - runs one probe and classifies it
pub struct MonitoringExecutor {
    checker: Arc<dyn Checker>,
}

impl MonitoringExecutor {
    /// Executor backed by the HTTP checker
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self { checker: Arc::new(HttpChecker::new(user_agent)?) })
    }

    pub fn with_checker(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }

    /// Execute a monitoring check
    pub async fn execute_check(&self, monitor: &Monitor) -> CheckResult {
        let executed_at = Utc::now();
        let attempt = self.checker.check(monitor).await;

        let result = classify(monitor, executed_at, attempt);
        tracing::debug!(
            monitor = %monitor.id,
            status = %result.status,
            status_code = ?result.status_code,
            response_time_ms = result.response_time_ms,
            "Probe finished"
        );
        result
    }
}
