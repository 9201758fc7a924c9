use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "success",
            CheckStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CheckStatus::Success),
            "failed" => Ok(CheckStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown check status: {other}")),
        }
    }
}

/// Why a request never produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    InvalidRequest,
    Other,
}

/// Unclassified result of one request attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAttempt {
    /// A response arrived; its body was dropped unread
    Responded { status_code: u16, elapsed_ms: u64 },
    /// No response was received
    TransportError { kind: TransportErrorKind, message: String, elapsed_ms: u64 },
}

impl RawAttempt {
    pub fn elapsed_ms(&self) -> u64 {
        match self {
            RawAttempt::Responded { elapsed_ms, .. } | RawAttempt::TransportError { elapsed_ms, .. } => {
                *elapsed_ms
            }
        }
    }
}

/// Result of a monitoring check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Monitor that was probed
    pub monitor_id: Uuid,

    /// Instant the probe attempt began
    pub executed_at: DateTime<Utc>,

    pub status: CheckStatus,

    /// Wall-clock time until the response or the failure was observed
    pub response_time_ms: u64,

    /// HTTP status code, absent when nothing was received
    pub status_code: Option<u16>,

    /// Only set on failed checks
    pub error_message: Option<String>,
}

impl CheckResult {
    /// Create a successful check result
    pub fn success(
        monitor_id: Uuid,
        executed_at: DateTime<Utc>,
        response_time_ms: u64,
        status_code: u16,
    ) -> Self {
        Self {
            monitor_id,
            executed_at,
            status: CheckStatus::Success,
            response_time_ms,
            status_code: Some(status_code),
            error_message: None,
        }
    }

    /// Create a failed check result
    pub fn failure(
        monitor_id: Uuid,
        executed_at: DateTime<Utc>,
        response_time_ms: u64,
        status_code: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            monitor_id,
            executed_at,
            status: CheckStatus::Failed,
            response_time_ms,
            status_code,
            error_message: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckStatus::Success
    }
}

/// A persisted check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: i64,
    #[serde(flatten)]
    pub result: CheckResult,
}

/// Success ratio over a time window.
///
/// An empty window has no ratio at all; callers must not read it as perfect
/// (or zero) uptime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UptimeStats {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_checks: u64,
    pub failed_checks: u64,
}

impl UptimeStats {
    pub fn has_data(&self) -> bool {
        self.total_checks > 0
    }

    pub fn successful_checks(&self) -> u64 {
        self.total_checks.saturating_sub(self.failed_checks)
    }

    /// `1 - failed/total`, or `None` when the window holds no checks
    pub fn success_ratio(&self) -> Option<f64> {
        if !self.has_data() {
            return None;
        }
        Some(1.0 - self.failed_checks as f64 / self.total_checks as f64)
    }

    /// Ratio as a percentage, `None` when there is no data
    pub fn uptime_percentage(&self) -> Option<f64> {
        self.success_ratio().map(|ratio| ratio * 100.0)
    }
}

/// Mean response time of successful checks over a time window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub successful_checks: u64,
    /// `None` when the window has no successful checks
    pub average_response_time_ms: Option<f64>,
}

impl LatencyStats {
    pub fn has_data(&self) -> bool {
        self.average_response_time_ms.is_some()
    }
}
