use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request headers: name to ordered values, applied in the order given
pub type HeaderMap = BTreeMap<String, Vec<String>>;

/// Owner of monitors. Passed explicitly through every call that touches
/// user data.
pub type UserId = i64;

/// Lifecycle state of a monitor. Only `Active` monitors are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    #[default]
    Active,
    Paused,
    Disabled,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Active => "active",
            MonitorStatus::Paused => "paused",
            MonitorStatus::Disabled => "disabled",
        }
    }

    pub fn is_schedulable(&self) -> bool {
        matches!(self, MonitorStatus::Active)
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MonitorStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(MonitorStatus::Active),
            "paused" => Ok(MonitorStatus::Paused),
            "disabled" => Ok(MonitorStatus::Disabled),
            other => Err(anyhow::anyhow!("Unknown monitor status: {other}")),
        }
    }
}

/// Monitor model - a user-owned probe configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub user_id: UserId,
    pub name: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    /// `None` means only reachability is checked
    pub expected_status_code: Option<u16>,
    pub status: MonitorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Build a new monitor owned by `user_id` from a draft.
    ///
    /// The draft must already have passed validation.
    pub fn from_draft(user_id: UserId, draft: MonitorDraft) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: draft.name,
            url: draft.url,
            method: normalize_method(&draft.method),
            headers: draft.headers,
            body: draft.body,
            interval_seconds: draft.interval_seconds,
            timeout_seconds: draft.timeout_seconds,
            expected_status_code: draft.expected_status_code,
            status: draft.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the user-editable fields with those of `draft`.
    ///
    /// The status is only touched when the draft carries one.
    pub fn apply(&mut self, draft: MonitorDraft) {
        self.name = draft.name;
        self.url = draft.url;
        self.method = normalize_method(&draft.method);
        self.headers = draft.headers;
        self.body = draft.body;
        self.interval_seconds = draft.interval_seconds;
        self.timeout_seconds = draft.timeout_seconds;
        self.expected_status_code = draft.expected_status_code;
        if let Some(status) = draft.status {
            self.status = status;
        }
        self.updated_at = now_millis();
    }
}

/// Stored form of a method: what validation accepted, trimmed and uppercased
fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

/// User-supplied monitor configuration for create and update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorDraft {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub expected_status_code: Option<u16>,
    #[serde(default)]
    pub status: Option<MonitorStatus>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    10
}

impl MonitorDraft {
    /// A GET draft with the default cadence
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: default_method(),
            headers: HeaderMap::new(),
            body: None,
            interval_seconds: default_interval(),
            timeout_seconds: default_timeout(),
            expected_status_code: None,
            status: None,
        }
    }
}

/// Offset pagination for result history.
///
/// Deserialized pages may carry any limit; `limit()` always clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    limit: u32,
    offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit: limit.clamp(1, Self::MAX_LIMIT), offset }
    }

    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: Self::DEFAULT_LIMIT, offset: 0 }
    }
}

/// Current time at the precision timestamps are stored with
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Convert a UTC timestamp to Unix milliseconds
pub fn timestamp_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert Unix milliseconds back to a UTC timestamp
pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_draft_defaults() {
        let mut draft = MonitorDraft::new("api", "https://example.com/health");
        draft.method = "post".to_string();
        let monitor = Monitor::from_draft(42, draft);

        assert_eq!(monitor.user_id, 42);
        assert_eq!(monitor.method, "POST");
        assert_eq!(monitor.status, MonitorStatus::Active);
        assert_eq!(monitor.created_at, monitor.updated_at);
    }

    #[test]
    fn test_apply_keeps_status_without_override() {
        let mut draft = MonitorDraft::new("api", "https://example.com");
        draft.status = Some(MonitorStatus::Paused);
        let mut monitor = Monitor::from_draft(1, draft);

        let mut edit = MonitorDraft::new("renamed", "https://example.org");
        edit.interval_seconds = 120;
        monitor.apply(edit);

        assert_eq!(monitor.name, "renamed");
        assert_eq!(monitor.interval_seconds, 120);
        assert_eq!(monitor.status, MonitorStatus::Paused);
    }

    #[test]
    fn test_page_clamps_limit() {
        assert_eq!(Page::new(0, 0).limit(), 1);
        assert_eq!(Page::new(10_000, 5).limit(), Page::MAX_LIMIT);
        assert_eq!(Page::new(10_000, 5).offset(), 5);
        assert_eq!(Page::default().limit(), 50);
    }

    #[test]
    fn test_deserialized_page_is_clamped() {
        let empty: Page = serde_json::from_str(r#"{"limit": 0, "offset": 3}"#).unwrap();
        assert_eq!(empty.limit(), 1);
        assert_eq!(empty.offset(), 3);

        let huge: Page = serde_json::from_str(r#"{"limit": 100000, "offset": 0}"#).unwrap();
        assert_eq!(huge.limit(), Page::MAX_LIMIT);
    }

    #[test]
    fn test_padded_method_is_stored_trimmed() {
        let mut draft = MonitorDraft::new("api", "https://example.com");
        draft.method = " get ".to_string();
        crate::validation::validate_monitor(&draft).unwrap();

        let mut monitor = Monitor::from_draft(1, draft);
        assert_eq!(monitor.method, "GET");

        let mut edit = MonitorDraft::new("api", "https://example.com");
        edit.method = "\tpost\n".to_string();
        monitor.apply(edit);
        assert_eq!(monitor.method, "POST");
        assert!(reqwest::Method::from_bytes(monitor.method.as_bytes()).is_ok());
    }

    #[test]
    fn test_millis_round_trip() {
        let now = millis_to_timestamp(timestamp_to_millis(Utc::now()));
        assert_eq!(millis_to_timestamp(timestamp_to_millis(now)), now);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Paused".parse::<MonitorStatus>().unwrap(), MonitorStatus::Paused);
        assert!("up".parse::<MonitorStatus>().is_err());
        assert!(MonitorStatus::Active.is_schedulable());
        assert!(!MonitorStatus::Disabled.is_schedulable());
    }
}
