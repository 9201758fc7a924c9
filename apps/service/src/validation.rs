//! Validation of user-supplied monitor configuration.
//!
//! Everything here runs before a monitor is stored or handed to the
//! scheduler; nothing downstream re-checks these invariants.

use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::database::models::{HeaderMap, MonitorDraft};

pub const MIN_INTERVAL_SECONDS: u64 = 30;
pub const MAX_INTERVAL_SECONDS: u64 = 86_400;
pub const MIN_TIMEOUT_SECONDS: u64 = 5;
const MAX_NAME_LEN: usize = 100;
const MAX_HEADERS: usize = 50;
const MAX_HEADER_SIZE: usize = 8192;
const MAX_BODY_SIZE: usize = 1024 * 1024;
const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Name too long (max {max} characters)", max = MAX_NAME_LEN)]
    NameTooLong,

    #[error("URL cannot be empty")]
    EmptyUrl,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid scheme '{0}'. Must be http or https")]
    UnsupportedScheme(String),

    #[error("Method cannot be empty")]
    EmptyMethod,

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("Check interval too short: {0} seconds (minimum: {min})", min = MIN_INTERVAL_SECONDS)]
    IntervalTooShort(u64),

    #[error("Check interval too long: {0} seconds (maximum: {max})", max = MAX_INTERVAL_SECONDS)]
    IntervalTooLong(u64),

    #[error("Timeout too short: {0} seconds (minimum: {min})", min = MIN_TIMEOUT_SECONDS)]
    TimeoutTooShort(u64),

    #[error("Timeout ({timeout}s) must be less than interval ({interval}s)")]
    TimeoutNotBelowInterval { timeout: u64, interval: u64 },

    #[error("Invalid expected status code: {0}")]
    InvalidStatusCode(u16),

    #[error("Too many headers: {0} (max: {max})", max = MAX_HEADERS)]
    TooManyHeaders(usize),

    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    #[error("Invalid value for header {0:?}")]
    InvalidHeaderValue(String),

    #[error("Header too large: {0} bytes (max: {max} bytes)", max = MAX_HEADER_SIZE)]
    HeaderTooLarge(usize),

    #[error("Body too large: {0} bytes (max: {max} bytes)", max = MAX_BODY_SIZE)]
    BodyTooLarge(usize),
}

/// Validate a complete monitor draft
pub fn validate_monitor(draft: &MonitorDraft) -> Result<(), ValidationError> {
    validate_monitor_name(&draft.name)?;
    validate_url(&draft.url)?;
    validate_method(&draft.method)?;
    validate_interval(draft.interval_seconds)?;
    validate_timeout(draft.timeout_seconds, draft.interval_seconds)?;
    if let Some(code) = draft.expected_status_code {
        validate_expected_status(code)?;
    }
    validate_headers(&draft.headers)?;
    if let Some(body) = &draft.body {
        validate_body(body)?;
    }
    Ok(())
}

/// Validate monitor name
pub fn validate_monitor_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong);
    }

    Ok(())
}

/// Validate HTTP/HTTPS URL endpoint
pub fn validate_url(target: &str) -> Result<(), ValidationError> {
    if target.trim().is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let url = Url::parse(target).map_err(|e| {
        if target.contains("://") {
            ValidationError::InvalidUrl(e.to_string())
        } else {
            ValidationError::InvalidUrl("URL must include scheme (http:// or https://)".to_string())
        }
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidUrl("URL must have a valid host".to_string()));
    }

    Ok(())
}

/// Validate HTTP method
pub fn validate_method(method: &str) -> Result<(), ValidationError> {
    let method = method.trim();
    if method.is_empty() {
        return Err(ValidationError::EmptyMethod);
    }

    let upper = method.to_ascii_uppercase();
    if ALLOWED_METHODS.contains(&upper.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedMethod(method.to_string()))
    }
}

/// Validate check interval
pub fn validate_interval(interval_seconds: u64) -> Result<(), ValidationError> {
    if interval_seconds < MIN_INTERVAL_SECONDS {
        return Err(ValidationError::IntervalTooShort(interval_seconds));
    }

    if interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(ValidationError::IntervalTooLong(interval_seconds));
    }

    Ok(())
}

/// Validate timeout against the interval it must fit inside
pub fn validate_timeout(timeout_seconds: u64, interval_seconds: u64) -> Result<(), ValidationError> {
    if timeout_seconds < MIN_TIMEOUT_SECONDS {
        return Err(ValidationError::TimeoutTooShort(timeout_seconds));
    }

    if timeout_seconds >= interval_seconds {
        return Err(ValidationError::TimeoutNotBelowInterval {
            timeout: timeout_seconds,
            interval: interval_seconds,
        });
    }

    Ok(())
}

pub fn validate_expected_status(code: u16) -> Result<(), ValidationError> {
    if (100..=599).contains(&code) {
        Ok(())
    } else {
        Err(ValidationError::InvalidStatusCode(code))
    }
}

/// Validate header names and values so the checker never sees one it
/// cannot send
pub fn validate_headers(headers: &HeaderMap) -> Result<(), ValidationError> {
    let count: usize = headers.values().map(Vec::len).sum();
    if count > MAX_HEADERS {
        return Err(ValidationError::TooManyHeaders(count));
    }

    for (name, values) in headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ValidationError::InvalidHeaderName(name.clone()))?;

        for value in values {
            HeaderValue::from_str(value).map_err(|_| ValidationError::InvalidHeaderValue(name.clone()))?;

            let size = name.len() + value.len();
            if size > MAX_HEADER_SIZE {
                return Err(ValidationError::HeaderTooLarge(size));
            }
        }
    }

    Ok(())
}

/// Validate body size
pub fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(ValidationError::BodyTooLarge(body.len()));
    }
    Ok(())
}
