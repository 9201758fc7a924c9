use std::error::Error as StdError;
use std::time::{Duration, Instant};

use reqwest::Method;
use tokio::time::timeout;

use super::types::{RawAttempt, TransportErrorKind};
use crate::database::models::Monitor;

/// Performs exactly one request for a monitor.
///
/// Implementations never fail: every problem is reported as
/// `RawAttempt::TransportError`.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, monitor: &Monitor) -> RawAttempt;
}

/// HTTP/HTTPS checker
///
/// Certificate validation always stays on.
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;

        Ok(Self { client })
    }

    /// Checker over a preconfigured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(&self, monitor: &Monitor, deadline: Duration) -> Result<reqwest::Request, String> {
        let method = Method::from_bytes(monitor.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("Unsupported HTTP method: {}", monitor.method))?;

        let mut request = self.client.request(method, &monitor.url).timeout(deadline);

        for (name, values) in &monitor.headers {
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        if let Some(body) = &monitor.body {
            request = request.body(body.clone());
        }

        request.build().map_err(|e| format!("Failed to create request: {}", root_cause(&e)))
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor) -> RawAttempt {
        let deadline = Duration::from_secs(monitor.timeout_seconds);

        let request = match self.build_request(monitor, deadline) {
            Ok(request) => request,
            Err(message) => {
                return RawAttempt::TransportError {
                    kind: TransportErrorKind::InvalidRequest,
                    message,
                    elapsed_ms: 0,
                };
            }
        };

        let start = Instant::now();
        let outcome = timeout(deadline, self.client.execute(request)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            // Body is dropped unread
            Ok(Ok(response)) => RawAttempt::Responded { status_code: response.status().as_u16(), elapsed_ms },
            Ok(Err(e)) => {
                let (kind, message) = classify_transport_error(&e, monitor.timeout_seconds);
                RawAttempt::TransportError { kind, message, elapsed_ms }
            }
            Err(_) => RawAttempt::TransportError {
                kind: TransportErrorKind::Timeout,
                message: timeout_message(monitor.timeout_seconds),
                elapsed_ms,
            },
        }
    }
}

fn timeout_message(timeout_seconds: u64) -> String {
    format!("request timed out after {timeout_seconds}s")
}

/// Map a reqwest failure onto a transport error kind and a short message
pub fn classify_transport_error(error: &reqwest::Error, timeout_seconds: u64) -> (TransportErrorKind, String) {
    if error.is_timeout() {
        return (TransportErrorKind::Timeout, timeout_message(timeout_seconds));
    }

    if error.is_builder() {
        return (TransportErrorKind::InvalidRequest, format!("invalid request: {}", root_cause(error)));
    }

    // Walk the source chain; the io error underneath carries the useful bit
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return (TransportErrorKind::Connect, "connection refused".to_string());
                }
                std::io::ErrorKind::ConnectionReset => {
                    return (TransportErrorKind::Connect, "connection reset".to_string());
                }
                std::io::ErrorKind::TimedOut => {
                    return (TransportErrorKind::Timeout, timeout_message(timeout_seconds));
                }
                _ => {}
            }
        }
        source = cause.source();
    }

    let cause = root_cause(error);
    let lowered = format!("{error:#} {cause}").to_ascii_lowercase();

    let kind = if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
        TransportErrorKind::Dns
    } else if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
        TransportErrorKind::Tls
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };

    let message = match kind {
        TransportErrorKind::Dns => format!("dns lookup failed: {cause}"),
        TransportErrorKind::Tls => format!("tls handshake failed: {cause}"),
        TransportErrorKind::Connect => format!("connection failed: {cause}"),
        _ => format!("request failed: {cause}"),
    };

    (kind, message)
}

fn root_cause(error: &(dyn StdError + 'static)) -> String {
    let mut current = error;
    while let Some(next) = current.source() {
        current = next;
    }
    current.to_string()
}
