use std::env::var;
use std::str::FromStr;

use tracing::warn;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{Layer, filter::EnvFilter, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Initialize with INFO and the format taken from `RUST_LOG_FORMAT`.
pub fn init_with_defaults() -> Result<(), TryInitError> {
    init(LevelFilter::INFO, None)
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` directives take precedence over `level`. When `format` is `None`
/// the `RUST_LOG_FORMAT` environment variable decides, falling back to compact.
pub fn init(level: LevelFilter, format: Option<LogFormat>) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let (format, rejected) = match format {
        Some(format) => (format, None),
        None => format_from_env(var("RUST_LOG_FORMAT").ok()),
    };

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).try_init()?;

    // Only now is there a subscriber to receive it
    if let Some(error) = rejected {
        warn!("Ignoring RUST_LOG_FORMAT: {error}");
    }
    Ok(())
}

/// Format named by `RUST_LOG_FORMAT`, plus the parse error when the value
/// was rejected in favour of compact
fn format_from_env(raw: Option<String>) -> (LogFormat, Option<String>) {
    match raw.map(|raw| raw.parse::<LogFormat>()) {
        None => (LogFormat::Compact, None),
        Some(Ok(format)) => (format, None),
        Some(Err(error)) => (LogFormat::Compact, Some(error)),
    }
}
