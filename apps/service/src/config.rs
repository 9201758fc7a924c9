use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::scheduler::SchedulerSettings;
use crate::store::{RetentionPolicy, StoreSettings};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config {}: {source}", .path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("Failed to write config {}: {source}", .path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("Failed to parse config {}: {source}", .path.display())]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("No config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub retention: RetentionConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub shutdown_grace_seconds: u64,
    /// Unset disables auto-pause
    pub auto_pause_after_failures: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub buffer_capacity: usize,
    pub max_append_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Unset keeps check history forever
    pub check_retention_days: Option<u32>,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `compact` or `json`
    pub format: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path(), max_connections: 8 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrency: 64, shutdown_grace_seconds: 30, auto_pause_after_failures: None }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { buffer_capacity: 1024, max_append_attempts: 3, retry_backoff_ms: 200 }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { check_retention_days: None, cleanup_interval_seconds: 3600 }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { user_agent: format!("monitor-bee/{}", env!("CARGO_PKG_VERSION")) }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/monitor-bee/config.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("monitor-bee/config.toml"))
}

/// $XDG_DATA_HOME/monitor-bee/monitor-bee.db, falling back to the working
/// directory
fn default_database_path() -> path::PathBuf {
    let base = if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        Some(path::PathBuf::from(data_home))
    } else {
        env::home_dir().map(|home| home.join(".local/share"))
    };

    match base {
        Some(base) => base.join("monitor-bee/monitor-bee.db"),
        None => path::PathBuf::from("monitor-bee.db"),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented =
            |level: usize| move |f: &mut fmt::Formatter<'_>, label: &str| writeln!(f, "{:indent$}{}", "", label, indent = level * 2);

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let unset = |value: Option<u32>| value.map_or_else(|| "off".to_string(), |v| v.to_string());

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Max Connections", &self.database.max_connections)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Max Concurrency", &self.scheduler.max_concurrency)?;
        write_1(f, "Shutdown Grace (s)", &self.scheduler.shutdown_grace_seconds)?;
        write_1(f, "Auto-pause After Failures", &unset(self.scheduler.auto_pause_after_failures))?;

        write_title_1(f, "Store")?;
        write_1(f, "Buffer Capacity", &self.store.buffer_capacity)?;
        write_1(f, "Max Append Attempts", &self.store.max_append_attempts)?;
        write_1(f, "Retry Backoff (ms)", &self.store.retry_backoff_ms)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Check Retention (days)", &unset(self.retention.check_retention_days))?;
        write_1(f, "Cleanup Interval (s)", &self.retention.cleanup_interval_seconds)?;

        write_title_1(f, "HTTP")?;
        write_1(f, "User Agent", &self.http.user_agent)?;

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/monitor-bee/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// let cfg = monitor_bee::config::Config::from_config(None::<&std::path::Path>).unwrap();
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str()).map_err(|source| Error::ParseFailed { path: config_path, source })
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_concurrency: self.scheduler.max_concurrency,
            shutdown_grace: Duration::from_secs(self.scheduler.shutdown_grace_seconds),
            auto_pause_after_failures: self.scheduler.auto_pause_after_failures,
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            buffer_capacity: self.store.buffer_capacity,
            max_append_attempts: self.store.max_append_attempts,
            retry_backoff: Duration::from_millis(self.store.retry_backoff_ms),
        }
    }

    /// `None` when retention is disabled
    pub fn retention_policy(&self) -> Option<RetentionPolicy> {
        self.retention.check_retention_days.map(|days| RetentionPolicy {
            check_retention_days: days,
            cleanup_interval: Duration::from_secs(self.retention.cleanup_interval_seconds.max(1)),
        })
    }
}
