/// Monitoring engine module - decides when to probe, probes, and judges
///
/// This module is responsible for:
/// - Performing a single HTTP/HTTPS probe per dispatch
/// - Classifying raw attempts into check results
/// - Scheduling probes under a global concurrency budget
pub mod checker;
pub mod classifier;
pub mod executor;
pub mod scheduler;
pub mod types;

pub use checker::{Checker, HttpChecker};
pub use executor::MonitoringExecutor;
pub use scheduler::{MonitoringScheduler, ResultSink, SchedulerError, SchedulerEvent, SchedulerSettings};
pub use types::{CheckRecord, CheckResult, CheckStatus, LatencyStats, RawAttempt, TransportErrorKind, UptimeStats};
