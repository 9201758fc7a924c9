//! Durable home of check results.
//!
//! The scheduler hands results over through [`ResultSink::submit`], which only
//! enqueues. A single writer task drains the buffer in order, so results of
//! one monitor are stored in the order they were produced.

pub mod retention;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::database::models::Page;
use crate::monitoring::scheduler::ResultSink;
use crate::monitoring::types::{CheckRecord, CheckResult, LatencyStats, UptimeStats};

pub use retention::{RetentionCleanup, RetentionPolicy};

/// Write-path tuning
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Results waiting for the writer before new ones are dropped
    pub buffer_capacity: usize,
    /// Attempts per result, including the first
    pub max_append_attempts: u32,
    /// Base delay, doubled on each further attempt
    pub retry_backoff: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { buffer_capacity: 1024, max_append_attempts: 3, retry_backoff: Duration::from_millis(200) }
    }
}

pub struct ResultStore {
    database: Arc<dyn Database>,
    sender: Mutex<Option<mpsc::Sender<CheckResult>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ResultStore {
    /// Create the store and spawn its writer task
    pub fn new(database: Arc<dyn Database>, settings: StoreSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.buffer_capacity.max(1));
        let writer = tokio::spawn(run_writer(Arc::clone(&database), receiver, settings));

        Self { database, sender: Mutex::new(Some(sender)), writer: tokio::sync::Mutex::new(Some(writer)) }
    }

    /// Stop accepting results and wait until everything buffered is written
    pub async fn close(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        if let Some(writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.await {
                error!("Result writer ended abnormally: {}", e);
            }
        }
    }

    /// True once `close` has been called; submitted results are dropped
    pub fn is_closed(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Write one result immediately, bypassing the buffer.
    ///
    /// `None` means the monitor no longer exists.
    pub async fn append(&self, result: &CheckResult) -> Result<Option<i64>> {
        self.database.append_check(result).await
    }

    pub async fn compute_uptime(&self, monitor_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<UptimeStats> {
        self.database.uptime(monitor_id, from, to).await
    }

    /// Mean response time over successful checks only
    pub async fn compute_average_latency(
        &self,
        monitor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LatencyStats> {
        self.database.average_latency(monitor_id, from, to).await
    }

    pub async fn latest_check(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>> {
        self.database.latest_check(monitor_id).await
    }

    pub async fn get_check(&self, monitor_id: Uuid, check_id: i64) -> Result<Option<CheckRecord>> {
        self.database.get_check(monitor_id, check_id).await
    }

    pub async fn list_checks(&self, monitor_id: Uuid, page: Page) -> Result<Vec<CheckRecord>> {
        self.database.list_checks(monitor_id, page).await
    }

    pub async fn list_checks_in_range(
        &self,
        monitor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<CheckRecord>> {
        self.database.list_checks_in_range(monitor_id, from, to, page).await
    }

    pub async fn list_failed_checks(&self, monitor_id: Uuid, page: Page) -> Result<Vec<CheckRecord>> {
        self.database.list_failed_checks(monitor_id, page).await
    }

    /// Retention: drop every check executed before `before`
    pub async fn delete_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let deleted = self.database.delete_checks_before(before).await?;
        debug!(deleted, cutoff = %before, "Deleted expired checks");
        Ok(deleted)
    }

    pub async fn delete_for_monitor(&self, monitor_id: Uuid) -> Result<u64> {
        self.database.delete_checks_for_monitor(monitor_id).await
    }
}

impl ResultSink for ResultStore {
    fn submit(&self, result: CheckResult) {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(sender) = guard.as_ref() else {
            debug!(monitor = %result.monitor_id, "Result store closed, dropping check result");
            return;
        };

        match sender.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(result)) => {
                warn!(monitor = %result.monitor_id, "Result buffer full, dropping check result");
            }
            Err(TrySendError::Closed(result)) => {
                warn!(monitor = %result.monitor_id, "Result writer gone, dropping check result");
            }
        }
    }
}

async fn run_writer(database: Arc<dyn Database>, mut receiver: mpsc::Receiver<CheckResult>, settings: StoreSettings) {
    while let Some(result) = receiver.recv().await {
        append_with_retry(database.as_ref(), &result, &settings).await;
    }
    debug!("Result writer finished");
}

async fn append_with_retry(database: &dyn Database, result: &CheckResult, settings: &StoreSettings) {
    let max_attempts = settings.max_append_attempts.max(1);
    let mut attempt = 1;

    loop {
        match database.append_check(result).await {
            Ok(Some(id)) => {
                trace!(monitor = %result.monitor_id, id, "Stored check result");
                return;
            }
            Ok(None) => {
                debug!(monitor = %result.monitor_id, "Monitor no longer exists, dropping check result");
                return;
            }
            Err(e) if attempt < max_attempts => {
                let delay = backoff_delay(settings.retry_backoff, attempt);
                warn!(
                    monitor = %result.monitor_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    "Failed to store check result: {:#}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    monitor = %result.monitor_id,
                    attempts = attempt,
                    "Dropping check result after repeated write failures: {:#}",
                    e
                );
                return;
            }
        }
    }
}

/// `base * 2^(attempt-1)` plus up to half of `base` of jitter
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(10));
    let jitter_ceiling = (base.as_millis() as u64 / 2).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
    exponential + Duration::from_millis(jitter)
}
