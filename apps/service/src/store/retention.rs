//! Automatic retention of check history.
//!
//! When a horizon is configured, checks older than it are deleted by a
//! background task on a fixed interval.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ResultStore;

/// How long check history is kept
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep checks
    pub check_retention_days: u32,
    /// Time between cleanup runs
    pub cleanup_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { check_retention_days: 30, cleanup_interval: Duration::from_secs(3600) }
    }
}

impl RetentionPolicy {
    fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.check_retention_days))
    }
}

/// Cleanup manager for expired checks
pub struct RetentionCleanup {
    store: Arc<ResultStore>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(store: Arc<ResultStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    /// Delete every check older than the retention horizon
    pub async fn cleanup_expired_results(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.policy.retention();
        let deleted = self.store.delete_before(cutoff).await?;

        info!(deleted, days = self.policy.check_retention_days, "Retention cleanup completed");
        Ok(deleted)
    }

    /// Start background cleanup task; the first run happens immediately
    pub fn start_periodic_cleanup(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.cleanup_interval);

            loop {
                interval.tick().await;

                match self.cleanup_expired_results().await {
                    Ok(_) => debug!("Periodic retention cleanup finished"),
                    Err(e) => warn!("Periodic retention cleanup failed: {:#}", e),
                }
            }
        })
    }
}
