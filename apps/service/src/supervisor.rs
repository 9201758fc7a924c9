/// Supervisor module - owns the engine's lifecycle
///
/// The supervisor is the entry point for collaborators:
/// - Validates and persists monitor configuration, then mirrors it into the
///   scheduler
/// - Serves reporting queries scoped to the owning user
/// - Persists status changes the scheduler derives on its own
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::models::{Monitor, MonitorDraft, MonitorStatus, Page, UserId, now_millis};
use crate::database::{Database, DatabaseImpl, initialize_pool};
use crate::monitoring::scheduler::{MonitoringScheduler, SchedulerError, SchedulerEvent};
use crate::monitoring::types::{CheckRecord, LatencyStats, UptimeStats};
use crate::monitoring::MonitoringExecutor;
use crate::pool::LibsqlPool;
use crate::store::{ResultStore, RetentionCleanup};
use crate::validation::{ValidationError, validate_monitor};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Monitor {0} not found")]
    NotFound(Uuid),

    #[error("Check {check_id} not found for monitor {monitor_id}")]
    CheckNotFound { monitor_id: Uuid, check_id: i64 },

    #[error("Invalid time range: {from} is after {to}")]
    InvalidRange { from: DateTime<Utc>, to: DateTime<Utc> },

    #[error("Supervisor has been shut down")]
    ShutDown,

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;

/// Everything a dashboard needs about one monitor over a window.
///
/// `latest` tells whether the target is currently up, independent of the
/// monitor's configured lifecycle status.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub monitor: Monitor,
    pub uptime: UptimeStats,
    pub latency: LatencyStats,
    pub latest: Option<CheckRecord>,
}

/// Main supervisor for the monitoring engine
pub struct Supervisor {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    store: Arc<ResultStore>,
    scheduler: Arc<MonitoringScheduler>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Create a supervisor over a pooled database, running migrations first
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        info!("Initializing database schema...");
        initialize_pool(&pool).await?;

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));
        let executor = Arc::new(MonitoringExecutor::new(&config.http.user_agent)?);

        Ok(Self::with_parts(config, database, executor))
    }

    /// Assemble a supervisor from prepared parts
    pub fn with_parts(config: Config, database: Arc<dyn Database>, executor: Arc<MonitoringExecutor>) -> Self {
        let store = Arc::new(ResultStore::new(Arc::clone(&database), config.store_settings()));
        let scheduler = Arc::new(MonitoringScheduler::new(executor, store.clone(), config.scheduler_settings()));

        Self { config: Arc::new(config), database, store, scheduler, task_handles: Mutex::new(Vec::new()) }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<MonitoringScheduler> {
        &self.scheduler
    }

    /// Load active monitors and begin scheduling them.
    ///
    /// A supervisor cannot be started again after `shutdown`; its result
    /// store is closed for good.
    pub async fn start(&self) -> Result<()> {
        if self.store.is_closed() {
            return Err(SupervisorError::ShutDown);
        }

        let monitors = self.database.get_active_monitors().await?;
        info!("Loaded {} active monitors", monitors.len());

        let events = self.scheduler.subscribe();
        self.scheduler.start(monitors).await?;

        let mut handles = self.task_handles.lock().await;
        handles.push(spawn_status_listener(Arc::clone(&self.database), events));

        if let Some(policy) = self.config.retention_policy() {
            info!(days = policy.check_retention_days, "Check retention enabled");
            handles.push(RetentionCleanup::new(Arc::clone(&self.store), policy).start_periodic_cleanup());
        }

        Ok(())
    }

    /// Stop scheduling, flush buffered results and stop background tasks
    pub async fn shutdown(&self) {
        info!("Shutting down supervisor...");

        match self.scheduler.stop().await {
            Ok(()) | Err(SchedulerError::NotRunning) => {}
            Err(e) => warn!("Scheduler stop failed: {}", e),
        }

        self.store.close().await;

        for handle in self.task_handles.lock().await.drain(..) {
            handle.abort();
        }
        info!("Supervisor stopped");
    }

    pub async fn create_monitor(&self, user_id: UserId, draft: MonitorDraft) -> Result<Monitor> {
        validate_monitor(&draft)?;

        let monitor = Monitor::from_draft(user_id, draft);
        self.database.insert_monitor(&monitor).await?;
        info!(target: "monitor_bee::audit", monitor = %monitor.id, user_id, "Monitor created");

        self.schedule(&monitor).await?;
        Ok(monitor)
    }

    /// Replace a monitor's configuration; the status only changes when the
    /// draft carries one
    pub async fn update_monitor(&self, user_id: UserId, id: Uuid, draft: MonitorDraft) -> Result<Monitor> {
        validate_monitor(&draft)?;

        let mut monitor = self.get_monitor(user_id, id).await?;
        monitor.apply(draft);
        if !self.database.update_monitor(&monitor).await? {
            return Err(SupervisorError::NotFound(id));
        }
        info!(target: "monitor_bee::audit", monitor = %id, user_id, "Monitor updated");

        self.schedule(&monitor).await?;
        Ok(monitor)
    }

    pub async fn update_monitor_status(&self, user_id: UserId, id: Uuid, status: MonitorStatus) -> Result<Monitor> {
        let mut monitor = self.get_monitor(user_id, id).await?;
        if !self.database.set_monitor_status(user_id, id, status).await? {
            return Err(SupervisorError::NotFound(id));
        }
        monitor.status = status;
        monitor.updated_at = now_millis();
        info!(target: "monitor_bee::audit", monitor = %id, user_id, %status, "Monitor status changed");

        self.schedule(&monitor).await?;
        Ok(monitor)
    }

    /// Delete a monitor and its history. A probe already running for it
    /// finishes, but its result is discarded.
    pub async fn delete_monitor(&self, user_id: UserId, id: Uuid) -> Result<()> {
        // Ownership first so one user cannot unschedule another's monitor
        self.get_monitor(user_id, id).await?;
        self.unschedule(id).await?;

        if !self.database.delete_monitor(user_id, id).await? {
            return Err(SupervisorError::NotFound(id));
        }
        info!(target: "monitor_bee::audit", monitor = %id, user_id, "Monitor deleted");
        Ok(())
    }

    pub async fn get_monitor(&self, user_id: UserId, id: Uuid) -> Result<Monitor> {
        self.database.get_monitor(user_id, id).await?.ok_or(SupervisorError::NotFound(id))
    }

    pub async fn list_monitors(&self, user_id: UserId) -> Result<Vec<Monitor>> {
        Ok(self.database.list_monitors(user_id).await?)
    }

    pub async fn latest_check(&self, user_id: UserId, id: Uuid) -> Result<Option<CheckRecord>> {
        self.get_monitor(user_id, id).await?;
        Ok(self.store.latest_check(id).await?)
    }

    pub async fn get_check(&self, user_id: UserId, id: Uuid, check_id: i64) -> Result<CheckRecord> {
        self.get_monitor(user_id, id).await?;
        self.store
            .get_check(id, check_id)
            .await?
            .ok_or(SupervisorError::CheckNotFound { monitor_id: id, check_id })
    }

    pub async fn list_checks(&self, user_id: UserId, id: Uuid, page: Page) -> Result<Vec<CheckRecord>> {
        self.get_monitor(user_id, id).await?;
        Ok(self.store.list_checks(id, page).await?)
    }

    pub async fn list_checks_in_range(
        &self,
        user_id: UserId,
        id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<CheckRecord>> {
        check_range(from, to)?;
        self.get_monitor(user_id, id).await?;
        Ok(self.store.list_checks_in_range(id, from, to, page).await?)
    }

    pub async fn list_failed_checks(&self, user_id: UserId, id: Uuid, page: Page) -> Result<Vec<CheckRecord>> {
        self.get_monitor(user_id, id).await?;
        Ok(self.store.list_failed_checks(id, page).await?)
    }

    pub async fn uptime(&self, user_id: UserId, id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<UptimeStats> {
        check_range(from, to)?;
        self.get_monitor(user_id, id).await?;
        Ok(self.store.compute_uptime(id, from, to).await?)
    }

    pub async fn average_latency(
        &self,
        user_id: UserId,
        id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LatencyStats> {
        check_range(from, to)?;
        self.get_monitor(user_id, id).await?;
        Ok(self.store.compute_average_latency(id, from, to).await?)
    }

    pub async fn monitor_report(
        &self,
        user_id: UserId,
        id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MonitorReport> {
        check_range(from, to)?;
        let monitor = self.get_monitor(user_id, id).await?;

        Ok(MonitorReport {
            uptime: self.store.compute_uptime(id, from, to).await?,
            latency: self.store.compute_average_latency(id, from, to).await?,
            latest: self.store.latest_check(id).await?,
            monitor,
        })
    }

    /// Mirror a stored monitor into the scheduler. Before `start` there is
    /// nothing to mirror into; `start` loads from the database.
    async fn schedule(&self, monitor: &Monitor) -> Result<()> {
        match self.scheduler.add_or_update(monitor.clone()).await {
            Ok(()) | Err(SchedulerError::NotRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn unschedule(&self, id: Uuid) -> Result<()> {
        match self.scheduler.remove(id).await {
            Ok(()) | Err(SchedulerError::NotRunning) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<()> {
    if from > to {
        return Err(SupervisorError::InvalidRange { from, to });
    }
    Ok(())
}

/// Persist scheduler-derived status changes
fn spawn_status_listener(
    database: Arc<dyn Database>,
    mut events: broadcast::Receiver<SchedulerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::AutoPaused { monitor_id, user_id, consecutive_failures }) => {
                    match database.set_monitor_status(user_id, monitor_id, MonitorStatus::Paused).await {
                        Ok(true) => info!(
                            target: "monitor_bee::audit",
                            monitor = %monitor_id,
                            user_id,
                            consecutive_failures,
                            "Monitor auto-paused"
                        ),
                        Ok(false) => debug!(monitor = %monitor_id, "Auto-paused monitor no longer exists"),
                        Err(e) => error!(monitor = %monitor_id, "Failed to persist auto-pause: {:#}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed scheduler events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
