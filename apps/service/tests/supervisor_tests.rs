mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::{FixedChecker, create_test_database, eventually};
use monitor_bee::config::Config;
use monitor_bee::database::models::{MonitorDraft, MonitorStatus, Page};
use monitor_bee::database::{Database, DatabaseImpl};
use monitor_bee::monitoring::{CheckStatus, MonitoringExecutor, RawAttempt, SchedulerError};
use monitor_bee::supervisor::{Supervisor, SupervisorError};
use monitor_bee::validation::ValidationError;
use tempfile::TempDir;

const OWNER: i64 = 11;
const STRANGER: i64 = 12;

async fn supervisor_with(attempt: RawAttempt, config: Config) -> Result<(TempDir, Supervisor)> {
    let (dir, pool) = create_test_database().await?;
    let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));
    let executor = Arc::new(MonitoringExecutor::with_checker(Arc::new(FixedChecker(attempt))));
    Ok((dir, Supervisor::with_parts(config, database, executor)))
}

fn responded(status_code: u16) -> RawAttempt {
    RawAttempt::Responded { status_code, elapsed_ms: 42 }
}

fn draft(expected: Option<u16>) -> MonitorDraft {
    let mut draft = MonitorDraft::new("homepage", "https://example.com");
    draft.interval_seconds = 60;
    draft.timeout_seconds = 10;
    draft.expected_status_code = expected;
    draft
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() -> Result<()> {
    let (_dir, supervisor) = supervisor_with(responded(200), Config::default()).await?;

    let mut too_fast = draft(None);
    too_fast.interval_seconds = 10;
    let err = supervisor.create_monitor(OWNER, too_fast).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Validation(ValidationError::IntervalTooShort(10))));

    let mut slow_timeout = draft(None);
    slow_timeout.timeout_seconds = 60;
    let err = supervisor.create_monitor(OWNER, slow_timeout).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Validation(ValidationError::TimeoutNotBelowInterval { .. })));

    assert!(supervisor.list_monitors(OWNER).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_monitors_are_scoped_to_their_owner() -> Result<()> {
    let (_dir, supervisor) = supervisor_with(responded(200), Config::default()).await?;
    let monitor = supervisor.create_monitor(OWNER, draft(Some(200))).await?;

    assert_eq!(supervisor.get_monitor(OWNER, monitor.id).await?, monitor);
    assert_eq!(supervisor.list_monitors(OWNER).await?.len(), 1);
    assert!(supervisor.list_monitors(STRANGER).await?.is_empty());

    let err = supervisor.get_monitor(STRANGER, monitor.id).await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound(id) if id == monitor.id));
    assert!(supervisor.delete_monitor(STRANGER, monitor.id).await.is_err());
    assert!(supervisor.list_checks(STRANGER, monitor.id, Page::default()).await.is_err());

    let mut edit = draft(Some(204));
    edit.name = "renamed".into();
    let updated = supervisor.update_monitor(OWNER, monitor.id, edit).await?;
    assert_eq!(updated.name, "renamed");
    assert_eq!(supervisor.get_monitor(OWNER, monitor.id).await?.expected_status_code, Some(204));
    Ok(())
}

#[tokio::test]
async fn test_started_supervisor_records_checks() -> Result<()> {
    let (_dir, supervisor) = supervisor_with(responded(503), Config::default()).await?;
    let existing = supervisor.create_monitor(OWNER, draft(Some(200))).await?;

    supervisor.start().await?;
    let added = supervisor.create_monitor(OWNER, draft(None)).await?;

    let s = &supervisor;
    for id in [existing.id, added.id] {
        let recorded = eventually(|| async move { matches!(s.latest_check(OWNER, id).await, Ok(Some(_))) }).await;
        assert!(recorded, "no check recorded for {id}");
    }

    let failed = supervisor.latest_check(OWNER, existing.id).await?.unwrap();
    assert_eq!(failed.result.status, CheckStatus::Failed);
    assert_eq!(failed.result.status_code, Some(503));
    assert_eq!(failed.result.error_message.as_deref(), Some("expected 200, got 503"));

    let report = supervisor.monitor_report(OWNER, added.id, Utc::now() - Duration::hours(1), Utc::now()).await?;
    assert!(report.uptime.has_data());
    assert_eq!(report.uptime.success_ratio(), Some(1.0));
    assert_eq!(report.latency.average_response_time_ms, Some(42.0));
    assert_eq!(report.latest.map(|r| r.result.status), Some(CheckStatus::Success));

    assert!(matches!(supervisor.start().await, Err(SupervisorError::Scheduler(SchedulerError::AlreadyRunning))));

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_auto_pause_is_persisted() -> Result<()> {
    let mut config = Config::default();
    config.scheduler.auto_pause_after_failures = Some(1);
    let (_dir, supervisor) = supervisor_with(responded(500), config).await?;

    let monitor = supervisor.create_monitor(OWNER, draft(Some(200))).await?;
    supervisor.start().await?;

    let (s, id) = (&supervisor, monitor.id);
    let paused = eventually(|| async move {
        matches!(s.get_monitor(OWNER, id).await, Ok(m) if m.status == MonitorStatus::Paused)
    })
    .await;
    assert!(paused, "monitor was not paused");

    let recorded = eventually(|| async move {
        matches!(s.list_failed_checks(OWNER, id, Page::default()).await, Ok(failed) if failed.len() == 1)
    })
    .await;
    assert!(recorded, "failed check was not recorded");

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_status_and_delete_flow() -> Result<()> {
    let (_dir, supervisor) = supervisor_with(responded(200), Config::default()).await?;
    let monitor = supervisor.create_monitor(OWNER, draft(None)).await?;

    let paused = supervisor.update_monitor_status(OWNER, monitor.id, MonitorStatus::Paused).await?;
    assert_eq!(paused.status, MonitorStatus::Paused);

    supervisor.start().await?;
    // Paused monitors are not loaded, so nothing is ever probed
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(supervisor.latest_check(OWNER, monitor.id).await?.is_none());

    supervisor.update_monitor_status(OWNER, monitor.id, MonitorStatus::Active).await?;
    let (s, id) = (&supervisor, monitor.id);
    assert!(eventually(|| async move { matches!(s.latest_check(OWNER, id).await, Ok(Some(_))) }).await);

    supervisor.delete_monitor(OWNER, monitor.id).await?;
    assert!(matches!(supervisor.get_monitor(OWNER, monitor.id).await, Err(SupervisorError::NotFound(_))));
    assert!(supervisor.store().list_checks(monitor.id, Page::default()).await?.is_empty());

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_start_after_shutdown_is_rejected() -> Result<()> {
    let (_dir, supervisor) = supervisor_with(responded(200), Config::default()).await?;

    supervisor.start().await?;
    supervisor.shutdown().await;

    assert!(matches!(supervisor.start().await, Err(SupervisorError::ShutDown)));
    assert!(!supervisor.scheduler().is_running().await);

    // Configuration changes still persist, nothing gets probed
    let monitor = supervisor.create_monitor(OWNER, draft(None)).await?;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(supervisor.latest_check(OWNER, monitor.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_reversed_range_is_rejected() -> Result<()> {
    let (_dir, supervisor) = supervisor_with(responded(200), Config::default()).await?;
    let monitor = supervisor.create_monitor(OWNER, draft(None)).await?;

    let now = Utc::now();
    let err = supervisor.uptime(OWNER, monitor.id, now, now - Duration::minutes(5)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidRange { .. }));

    let uptime = supervisor.uptime(OWNER, monitor.id, now - Duration::minutes(5), now).await?;
    assert!(!uptime.has_data());
    let latency = supervisor.average_latency(OWNER, monitor.id, now - Duration::minutes(5), now).await?;
    assert_eq!(latency.average_response_time_ms, None);
    Ok(())
}
