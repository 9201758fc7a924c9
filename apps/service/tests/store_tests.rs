mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{create_test_repository, insert_monitor};
use monitor_bee::database::Database;
use monitor_bee::database::models::Page;
use monitor_bee::monitoring::{CheckResult, CheckStatus, ResultSink};
use monitor_bee::store::{ResultStore, RetentionCleanup, RetentionPolicy, StoreSettings};
use uuid::Uuid;

fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(minutes)
}

fn success(monitor_id: Uuid, at: DateTime<Utc>, ms: u64) -> CheckResult {
    CheckResult::success(monitor_id, at, ms, 200)
}

fn failure(monitor_id: Uuid, at: DateTime<Utc>, ms: u64) -> CheckResult {
    CheckResult::failure(monitor_id, at, ms, None, "connection refused")
}

#[tokio::test]
async fn test_uptime_ratio_over_window() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let monitor = insert_monitor(database.as_ref(), 1, Some(200)).await?;
    let store = ResultStore::new(database.clone(), StoreSettings::default());

    for i in 0..10 {
        let at = minutes_ago(30 - i);
        let result = if i < 3 { failure(monitor.id, at, 5000) } else { success(monitor.id, at, 100) };
        assert!(store.append(&result).await?.is_some());
    }

    let uptime = store.compute_uptime(monitor.id, minutes_ago(60), Utc::now()).await?;
    assert!(uptime.has_data());
    assert_eq!(uptime.total_checks, 10);
    assert_eq!(uptime.failed_checks, 3);
    assert!((uptime.success_ratio().unwrap() - 0.7).abs() < 1e-9);

    // Window before any check ran
    let empty = store.compute_uptime(monitor.id, minutes_ago(240), minutes_ago(120)).await?;
    assert!(!empty.has_data());
    assert_eq!(empty.success_ratio(), None);
    Ok(())
}

#[tokio::test]
async fn test_average_latency_counts_successes_only() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let monitor = insert_monitor(database.as_ref(), 1, None).await?;
    let store = ResultStore::new(database.clone(), StoreSettings::default());

    let from = minutes_ago(10);
    let to = Utc::now();

    let latency = store.compute_average_latency(monitor.id, from, to).await?;
    assert!(!latency.has_data());
    assert_eq!(latency.average_response_time_ms, None);

    store.append(&failure(monitor.id, minutes_ago(3), 9000)).await?;
    let latency = store.compute_average_latency(monitor.id, from, to).await?;
    assert_eq!(latency.average_response_time_ms, None, "failures never become a latency");

    store.append(&success(monitor.id, minutes_ago(2), 100)).await?;
    store.append(&success(monitor.id, minutes_ago(1), 200)).await?;
    let latency = store.compute_average_latency(monitor.id, from, Utc::now()).await?;
    assert_eq!(latency.successful_checks, 2);
    assert_eq!(latency.average_response_time_ms, Some(150.0));
    Ok(())
}

#[tokio::test]
async fn test_append_for_unknown_monitor_is_silent() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let store = ResultStore::new(database.clone(), StoreSettings::default());
    let ghost = Uuid::new_v4();

    assert_eq!(store.append(&success(ghost, Utc::now(), 10)).await?, None);
    assert!(store.list_checks(ghost, Page::default()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_history_queries() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let monitor = insert_monitor(database.as_ref(), 1, Some(200)).await?;
    let other = insert_monitor(database.as_ref(), 1, Some(200)).await?;
    let store = ResultStore::new(database.clone(), StoreSettings::default());

    let mut newest = Utc::now();
    for i in 0..6 {
        let at = minutes_ago(60 - i * 10);
        newest = at;
        let result = if i % 2 == 0 { success(monitor.id, at, 50) } else { failure(monitor.id, at, 5000) };
        store.append(&result).await?;
    }
    store.append(&success(other.id, Utc::now(), 1)).await?;

    let latest = store.latest_check(monitor.id).await?.unwrap();
    assert_eq!(latest.result.executed_at.timestamp_millis(), newest.timestamp_millis());
    assert_eq!(latest.result.status, CheckStatus::Failed);

    let all = store.list_checks(monitor.id, Page::default()).await?;
    assert_eq!(all.len(), 6);
    assert!(all.windows(2).all(|w| w[0].result.executed_at >= w[1].result.executed_at));
    assert!(all.iter().all(|record| record.result.monitor_id == monitor.id));

    let second_page = store.list_checks(monitor.id, Page::new(4, 4)).await?;
    assert_eq!(second_page.len(), 2);
    assert_eq!(second_page[0].id, all[4].id);

    let failed = store.list_failed_checks(monitor.id, Page::default()).await?;
    assert_eq!(failed.len(), 3);
    assert!(failed.iter().all(|record| record.result.status == CheckStatus::Failed));

    let ranged = store
        .list_checks_in_range(monitor.id, all[3].result.executed_at, all[1].result.executed_at, Page::default())
        .await?;
    assert_eq!(ranged.iter().map(|r| r.id).collect::<Vec<_>>(), vec![all[1].id, all[2].id, all[3].id]);

    let fetched = store.get_check(monitor.id, all[2].id).await?.unwrap();
    assert_eq!(fetched, all[2]);
    assert!(store.get_check(other.id, all[2].id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_submitted_results_are_flushed_on_close() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let monitor = insert_monitor(database.as_ref(), 1, None).await?;
    let store = ResultStore::new(database.clone(), StoreSettings::default());

    for ms in 0..25 {
        store.submit(success(monitor.id, Utc::now(), ms));
    }
    store.submit(success(Uuid::new_v4(), Utc::now(), 1));
    store.close().await;

    let stored = store.list_checks(monitor.id, Page::new(100, 0)).await?;
    assert_eq!(stored.len(), 25);
    // Same-millisecond rows tie-break on id, newest first
    let mut ids: Vec<i64> = stored.iter().map(|r| r.id).collect();
    ids.reverse();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[tokio::test]
async fn test_delete_before_and_for_monitor() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let monitor = insert_monitor(database.as_ref(), 1, None).await?;
    let other = insert_monitor(database.as_ref(), 1, None).await?;
    let store = ResultStore::new(database.clone(), StoreSettings::default());

    store.append(&success(monitor.id, minutes_ago(3 * 24 * 60), 10)).await?;
    store.append(&success(monitor.id, minutes_ago(5), 10)).await?;
    store.append(&success(other.id, minutes_ago(5), 10)).await?;

    assert_eq!(store.delete_before(minutes_ago(24 * 60)).await?, 1);
    assert_eq!(store.list_checks(monitor.id, Page::default()).await?.len(), 1);

    assert_eq!(store.delete_for_monitor(monitor.id).await?, 1);
    assert!(store.list_checks(monitor.id, Page::default()).await?.is_empty());
    assert_eq!(store.list_checks(other.id, Page::default()).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_deleting_monitor_removes_history() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let monitor = insert_monitor(database.as_ref(), 7, None).await?;
    let store = ResultStore::new(database.clone(), StoreSettings::default());
    store.append(&success(monitor.id, Utc::now(), 10)).await?;

    // Wrong owner deletes nothing
    assert!(!database.delete_monitor(8, monitor.id).await?);
    assert!(database.delete_monitor(7, monitor.id).await?);

    assert!(database.get_monitor(7, monitor.id).await?.is_none());
    assert!(store.list_checks(monitor.id, Page::default()).await?.is_empty());
    assert_eq!(store.append(&success(monitor.id, Utc::now(), 10)).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_retention_cleanup_removes_expired_checks() -> Result<()> {
    let (_dir, database) = create_test_repository().await?;
    let monitor = insert_monitor(database.as_ref(), 1, None).await?;
    let store = Arc::new(ResultStore::new(database.clone(), StoreSettings::default()));

    store.append(&success(monitor.id, minutes_ago(10 * 24 * 60), 10)).await?;
    store.append(&success(monitor.id, minutes_ago(1), 10)).await?;

    let policy = RetentionPolicy { check_retention_days: 7, cleanup_interval: Duration::from_secs(3600) };
    let cleanup = RetentionCleanup::new(store.clone(), policy);
    assert_eq!(cleanup.cleanup_expired_results().await?, 1);

    let remaining = store.list_checks(monitor.id, Page::default()).await?;
    assert_eq!(remaining.len(), 1);
    Ok(())
}
