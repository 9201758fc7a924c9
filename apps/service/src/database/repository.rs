use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::models::{Monitor, MonitorStatus, Page, UserId, millis_to_timestamp, timestamp_to_millis};
use crate::monitoring::types::{CheckRecord, CheckResult, LatencyStats, UptimeStats};
use crate::pool::LibsqlPool;

const MONITOR_COLUMNS: &str = "id, user_id, name, url, method, headers, body, interval_seconds, timeout_seconds, \
     expected_status_code, status, created_at, updated_at";

const CHECK_COLUMNS: &str = "id, monitor_id, executed_at, status, response_time_ms, status_code, error_message";

/// Database trait for abstracting database operations
///
/// Monitor reads and writes are scoped to an owner; check history is keyed
/// by monitor only, ownership is settled by the caller beforehand.
#[async_trait]
pub trait Database: Send + Sync {
    /// All monitors with status `active`, across users
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>>;

    async fn get_monitor(&self, user_id: UserId, id: Uuid) -> Result<Option<Monitor>>;

    async fn list_monitors(&self, user_id: UserId) -> Result<Vec<Monitor>>;

    async fn insert_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Returns false when no monitor matched id and owner
    async fn update_monitor(&self, monitor: &Monitor) -> Result<bool>;

    async fn set_monitor_status(&self, user_id: UserId, id: Uuid, status: MonitorStatus) -> Result<bool>;

    /// Delete a monitor together with its check history
    async fn delete_monitor(&self, user_id: UserId, id: Uuid) -> Result<bool>;

    /// Append a check result.
    ///
    /// Returns `None` without error when the monitor no longer exists.
    async fn append_check(&self, result: &CheckResult) -> Result<Option<i64>>;

    async fn latest_check(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>>;

    async fn get_check(&self, monitor_id: Uuid, check_id: i64) -> Result<Option<CheckRecord>>;

    /// Newest first
    async fn list_checks(&self, monitor_id: Uuid, page: Page) -> Result<Vec<CheckRecord>>;

    /// Newest first, `from..=to`
    async fn list_checks_in_range(
        &self,
        monitor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<CheckRecord>>;

    async fn list_failed_checks(&self, monitor_id: Uuid, page: Page) -> Result<Vec<CheckRecord>>;

    async fn uptime(&self, monitor_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<UptimeStats>;

    async fn average_latency(&self, monitor_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<LatencyStats>;

    /// Delete checks of every monitor executed before `before`
    async fn delete_checks_before(&self, before: DateTime<Utc>) -> Result<u64>;

    async fn delete_checks_for_monitor(&self, monitor_id: Uuid) -> Result<u64>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_monitors(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn query_checks(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<CheckRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(check_from_row(&row)?);
        }
        Ok(records)
    }
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    let id: String = row.get(0)?;
    let headers: String = row.get(5)?;
    let status: String = row.get(10)?;

    Ok(Monitor {
        id: Uuid::parse_str(&id)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        method: row.get(4)?,
        headers: serde_json::from_str(&headers).with_context(|| format!("Corrupt headers for monitor {id}"))?,
        body: row.get(6)?,
        interval_seconds: row.get::<i64>(7)? as u64,
        timeout_seconds: row.get::<i64>(8)? as u64,
        expected_status_code: row.get::<Option<i64>>(9)?.map(|code| code as u16),
        status: status.parse()?,
        created_at: millis_to_timestamp(row.get(11)?),
        updated_at: millis_to_timestamp(row.get(12)?),
    })
}

fn check_from_row(row: &Row) -> Result<CheckRecord> {
    let monitor_id: String = row.get(1)?;
    let status: String = row.get(3)?;

    Ok(CheckRecord {
        id: row.get(0)?,
        result: CheckResult {
            monitor_id: Uuid::parse_str(&monitor_id)?,
            executed_at: millis_to_timestamp(row.get(2)?),
            status: status.parse()?,
            response_time_ms: row.get::<i64>(4)? as u64,
            status_code: row.get::<Option<i64>>(5)?.map(|code| code as u16),
            error_message: row.get(6)?,
        },
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>> {
        self.query_monitors(
            &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE status = ? ORDER BY created_at"),
            params![MonitorStatus::Active.as_str()],
        )
        .await
    }

    async fn get_monitor(&self, user_id: UserId, id: Uuid) -> Result<Option<Monitor>> {
        let mut monitors = self
            .query_monitors(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ? AND user_id = ?"),
                params![id.to_string(), user_id],
            )
            .await?;
        Ok(monitors.pop())
    }

    async fn list_monitors(&self, user_id: UserId) -> Result<Vec<Monitor>> {
        self.query_monitors(
            &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE user_id = ? ORDER BY created_at"),
            params![user_id],
        )
        .await
    }

    async fn insert_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO monitors (id, user_id, name, url, method, headers, body, interval_seconds, timeout_seconds, \
             expected_status_code, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                monitor.id.to_string(),
                monitor.user_id,
                monitor.name.clone(),
                monitor.url.clone(),
                monitor.method.clone(),
                serde_json::to_string(&monitor.headers)?,
                monitor.body.clone(),
                monitor.interval_seconds as i64,
                monitor.timeout_seconds as i64,
                monitor.expected_status_code.map(i64::from),
                monitor.status.as_str(),
                timestamp_to_millis(monitor.created_at),
                timestamp_to_millis(monitor.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_monitor(&self, monitor: &Monitor) -> Result<bool> {
        let conn = self.get_conn().await?;

        let updated = conn
            .execute(
                "UPDATE monitors SET name = ?, url = ?, method = ?, headers = ?, body = ?, interval_seconds = ?, \
                 timeout_seconds = ?, expected_status_code = ?, status = ?, updated_at = ? WHERE id = ? AND user_id = ?",
                params![
                    monitor.name.clone(),
                    monitor.url.clone(),
                    monitor.method.clone(),
                    serde_json::to_string(&monitor.headers)?,
                    monitor.body.clone(),
                    monitor.interval_seconds as i64,
                    monitor.timeout_seconds as i64,
                    monitor.expected_status_code.map(i64::from),
                    monitor.status.as_str(),
                    timestamp_to_millis(monitor.updated_at),
                    monitor.id.to_string(),
                    monitor.user_id
                ],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn set_monitor_status(&self, user_id: UserId, id: Uuid, status: MonitorStatus) -> Result<bool> {
        let conn = self.get_conn().await?;

        let updated = conn
            .execute(
                "UPDATE monitors SET status = ?, updated_at = ? WHERE id = ? AND user_id = ?",
                params![status.as_str(), timestamp_to_millis(Utc::now()), id.to_string(), user_id],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn delete_monitor(&self, user_id: UserId, id: Uuid) -> Result<bool> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        let deleted =
            tx.execute("DELETE FROM monitors WHERE id = ? AND user_id = ?", params![id.to_string(), user_id]).await?;
        if deleted > 0 {
            // Covered by ON DELETE CASCADE when foreign keys are on
            tx.execute("DELETE FROM monitor_checks WHERE monitor_id = ?", params![id.to_string()]).await?;
        }

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn append_check(&self, result: &CheckResult) -> Result<Option<i64>> {
        let conn = self.get_conn().await?;
        let monitor_id = result.monitor_id.to_string();

        let inserted = conn
            .execute(
                "INSERT INTO monitor_checks (monitor_id, executed_at, status, response_time_ms, status_code, error_message) \
                 SELECT ?, ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM monitors WHERE id = ?)",
                params![
                    monitor_id.clone(),
                    timestamp_to_millis(result.executed_at),
                    result.status.as_str(),
                    result.response_time_ms as i64,
                    result.status_code.map(i64::from),
                    result.error_message.clone(),
                    monitor_id
                ],
            )
            .await?;

        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    async fn latest_check(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>> {
        let mut records = self
            .query_checks(
                &format!(
                    "SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE monitor_id = ? \
                     ORDER BY executed_at DESC, id DESC LIMIT 1"
                ),
                params![monitor_id.to_string()],
            )
            .await?;
        Ok(records.pop())
    }

    async fn get_check(&self, monitor_id: Uuid, check_id: i64) -> Result<Option<CheckRecord>> {
        let mut records = self
            .query_checks(
                &format!("SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE id = ? AND monitor_id = ?"),
                params![check_id, monitor_id.to_string()],
            )
            .await?;
        Ok(records.pop())
    }

    async fn list_checks(&self, monitor_id: Uuid, page: Page) -> Result<Vec<CheckRecord>> {
        self.query_checks(
            &format!(
                "SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE monitor_id = ? \
                 ORDER BY executed_at DESC, id DESC LIMIT ? OFFSET ?"
            ),
            params![monitor_id.to_string(), i64::from(page.limit()), i64::from(page.offset())],
        )
        .await
    }

    async fn list_checks_in_range(
        &self,
        monitor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<CheckRecord>> {
        self.query_checks(
            &format!(
                "SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE monitor_id = ? AND executed_at BETWEEN ? AND ? \
                 ORDER BY executed_at DESC, id DESC LIMIT ? OFFSET ?"
            ),
            params![
                monitor_id.to_string(),
                timestamp_to_millis(from),
                timestamp_to_millis(to),
                i64::from(page.limit()),
                i64::from(page.offset())
            ],
        )
        .await
    }

    async fn list_failed_checks(&self, monitor_id: Uuid, page: Page) -> Result<Vec<CheckRecord>> {
        self.query_checks(
            &format!(
                "SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE monitor_id = ? AND status = 'failed' \
                 ORDER BY executed_at DESC, id DESC LIMIT ? OFFSET ?"
            ),
            params![monitor_id.to_string(), i64::from(page.limit()), i64::from(page.offset())],
        )
        .await
    }

    async fn uptime(&self, monitor_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<UptimeStats> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) \
                 FROM monitor_checks WHERE monitor_id = ? AND executed_at BETWEEN ? AND ?",
                params![monitor_id.to_string(), timestamp_to_millis(from), timestamp_to_millis(to)],
            )
            .await?;

        let (total, failed) = match rows.next().await? {
            Some(row) => (row.get::<i64>(0)?, row.get::<i64>(1)?),
            None => (0, 0),
        };

        Ok(UptimeStats { from, to, total_checks: total as u64, failed_checks: failed as u64 })
    }

    async fn average_latency(&self, monitor_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<LatencyStats> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), AVG(response_time_ms) FROM monitor_checks \
                 WHERE monitor_id = ? AND status = 'success' AND executed_at BETWEEN ? AND ?",
                params![monitor_id.to_string(), timestamp_to_millis(from), timestamp_to_millis(to)],
            )
            .await?;

        let (count, average) = match rows.next().await? {
            Some(row) => (row.get::<i64>(0)?, row.get::<Option<f64>>(1)?),
            None => (0, None),
        };

        Ok(LatencyStats {
            from,
            to,
            successful_checks: count as u64,
            average_response_time_ms: if count > 0 { average } else { None },
        })
    }

    async fn delete_checks_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM monitor_checks WHERE executed_at < ?", params![timestamp_to_millis(before)])
            .await?;
        Ok(deleted)
    }

    async fn delete_checks_for_monitor(&self, monitor_id: Uuid) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted =
            conn.execute("DELETE FROM monitor_checks WHERE monitor_id = ?", params![monitor_id.to_string()]).await?;
        Ok(deleted)
    }
}
