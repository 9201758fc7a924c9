#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use monitor_bee::database::models::{Monitor, MonitorDraft, UserId};
use monitor_bee::database::{Database, DatabaseImpl, initialize_pool};
use monitor_bee::monitoring::{Checker, RawAttempt};
use monitor_bee::pool::{LibsqlPool, open_local};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Migrated database in a temporary directory; keep the `TempDir` alive for
/// as long as the pool is used
pub async fn create_test_database() -> Result<(TempDir, LibsqlPool)> {
    let _ = tracing_subscriber::fmt::try_init();

    let temp_dir = tempfile::tempdir()?;
    let pool = open_local(temp_dir.path().join("test.db"), 4).await?;
    initialize_pool(&pool).await?;

    Ok((temp_dir, pool))
}

pub async fn create_test_repository() -> Result<(TempDir, Arc<DatabaseImpl>)> {
    let (temp_dir, pool) = create_test_database().await?;
    Ok((temp_dir, Arc::new(DatabaseImpl::new_from_pool(pool))))
}

/// Insert a monitor owned by `user_id`
pub async fn insert_monitor(database: &dyn Database, user_id: UserId, expected: Option<u16>) -> Result<Monitor> {
    let mut draft = MonitorDraft::new("api", "https://example.com/health");
    draft.interval_seconds = 30;
    draft.timeout_seconds = 5;
    draft.expected_status_code = expected;

    let monitor = Monitor::from_draft(user_id, draft);
    database.insert_monitor(&monitor).await?;
    Ok(monitor)
}

/// Minimal HTTP/1.1 server answering every request with `status` after
/// `delay`
pub async fn spawn_http_stub(status: u16, delay: Duration) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                tokio::time::sleep(delay).await;
                let response =
                    format!("HTTP/1.1 {status} Stub\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Ok(addr)
}

/// An address nothing listens on
pub async fn closed_port() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Answers every probe with the same attempt, immediately
pub struct FixedChecker(pub RawAttempt);

#[async_trait::async_trait]
impl Checker for FixedChecker {
    async fn check(&self, _monitor: &Monitor) -> RawAttempt {
        self.0.clone()
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
