/// Database abstraction layer
///
/// Monitors and their check history live in a local libsql (SQLite)
/// database behind the `Database` trait.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

use crate::pool::LibsqlPool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Run migrations on a pooled connection
pub async fn initialize_pool(pool: &LibsqlPool) -> Result<()> {
    let conn = pool.get().await?;
    initialize_database(&conn).await
}
