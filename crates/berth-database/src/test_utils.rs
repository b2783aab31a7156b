//! Test utilities for database-backed tests
//!
//! Provides an in-memory SQLite database with all migrations applied, so
//! registry and lifecycle tests run hermetically without a data directory.

use crate::DbConnection;
use berth_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;

/// Connect to a fresh in-memory SQLite database and apply all migrations.
///
/// The pool is pinned to a single connection: every pooled connection to
/// `sqlite::memory:` would otherwise open its own empty database.
pub async fn setup_test_db() -> anyhow::Result<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create test database: {}", e))?;

    Migrator::up(&db, None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    Ok(Arc::new(db))
}
