//! Database connection management

use berth_core::{ServiceError, ServiceResult};
use berth_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tracing::debug;

pub type DbConnection = DatabaseConnection;

/// Connect to the registry database and bring the schema up to date.
///
/// `database_url` is usually `sqlite://{data_dir}/berth.db?mode=rwc`; the
/// embedded migrations run on every boot so a fresh data directory is enough
/// to get a working installation.
pub async fn establish_connection(database_url: &str) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(5)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    debug!("Running database migrations");
    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    Ok(Arc::new(db))
}
