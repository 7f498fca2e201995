//! CLI command implementations.

pub mod flows;
pub mod hospital;
pub mod init;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{initialize_database, verify_connection, PoolConfig};
use crate::domain::models::Config;

/// Open the configured database, applying any pending migrations.
pub(crate) async fn open_database(config: &Config) -> Result<SqlitePool> {
    let pool = initialize_database(&config.database.url(), Some(PoolConfig::from(&config.database)))
        .await
        .with_context(|| {
            format!(
                "Failed to open database at {}. Run 'flow-triage init' first.",
                config.database.path
            )
        })?;
    verify_connection(&pool).await.context("Database connection check failed")?;
    Ok(pool)
}
