//! SQLite database adapters for the flow triage system.

pub mod checkpoint_log;
pub mod connection;
pub mod diagnosis_repository;
pub mod flow_repository;
pub mod migrations;
pub mod state_store;

pub use checkpoint_log::SqliteCheckpointLog;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use diagnosis_repository::SqliteDiagnosisRepository;
pub use flow_repository::SqliteFlowRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use state_store::SqliteStateStore;

use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Failure, FailureKind, PersistenceFault};

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional JSON column.
pub fn parse_optional_json<T: serde::de::DeserializeOwned>(s: Option<String>) -> DomainResult<Option<T>> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Map a SQLx error onto the failure taxonomy staff understand.
pub fn classify_sqlx_error(err: &sqlx::Error) -> FailureKind {
    match err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => {
                FailureKind::Persistence(PersistenceFault::ConstraintViolation)
            }
            _ => {
                let message = db.message().to_lowercase();
                if message.contains("syntax error") {
                    FailureKind::Persistence(PersistenceFault::QuerySyntax)
                } else if message.contains("database is locked") || message.contains("busy") {
                    FailureKind::Transient
                } else {
                    FailureKind::Persistence(PersistenceFault::Other)
                }
            }
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => FailureKind::Transient,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
            FailureKind::Persistence(PersistenceFault::MalformedData)
        }
        _ => FailureKind::Persistence(PersistenceFault::Other),
    }
}

/// Convert a SQLx error into an escalatable failure.
pub fn sqlx_failure(err: &sqlx::Error) -> Failure {
    Failure::new(classify_sqlx_error(err), err.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

pub async fn initialize_database(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, config).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
