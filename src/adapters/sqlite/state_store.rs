//! SQLite-backed transactional state store for the recording pipeline.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::adapters::sqlite::{parse_uuid, sqlx_failure};
use crate::domain::errors::DomainResult;
use crate::domain::models::{Failure, RecordedState};
use crate::domain::ports::{StateStore, StateTransaction};

#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn begin(&self) -> Result<Box<dyn StateTransaction>, Failure> {
        let tx = self.pool.begin().await.map_err(|e| sqlx_failure(&e))?;
        Ok(Box::new(SqliteStateTransaction { tx }))
    }

    async fn states_for_flow(&self, flow_id: Uuid) -> DomainResult<Vec<RecordedState>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT id, kind, payload FROM recorded_states WHERE flow_id = ? ORDER BY recorded_at ASC, rowid ASC",
        )
        .bind(flow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, kind, payload)| {
                Ok(RecordedState {
                    id: parse_uuid(&id)?,
                    kind,
                    payload: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }
}

/// Open recording transaction. Dropped without commit, sqlx rolls it back.
pub struct SqliteStateTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StateTransaction for SqliteStateTransaction {
    async fn write(&mut self, flow_id: Uuid, states: &[RecordedState]) -> Result<(), Failure> {
        let recorded_at = Utc::now().to_rfc3339();
        for state in states {
            sqlx::query("INSERT INTO recorded_states (id, flow_id, kind, payload, recorded_at) VALUES (?, ?, ?, ?, ?)")
                .bind(state.id.to_string())
                .bind(flow_id.to_string())
                .bind(&state.kind)
                .bind(state.payload.to_string())
                .bind(&recorded_at)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| sqlx_failure(&e))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), Failure> {
        self.tx.commit().await.map_err(|e| sqlx_failure(&e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), Failure> {
        self.tx.rollback().await.map_err(|e| sqlx_failure(&e))
    }
}
