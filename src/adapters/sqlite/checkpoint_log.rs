//! SQLite implementation of the CheckpointLog.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Checkpoint, FlowStatus};
use crate::domain::ports::CheckpointLog;

#[derive(Clone)]
pub struct SqliteCheckpointLog {
    pool: SqlitePool,
}

impl SqliteCheckpointLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointLog for SqliteCheckpointLog {
    async fn append(&self, checkpoint: &Checkpoint, next_step: usize) -> DomainResult<()> {
        let flow_id = checkpoint.flow_id.to_string();
        let mut tx = self.pool.begin().await?;

        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM flows WHERE id = ?")
            .bind(&flow_id)
            .fetch_optional(&mut *tx)
            .await?;
        let (status,) = status.ok_or(DomainError::FlowNotFound(checkpoint.flow_id))?;
        let status = FlowStatus::from_str(&status)
            .ok_or_else(|| DomainError::SerializationError(format!("Unknown flow status: {status}")))?;
        if !status.accepts_checkpoints() {
            return Err(DomainError::CheckpointRejected {
                flow_id: checkpoint.flow_id,
                status,
            });
        }

        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(sequence) FROM checkpoints WHERE flow_id = ?")
            .bind(&flow_id)
            .fetch_one(&mut *tx)
            .await?;
        let expected = max.map_or(0, |m| m as u64 + 1);
        if checkpoint.sequence != expected {
            return Err(DomainError::CheckpointConflict {
                flow_id: checkpoint.flow_id,
                expected,
                actual: checkpoint.sequence,
            });
        }

        sqlx::query("INSERT INTO checkpoints (flow_id, sequence, payload, committed_at) VALUES (?, ?, ?, ?)")
            .bind(&flow_id)
            .bind(checkpoint.sequence as i64)
            .bind(&checkpoint.payload)
            .bind(checkpoint.committed_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE flows SET current_step = ?, updated_at = ? WHERE id = ?")
            .bind(next_step as i64)
            .bind(checkpoint.committed_at.to_rfc3339())
            .bind(&flow_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest(&self, flow_id: Uuid) -> DomainResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT flow_id, sequence, payload, committed_at FROM checkpoints
             WHERE flow_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(flow_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn list(&self, flow_id: Uuid) -> DomainResult<Vec<Checkpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT flow_id, sequence, payload, committed_at FROM checkpoints
             WHERE flow_id = ? ORDER BY sequence ASC",
        )
        .bind(flow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Checkpoint::try_from).collect()
    }

    async fn purge(&self, flow_id: Uuid) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE flow_id = ?")
            .bind(flow_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    flow_id: String,
    sequence: i64,
    payload: Vec<u8>,
    committed_at: String,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = DomainError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(Checkpoint {
            flow_id: parse_uuid(&row.flow_id)?,
            sequence: u64::try_from(row.sequence).map_err(|e| DomainError::SerializationError(e.to_string()))?,
            payload: row.payload,
            committed_at: parse_datetime(&row.committed_at)?,
        })
    }
}
