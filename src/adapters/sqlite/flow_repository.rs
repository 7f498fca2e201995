//! SQLite implementation of the FlowRepository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_optional_json, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Flow, FlowStatus};
use crate::domain::ports::FlowRepository;

const FLOW_COLUMNS: &str =
    "id, definition, parameters, status, current_step, last_failure, result, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteFlowRepository {
    pool: SqlitePool,
}

impl SqliteFlowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlowRepository for SqliteFlowRepository {
    async fn create(&self, flow: &Flow) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO flows (id, definition, parameters, status, current_step, last_failure, result, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(flow.id.to_string())
        .bind(&flow.definition)
        .bind(serde_json::to_string(&flow.parameters)?)
        .bind(flow.status.as_str())
        .bind(flow.current_step as i64)
        .bind(flow.last_failure.as_ref().map(serde_json::to_string).transpose()?)
        .bind(flow.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(flow.created_at.to_rfc3339())
        .bind(flow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Flow>> {
        let row: Option<FlowRow> = sqlx::query_as(&format!("SELECT {FLOW_COLUMNS} FROM flows WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Flow::try_from).transpose()
    }

    async fn update(&self, flow: &Flow) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE flows SET status = ?, current_step = ?, last_failure = ?, result = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(flow.status.as_str())
        .bind(flow.current_step as i64)
        .bind(flow.last_failure.as_ref().map(serde_json::to_string).transpose()?)
        .bind(flow.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(flow.updated_at.to_rfc3339())
        .bind(flow.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::FlowNotFound(flow.id));
        }
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[FlowStatus]) -> DomainResult<Vec<Flow>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {FLOW_COLUMNS} FROM flows WHERE status IN ("));
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(") ORDER BY created_at ASC");

        let rows: Vec<FlowRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Flow::try_from).collect()
    }

    async fn list(&self, limit: usize) -> DomainResult<Vec<Flow>> {
        let rows: Vec<FlowRow> = sqlx::query_as(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows ORDER BY updated_at DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Flow::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct FlowRow {
    id: String,
    definition: String,
    parameters: String,
    status: String,
    current_step: i64,
    last_failure: Option<String>,
    result: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<FlowRow> for Flow {
    type Error = DomainError;

    fn try_from(row: FlowRow) -> Result<Self, Self::Error> {
        let status = FlowStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Unknown flow status: {}", row.status)))?;

        Ok(Flow {
            id: parse_uuid(&row.id)?,
            definition: row.definition,
            parameters: serde_json::from_str(&row.parameters)?,
            status,
            current_step: usize::try_from(row.current_step)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            last_failure: parse_optional_json(row.last_failure)?,
            result: parse_optional_json(row.result)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
