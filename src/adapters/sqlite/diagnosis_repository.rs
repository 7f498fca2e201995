//! SQLite implementation of the DiagnosisRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_optional_json, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Diagnosis, FailureClass, Verdict};
use crate::domain::ports::DiagnosisRepository;

#[derive(Clone)]
pub struct SqliteDiagnosisRepository {
    pool: SqlitePool,
}

impl SqliteDiagnosisRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiagnosisRepository for SqliteDiagnosisRepository {
    async fn record(&self, diagnosis: &Diagnosis) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO diagnoses (id, flow_id, admission, checkpoint_sequence, staff_consulted, verdict, classification, failure, diagnosed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(diagnosis.id.to_string())
        .bind(diagnosis.flow_id.to_string())
        .bind(i64::from(diagnosis.admission))
        .bind(diagnosis.checkpoint_sequence as i64)
        .bind(serde_json::to_string(&diagnosis.staff_consulted)?)
        .bind(diagnosis.verdict.as_str())
        .bind(diagnosis.classification.as_str())
        .bind(diagnosis.failure.as_ref().map(serde_json::to_string).transpose()?)
        .bind(diagnosis.diagnosed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_flow(&self, flow_id: Uuid) -> DomainResult<Vec<Diagnosis>> {
        let rows: Vec<DiagnosisRow> = sqlx::query_as(
            "SELECT id, flow_id, admission, checkpoint_sequence, staff_consulted, verdict, classification, failure, diagnosed_at
             FROM diagnoses WHERE flow_id = ? ORDER BY admission ASC, diagnosed_at ASC",
        )
        .bind(flow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Diagnosis::try_from).collect()
    }

    async fn latest_for_flow(&self, flow_id: Uuid) -> DomainResult<Option<Diagnosis>> {
        let row: Option<DiagnosisRow> = sqlx::query_as(
            "SELECT id, flow_id, admission, checkpoint_sequence, staff_consulted, verdict, classification, failure, diagnosed_at
             FROM diagnoses WHERE flow_id = ? ORDER BY admission DESC, diagnosed_at DESC LIMIT 1",
        )
        .bind(flow_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Diagnosis::try_from).transpose()
    }

    async fn count_for_flow(&self, flow_id: Uuid) -> DomainResult<u32> {
        let (count,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(admission), 0) FROM diagnoses WHERE flow_id = ?")
            .bind(flow_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        u32::try_from(count).map_err(|e| DomainError::SerializationError(e.to_string()))
    }
}

#[derive(sqlx::FromRow)]
struct DiagnosisRow {
    id: String,
    flow_id: String,
    admission: i64,
    checkpoint_sequence: i64,
    staff_consulted: String,
    verdict: String,
    classification: String,
    failure: Option<String>,
    diagnosed_at: String,
}

impl TryFrom<DiagnosisRow> for Diagnosis {
    type Error = DomainError;

    fn try_from(row: DiagnosisRow) -> Result<Self, Self::Error> {
        let verdict = Verdict::from_str(&row.verdict)
            .ok_or_else(|| DomainError::SerializationError(format!("Unknown verdict: {}", row.verdict)))?;
        let classification = FailureClass::from_str(&row.classification).ok_or_else(|| {
            DomainError::SerializationError(format!("Unknown classification: {}", row.classification))
        })?;
        let to_error = |e: std::num::TryFromIntError| DomainError::SerializationError(e.to_string());

        Ok(Diagnosis {
            id: parse_uuid(&row.id)?,
            flow_id: parse_uuid(&row.flow_id)?,
            admission: u32::try_from(row.admission).map_err(to_error)?,
            checkpoint_sequence: u64::try_from(row.checkpoint_sequence).map_err(to_error)?,
            staff_consulted: serde_json::from_str(&row.staff_consulted)?,
            verdict,
            classification,
            failure: parse_optional_json(row.failure)?,
            diagnosed_at: parse_datetime(&row.diagnosed_at)?,
        })
    }
}
