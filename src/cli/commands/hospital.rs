//! Hospital commands: inspect and discharge hospitalized flows.
//!
//! Discharge here works offline against the database. A discharged flow is
//! picked up again by the next engine `recover()`.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{SqliteCheckpointLog, SqliteDiagnosisRepository, SqliteFlowRepository};
use crate::cli::id_resolver::resolve_flow_id;
use crate::cli::output::{list_table, output, render_list, styled_verdict, truncate, CommandOutput};
use crate::domain::models::{Config, FlowStatus, Verdict};
use crate::domain::ports::{CheckpointLog, DiagnosisRepository, FlowRepository};
use crate::services::FlowHospital;

use super::flows::DiagnosisOutput;
use super::open_database;

#[derive(Args, Debug)]
pub struct HospitalArgs {
    #[command(subcommand)]
    pub command: HospitalCommands,
}

#[derive(Subcommand, Debug)]
pub enum HospitalCommands {
    /// List hospitalized flows with their latest diagnosis
    List,
    /// Discharge a hospitalized flow
    Discharge {
        /// Flow ID or unique prefix
        id: String,
        /// Fail the flow permanently instead of resuming it
        #[arg(long)]
        terminate: bool,
        /// Reason recorded with the diagnosis
        #[arg(short, long, default_value = "operator discharge")]
        reason: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct PatientOutput {
    pub flow_id: String,
    pub definition: String,
    pub admissions: u32,
    pub latest: Option<DiagnosisOutput>,
}

#[derive(Debug, serde::Serialize)]
pub struct WardOutput {
    pub patients: Vec<PatientOutput>,
    pub total: usize,
}

impl CommandOutput for WardOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["flow", "definition", "admissions", "verdict", "class", "failure"]);
        for patient in &self.patients {
            let latest = patient.latest.as_ref();
            table.add_row(vec![
                patient.flow_id[..8].to_string(),
                truncate(&patient.definition, 24),
                patient.admissions.to_string(),
                latest.map_or_else(|| "-".to_string(), |d| styled_verdict(d.verdict).to_string()),
                latest.map_or_else(|| "-".to_string(), |d| d.classification.to_string()),
                truncate(latest.and_then(|d| d.failure.as_deref()).unwrap_or("-"), 48),
            ]);
        }
        render_list("hospitalized flow", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct DischargeOutput {
    pub flow_id: String,
    pub status: FlowStatus,
    pub diagnosis: DiagnosisOutput,
}

impl CommandOutput for DischargeOutput {
    fn to_human(&self) -> String {
        match self.status {
            FlowStatus::Terminal => format!("Flow {} terminated.", self.flow_id),
            _ => format!(
                "Flow {} discharged; it resumes from its last checkpoint on the next recovery.",
                self.flow_id
            ),
        }
    }
}

pub async fn execute(args: HospitalArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;

    match args.command {
        HospitalCommands::List => {
            let out = ward(&pool).await?;
            output(&out, json_mode);
        }
        HospitalCommands::Discharge { id, terminate, reason } => {
            let flow_id = resolve_flow_id(&pool, &id).await?;
            let out = discharge(&pool, config, flow_id, terminate, &reason).await?;
            output(&out, json_mode);
        }
    }

    pool.close().await;
    Ok(())
}

async fn ward(pool: &SqlitePool) -> Result<WardOutput> {
    let flows = SqliteFlowRepository::new(pool.clone());
    let diagnoses = SqliteDiagnosisRepository::new(pool.clone());

    let mut patients = Vec::new();
    for flow in flows.list_by_status(&[FlowStatus::Hospitalized]).await? {
        patients.push(PatientOutput {
            flow_id: flow.id.to_string(),
            definition: flow.definition.clone(),
            admissions: diagnoses.count_for_flow(flow.id).await?,
            latest: diagnoses
                .latest_for_flow(flow.id)
                .await?
                .as_ref()
                .map(DiagnosisOutput::from),
        });
    }

    Ok(WardOutput {
        total: patients.len(),
        patients,
    })
}

async fn discharge(
    pool: &SqlitePool,
    config: &Config,
    flow_id: uuid::Uuid,
    terminate: bool,
    reason: &str,
) -> Result<DischargeOutput> {
    let flows = SqliteFlowRepository::new(pool.clone());
    let mut flow = flows
        .get(flow_id)
        .await?
        .ok_or_else(|| anyhow!("Flow not found: {flow_id}"))?;

    if flow.status != FlowStatus::Hospitalized {
        bail!("Flow {flow_id} is {}, not hospitalized", flow.status);
    }

    let (verdict, status) = if terminate {
        (Verdict::Terminal, FlowStatus::Terminal)
    } else {
        (Verdict::Resuscitate, FlowStatus::Discharged)
    };

    let hospital = FlowHospital::new(Arc::new(SqliteDiagnosisRepository::new(pool.clone())), &config.hospital);
    let diagnosis = hospital.discharge(flow_id, verdict, reason).await?;

    flow.status = status;
    flow.updated_at = Utc::now();
    flows.update(&flow).await?;

    if status == FlowStatus::Terminal && !config.engine.retain_finished_checkpoints {
        SqliteCheckpointLog::new(pool.clone()).purge(flow_id).await?;
    }

    Ok(DischargeOutput {
        flow_id: flow_id.to_string(),
        status,
        diagnosis: DiagnosisOutput::from(&diagnosis),
    })
}
