//! Flow inspection commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::adapters::sqlite::{SqliteCheckpointLog, SqliteDiagnosisRepository, SqliteFlowRepository};
use crate::cli::id_resolver::resolve_flow_id;
use crate::cli::output::{list_table, output, render_list, styled_status, styled_verdict, truncate, CommandOutput};
use crate::domain::models::{Checkpoint, Config, Diagnosis, FailureClass, Flow, FlowStatus, Verdict};
use crate::domain::ports::{CheckpointLog, DiagnosisRepository, FlowRepository};

use super::open_database;

#[derive(Args, Debug)]
pub struct FlowsArgs {
    #[command(subcommand)]
    pub command: FlowsCommands,
}

#[derive(Subcommand, Debug)]
pub enum FlowsCommands {
    /// List flows, most recently updated first
    List {
        /// Filter by status (running, awaiting_recording, hospitalized, discharged, completed, terminal)
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number of flows to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Show a flow with its checkpoints and diagnoses
    Show {
        /// Flow ID or unique prefix
        id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct FlowOutput {
    pub id: String,
    pub definition: String,
    pub status: FlowStatus,
    pub current_step: usize,
    pub last_failure: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Flow> for FlowOutput {
    fn from(flow: &Flow) -> Self {
        Self {
            id: flow.id.to_string(),
            definition: flow.definition.clone(),
            status: flow.status,
            current_step: flow.current_step,
            last_failure: flow.last_failure.as_ref().map(ToString::to_string),
            result: flow.result.clone(),
            created_at: flow.created_at.to_rfc3339(),
            updated_at: flow.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct FlowListOutput {
    pub flows: Vec<FlowOutput>,
    pub total: usize,
}

impl CommandOutput for FlowListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "definition", "status", "step", "updated"]);
        for flow in &self.flows {
            table.add_row(vec![
                flow.id[..8].to_string(),
                truncate(&flow.definition, 24),
                styled_status(flow.status).to_string(),
                flow.current_step.to_string(),
                flow.updated_at.clone(),
            ]);
        }
        render_list("flow", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CheckpointOutput {
    pub sequence: u64,
    pub step: Option<usize>,
    pub bytes: usize,
    pub committed_at: String,
}

impl From<&Checkpoint> for CheckpointOutput {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            sequence: checkpoint.sequence,
            step: checkpoint.snapshot().ok().map(|s| s.step),
            bytes: checkpoint.payload.len(),
            committed_at: checkpoint.committed_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct DiagnosisOutput {
    pub admission: u32,
    pub checkpoint_sequence: u64,
    pub verdict: Verdict,
    pub classification: FailureClass,
    pub staff_consulted: Vec<String>,
    pub failure: Option<String>,
    pub diagnosed_at: String,
}

impl From<&Diagnosis> for DiagnosisOutput {
    fn from(diagnosis: &Diagnosis) -> Self {
        Self {
            admission: diagnosis.admission,
            checkpoint_sequence: diagnosis.checkpoint_sequence,
            verdict: diagnosis.verdict,
            classification: diagnosis.classification,
            staff_consulted: diagnosis.staff_consulted.clone(),
            failure: diagnosis.failure.as_ref().map(ToString::to_string),
            diagnosed_at: diagnosis.diagnosed_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct FlowDetailOutput {
    pub flow: FlowOutput,
    pub checkpoints: Vec<CheckpointOutput>,
    pub diagnoses: Vec<DiagnosisOutput>,
}

impl CommandOutput for FlowDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Flow: {}", self.flow.id),
            format!("Definition: {}", self.flow.definition),
            format!("Status: {}", styled_status(self.flow.status)),
            format!("Current step: {}", self.flow.current_step),
            format!("Created: {}", self.flow.created_at),
            format!("Updated: {}", self.flow.updated_at),
        ];
        if let Some(failure) = &self.flow.last_failure {
            lines.push(format!("Last failure: {failure}"));
        }
        if let Some(result) = &self.flow.result {
            lines.push(format!("Result: {result}"));
        }

        lines.push(String::new());
        let mut checkpoints = list_table(&["seq", "step", "bytes", "committed"]);
        for cp in &self.checkpoints {
            checkpoints.add_row(vec![
                cp.sequence.to_string(),
                cp.step.map_or_else(|| "?".to_string(), |s| s.to_string()),
                cp.bytes.to_string(),
                cp.committed_at.clone(),
            ]);
        }
        lines.push(render_list("checkpoint", &checkpoints, self.checkpoints.len()));

        lines.push(String::new());
        let mut diagnoses = list_table(&["admission", "seq", "verdict", "class", "staff", "failure"]);
        for out in &self.diagnoses {
            diagnoses.add_row(vec![
                out.admission.to_string(),
                out.checkpoint_sequence.to_string(),
                styled_verdict(out.verdict).to_string(),
                out.classification.to_string(),
                out.staff_consulted.join(" > "),
                truncate(out.failure.as_deref().unwrap_or("-"), 48),
            ]);
        }
        lines.push(render_list("diagnosis", &diagnoses, self.diagnoses.len()));

        lines.join("\n")
    }
}

pub async fn execute(args: FlowsArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let flows = SqliteFlowRepository::new(pool.clone());

    match args.command {
        FlowsCommands::List { status, limit } => {
            let listed = match status {
                Some(status) => {
                    let status = FlowStatus::from_str(&status)
                        .ok_or_else(|| anyhow!("Invalid status: {status}"))?;
                    let mut matching = flows.list_by_status(&[status]).await?;
                    matching.truncate(limit);
                    matching
                }
                None => flows.list(limit).await?,
            };

            let out = FlowListOutput {
                total: listed.len(),
                flows: listed.iter().map(FlowOutput::from).collect(),
            };
            output(&out, json_mode);
        }

        FlowsCommands::Show { id } => {
            let flow_id = resolve_flow_id(&pool, &id).await?;
            let flow = flows
                .get(flow_id)
                .await?
                .ok_or_else(|| anyhow!("Flow not found: {id}"))?;
            let checkpoints = SqliteCheckpointLog::new(pool.clone()).list(flow_id).await?;
            let diagnoses = SqliteDiagnosisRepository::new(pool.clone())
                .list_for_flow(flow_id)
                .await?;

            let out = FlowDetailOutput {
                flow: FlowOutput::from(&flow),
                checkpoints: checkpoints.iter().map(CheckpointOutput::from).collect(),
                diagnoses: diagnoses.iter().map(DiagnosisOutput::from).collect(),
            };
            output(&out, json_mode);
        }
    }

    pool.close().await;
    Ok(())
}
