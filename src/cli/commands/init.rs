//! Implementation of the `flow-triage init` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::CONFIG_DIR;

const DEFAULT_CONFIG_TEMPLATE: &str = r"# Flow Triage Configuration
# Override settings by editing this file, adding .flow-triage/local.yaml,
# or setting environment variables with the FLOW_TRIAGE_ prefix.
#
# Example environment variables:
#   export FLOW_TRIAGE_DATABASE__PATH=/custom/path/flows.db
#   export FLOW_TRIAGE_HOSPITAL__MAX_RESUSCITATIONS=5
#   export FLOW_TRIAGE_LOGGING__LEVEL=debug

database:
  path: .flow-triage/flows.db
  max_connections: 5

logging:
  level: info
  format: json
  # log_dir: .flow-triage/logs
  rotation: daily

engine:
  worker_pool_size: 4
  retain_finished_checkpoints: false

hospital:
  max_resuscitations: 3
  initial_backoff_ms: 100
  max_backoff_ms: 30000
  backoff_multiplier: 2.0

recovery:
  retry_hospitalized: true
";

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force reinitialization even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push(format!("\nWrote {CONFIG_DIR}/config.yaml"));
        }
        if self.database_initialized {
            lines.push(format!("Database initialized at {CONFIG_DIR}/flows.db"));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };
    let triage_dir = target_path.join(CONFIG_DIR);

    if triage_dir.exists() && !args.force {
        let out = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
            database_initialized: false,
        };
        output(&out, json_mode);
        return Ok(());
    }

    if args.force && triage_dir.exists() {
        fs::remove_dir_all(&triage_dir)
            .await
            .with_context(|| format!("Failed to remove existing {CONFIG_DIR} directory"))?;
    }

    let mut directories_created = vec![];
    for dir in [triage_dir.clone(), triage_dir.join("logs")] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir.strip_prefix(&target_path).unwrap_or(&dir);
            directories_created.push(relative.to_string_lossy().to_string());
        }
    }

    fs::write(triage_dir.join("config.yaml"), DEFAULT_CONFIG_TEMPLATE)
        .await
        .context("Failed to write default configuration")?;

    let db_url = format!("sqlite:{}", triage_dir.join("flows.db").display());
    let pool = initialize_database(&db_url, None)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    let out = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
        database_initialized: true,
    };
    output(&out, json_mode);
    Ok(())
}
