//! Operator command-line interface.

pub mod commands;
pub mod id_resolver;
pub mod output;

use clap::{Parser, Subcommand};
use console::style;

use commands::{flows::FlowsArgs, hospital::HospitalArgs, init::InitArgs};

#[derive(Parser, Debug)]
#[command(name = "flow-triage")]
#[command(about = "Inspect checkpointed flows and operate the flow hospital", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .flow-triage/ with a default config and database
    Init(InitArgs),
    /// Inspect flows, their checkpoints and diagnoses
    Flows(FlowsArgs),
    /// List and discharge hospitalized flows
    Hospital(HospitalArgs),
}

/// Print `err` with its cause chain and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": causes,
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", style("error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  {} {cause}", style("caused by:").dim());
        }
    }
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_discharge() {
        let cli = Cli::parse_from(["flow-triage", "--json", "hospital", "discharge", "abcd1234", "--terminate"]);
        assert!(cli.json);
        match cli.command {
            Commands::Hospital(HospitalArgs {
                command: commands::hospital::HospitalCommands::Discharge { id, terminate, .. },
            }) => {
                assert_eq!(id, "abcd1234");
                assert!(terminate);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_flows_list_status() {
        let cli = Cli::parse_from(["flow-triage", "flows", "list", "--status", "hospitalized"]);
        match cli.command {
            Commands::Flows(FlowsArgs {
                command: commands::flows::FlowsCommands::List { status, limit },
            }) => {
                assert_eq!(status.as_deref(), Some("hospitalized"));
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
