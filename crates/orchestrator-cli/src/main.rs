use anyhow::Result;
use clap::Parser;

mod cli;
mod doctor;
mod run_cmd;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| Some(std::path::PathBuf::from(".ma/config.toml")));
    let workflow_dir = cli.workflow_dir.unwrap_or_else(|| std::path::PathBuf::from(".ma/workflows"));

    match cli.command {
        Commands::Run {
            project_id,
            repo_url,
            base_branch,
            force_rescan,
        } => {
            let outcome = run_cmd::handle_run(run_cmd::RunArgs {
                project_id,
                repo_url,
                base_branch,
                force_rescan,
                config_path,
                workflow_dir,
            })
            .await?;
            print_outcome(&outcome);
        }
        Commands::Doctor => {
            doctor::run_doctor().await?;
        }
    }

    Ok(())
}

fn print_outcome(outcome: &ma_coordinator::CoordinatorOutcome) {
    use ma_coordinator::CoordinatorOutcome::*;
    match outcome {
        NoEligibleTask => println!("{}", serde_json::json!({"outcome": "no_eligible_task"})),
        Completed { workflow_id, task_id, summary } => println!(
            "{}",
            serde_json::json!({
                "outcome": "completed",
                "workflow_id": workflow_id,
                "task_id": task_id,
                "workflow_name": summary.workflow_name,
                "steps_run": summary.steps.len(),
                "aborted": summary.aborted,
            })
        ),
        Aborted { workflow_id, task_id, purged, error } => println!(
            "{}",
            serde_json::json!({
                "outcome": "aborted",
                "workflow_id": workflow_id,
                "task_id": task_id,
                "purged_entries": purged,
                "error": error,
            })
        ),
    }
}
