use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ma-orchestrator", version, about = "Multi-agent workflow orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Static configuration TOML (default: `.ma/config.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of workflow definition YAML files (default: `.ma/workflows`).
    #[arg(long, global = true)]
    pub workflow_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed one coordinator request and run the persona dispatchers until it completes.
    Run {
        project_id: String,
        repo_url: Option<String>,
        base_branch: Option<String>,

        /// Re-fetch tasks even if a cached selection would otherwise be reused.
        #[arg(long)]
        force_rescan: bool,
    },
    /// Check that the VCS binary, Task-Service, and PROJECT_BASE are usable.
    Doctor,
}
