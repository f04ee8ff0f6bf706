//! CLI parse: clap types for cloudboot. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cloudboot CLI - level-ordered boot plans
#[derive(Parser)]
#[command(name = "cloudboot")]
#[command(about = "Boot services level by level on provisioned or existing hosts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a run from a plan file and boot it to completion
    Boot {
        /// Plan descriptor (TOML)
        plan: PathBuf,
        /// Name for the run (default: random)
        #[arg(long)]
        run_name: Option<String>,
    },
    /// Reload a stored run and drive it again
    Resume {
        run: String,
    },
    /// Show every service of a run, level by level
    Status {
        run: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the failed services of a run
    Errors {
        run: String,
    },
    /// Restart one service, then drive the run again
    Restart {
        run: String,
        service: String,
    },
    /// Shut down every service of a run, last level first
    Terminate {
        run: String,
        /// Skip shutdown programs and tear resources down directly
        #[arg(long)]
        force: bool,
    },
    /// List stored runs
    List,
    /// Remove a stored run; its services are not shut down
    Delete {
        run: String,
    },
}

impl Commands {
    /// Stable command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Boot { .. } => "boot",
            Commands::Resume { .. } => "resume",
            Commands::Status { .. } => "status",
            Commands::Errors { .. } => "errors",
            Commands::Restart { .. } => "restart",
            Commands::Terminate { .. } => "terminate",
            Commands::List => "list",
            Commands::Delete { .. } => "delete",
        }
    }
}
