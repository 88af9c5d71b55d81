pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::utils::logging::default_log_file;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file; without a value, to session.log in the data directory
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,

    /// Configuration file to use instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a search task and follow its progress
    Search {
        /// What to search for, in plain words
        #[arg(required = true)]
        task: String,

        /// Maximum number of results to collect
        #[arg(short, long)]
        max_results: Option<u32>,

        /// Skip the AI analysis step
        #[arg(long)]
        no_ai: bool,
    },

    /// List example tasks by category
    Examples,

    /// Show the effective configuration
    Config,
}

impl Cli {
    /// Where file logging goes, if it was asked for
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .map(|path| path.clone().unwrap_or_else(default_log_file))
    }
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Search { task, max_results, no_ai } => {
            info!("Starting search: {}", task);
            commands::search(cli.config, task, max_results, no_ai).await
        }
        Commands::Examples => {
            commands::list_examples();
            Ok(())
        }
        Commands::Config => {
            info!("Showing current configuration");
            commands::show_config(cli.config)
        }
    }
}
