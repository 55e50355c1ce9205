//! CLI command definitions
//!
//! Defines the clap commands for the testbridge CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a scene file to the orchestration server until disconnected
    Run {
        /// YAML scene describing the element tree
        #[arg(long)]
        scene: PathBuf,

        /// Server URL (overrides the config file)
        #[arg(long)]
        url: Option<String>,

        /// Config file to use instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the agent log here instead of the default log directory
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Resolve a selector against a scene file and print the matches
    Inspect {
        /// YAML scene describing the element tree
        #[arg(long)]
        scene: PathBuf,

        /// Selector strategy: name, tag, path, text or component
        #[arg(long, default_value = "name")]
        strategy: String,

        /// Selector value
        #[arg(long)]
        value: String,
    },

    /// Show the effective configuration and where it is read from
    Config {
        /// Config file to use instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
