//! testbridge - remote UI test agent
//!
//! Connects a host application to an orchestration server over WebSocket
//! and executes the UI commands it sends.

use clap::Parser;
use commands::Commands;
use testbridge::common::logging;
use testbridge::{cli, commands};

#[derive(Parser)]
#[command(name = "testbridge", about = "Remote UI test agent")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held until exit so buffered log lines are flushed
    let log_guard = match &cli.command {
        Commands::Run { log_file, .. } => {
            logging::init_agent(log_file.as_deref()).map(|(path, guard)| {
                tracing::info!(path = %path.display(), "Writing agent log");
                guard
            })
        }
        _ => {
            logging::init_cli();
            None
        }
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        tracing::debug!(code = e.code(), "Command failed");
        eprintln!("Error: {e}");
        drop(log_guard);
        std::process::exit(1);
    }
}
