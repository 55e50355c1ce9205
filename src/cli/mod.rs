//! CLI command handling
//!
//! Runs the agent against an in-memory scene and formats console output.

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{paths, Result};
use crate::host::memory::MemoryHost;
use crate::host::{ElementDirectory, HostBindings, WellKnownProperty};
use crate::protocol::{ElementSelector, SelectorStrategy};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            scene,
            url,
            config,
            log_file: _,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(url) = url {
                config.server.url = url;
            }

            let host = Arc::new(MemoryHost::from_file(&scene)?);
            println!(
                "{} {} {} {}",
                "Serving".cyan().bold(),
                scene.display().to_string().white().bold(),
                "to".cyan(),
                config.server.url.dimmed()
            );

            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let agent = Agent::new(config, HostBindings::from_host(Arc::clone(&host)));
            agent.run(shutdown).await?;

            println!(
                "{} {} input events synthesized",
                "✓".green(),
                host.events().len()
            );
            Ok(())
        }

        Commands::Inspect {
            scene,
            strategy,
            value,
        } => {
            let host = MemoryHost::from_file(&scene)?;
            let strategy: SelectorStrategy = strategy.parse()?;
            let selector = ElementSelector::new(strategy, value);

            let matches = host.find(&selector);
            if matches.is_empty() {
                println!("{} No element matches {}", "✗".red(), selector);
                return Ok(());
            }

            println!("{} {}:", "Matches for".cyan(), selector);
            for (index, element) in matches.iter().enumerate() {
                let text = host
                    .property(*element, WellKnownProperty::Text)
                    .unwrap_or_default();
                let position = host
                    .screen_point(*element)
                    .map(|p| format!("({}, {})", p.x, p.y))
                    .unwrap_or_else(|| "-".to_string());
                let visibility = if host.is_visible(*element) {
                    "visible".green()
                } else {
                    "hidden".yellow()
                };

                println!(
                    "  [{}] {} {} at {} {}",
                    index,
                    host.describe(*element).white().bold(),
                    visibility,
                    position,
                    if text.is_empty() {
                        String::new()
                    } else {
                        format!("text={:?}", text).dimmed().to_string()
                    }
                );
            }
            Ok(())
        }

        Commands::Config { config } => {
            let source = match &config {
                Some(path) => path.display().to_string(),
                None => match paths::config_path() {
                    Some(path) if path.exists() => path.display().to_string(),
                    Some(path) => format!("{} (not found, using defaults)", path.display()),
                    None => "defaults".to_string(),
                },
            };
            let config = load_config(config.as_deref())?;

            println!("{} {}", "Config:".cyan(), source.dimmed());
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path),
        None => Config::load(),
    }
}
