use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Text};
use natal_core::{BirthSubmission, ChartOrchestrator, Config, ProviderId};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "natal", version, about = "Natal chart service")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        /// Overrides `server.port` and the PORT environment variable.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Generate a single chart and print it.
    Chart {
        /// Birth date, e.g. 1990-05-15.
        #[arg(long)]
        date: String,

        /// Local birth time, e.g. 14:30.
        #[arg(long)]
        time: String,

        /// Birth place, e.g. "Paris, France".
        #[arg(long)]
        location: String,

        #[arg(long)]
        name: Option<String>,
    },

    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name: "opencage", "timezonedb", "astroapp" or "printful".
        provider: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => Config::config_file_path()?,
        };

        match self.command {
            Command::Serve { port } => {
                let mut config = load_config(&path)?;
                if let Some(port) = port {
                    config.server.port = port;
                }

                let orchestrator = ChartOrchestrator::from_config(&config)?;
                server::serve(config.server.port, orchestrator).await
            }
            Command::Chart { date, time, location, name } => {
                let config = load_config(&path)?;
                let orchestrator = ChartOrchestrator::from_config(&config)?;

                let submission = BirthSubmission {
                    birth_date: date,
                    birth_time: time,
                    birth_location: location,
                    name,
                };
                let chart = orchestrator.generate_chart(&submission).await?;

                println!("Chart image: {}", chart.image_url);
                println!("Sun:         {}", chart.sun);
                println!("Moon:        {}", chart.moon);
                println!("Rising:      {}", chart.rising);
                Ok(())
            }
            Command::Configure { provider } => configure(&path, &provider),
        }
    }
}

/// File configuration with the process environment laid over it.
fn load_config(path: &Path) -> Result<Config> {
    Config::load_from(path)?.with_env_overrides(|name| std::env::var(name).ok())
}

fn configure(path: &Path, provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;

    // Only the file is edited here; environment overrides must not leak into it.
    let mut config = Config::load_from(path)?;

    let api_key = Password::new(&format!("{id} API key:"))
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()
        .context("Failed to read API key")?;
    config.upsert_provider_api_key(id, api_key.trim().to_string());

    if id.needs_login() {
        let username = Text::new(&format!("{id} account email:"))
            .prompt()
            .context("Failed to read account email")?;
        let password = Password::new(&format!("{id} account password:"))
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Masked)
            .prompt()
            .context("Failed to read account password")?;
        config.set_provider_login(id, username.trim().to_string(), password);
    }

    config.save_to(path)?;
    info!(provider = %id, path = %path.display(), "saved provider credentials");
    println!("Saved {id} credentials to {}", path.display());
    Ok(())
}
