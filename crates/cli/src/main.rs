//! AQI prediction CLI
//!
//! A command-line tool for querying the AQI prediction server: health,
//! the latest stream prediction, history and on-demand predictions.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{predictions, status};
use std::time::Duration;

/// AQI prediction CLI
#[derive(Parser)]
#[command(name = "aqi")]
#[command(author, version, about = "CLI for the AQI Prediction Service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via AQI_API_URL env var)
    #[arg(long, env = "AQI_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, global = true)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show server, model and stream health
    Health,

    /// Show the latest prediction from the sensor stream
    Latest,

    /// Show recent stream predictions
    History {
        /// Number of predictions to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Predict the status for an AQI value
    Predict {
        /// AQI reading
        #[arg(allow_negative_numbers = true)]
        aqi: f64,
    },

    /// Poll the latest prediction until interrupted
    Watch {
        /// Seconds between polls
        #[arg(long, short, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the stored configuration
    Show,

    /// Store the default API URL
    SetUrl {
        /// Server base URL, e.g. http://localhost:5000
        url: String,
    },

    /// Store the default output format
    SetFormat {
        #[arg(value_enum)]
        format: output::OutputFormat,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let format = cli
        .format
        .or_else(|| {
            config
                .default_format
                .as_deref()
                .and_then(output::OutputFormat::from_name)
        })
        .unwrap_or_default();

    // Config commands never build a client
    let api_url = config.resolve_api_url(cli.api_url.as_deref());
    let client = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Health => status::show_health(&client()?, format).await,
        Commands::Latest => predictions::show_latest(&client()?, format).await,
        Commands::History { limit } => predictions::show_history(&client()?, limit, format).await,
        Commands::Predict { aqi } => predictions::predict(&client()?, aqi, format).await,
        Commands::Watch { interval } => {
            predictions::watch(&client()?, Duration::from_secs(interval), format).await
        }
        Commands::Config(ConfigCommands::Show) => status::show_config(&config, format),
        Commands::Config(ConfigCommands::SetUrl { url }) => status::set_api_url(config, &url),
        Commands::Config(ConfigCommands::SetFormat { format }) => {
            status::set_format(config, format)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
