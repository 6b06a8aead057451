//! Server status commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthStatus};
use crate::config::Config;
use crate::output::{color_flag, color_status, print_json, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn component_rows(health: &HealthStatus) -> Vec<ComponentRow> {
    health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(&component.status),
            message: component.message.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

/// Show server health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("{}", "Service Health".bold());
            println!("{}", "=".repeat(50));
            println!("Server:                 {}", client.base_url().as_str().cyan());
            println!("Status:                 {}", color_status(&health.status));
            println!("Model loaded:           {}", color_flag(health.model_loaded));
            println!(
                "Stream:                 {} ({})",
                color_flag(health.stream_connected),
                color_status(&health.stream_state)
            );
            println!();
            print_table(&component_rows(&health));
        }
    }

    Ok(())
}

/// Show the stored CLI configuration
pub fn show_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Table => {
            let path = Config::config_path()?;
            println!("Config file:            {}", path.display());
            println!(
                "API URL:                {}",
                config.api_url.as_deref().unwrap_or("(default)")
            );
            println!(
                "Default format:         {}",
                config.default_format.as_deref().unwrap_or("table")
            );
        }
    }
    Ok(())
}

/// Persist the API URL used when `--api-url` is not given
pub fn set_api_url(mut config: Config, url: &str) -> Result<()> {
    url::Url::parse(url)?;
    config.api_url = Some(url.to_string());
    let path = config.save()?;
    print_success(&format!("API URL set to {} ({})", url, path.display()));
    Ok(())
}

/// Persist the default output format
pub fn set_format(mut config: Config, format: OutputFormat) -> Result<()> {
    let name = match format {
        OutputFormat::Table => "table",
        OutputFormat::Json => "json",
    };
    config.default_format = Some(name.to_string());
    let path = config.save()?;
    print_success(&format!("Default format set to {} ({})", name, path.display()));
    Ok(())
}
