//! Server configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `AQI_*` environment variables.

use aqi_lib::ingest::{IngestionConfig, MqttConfig};
use aqi_lib::HISTORY_CAPACITY;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "AQI_CONFIG";

/// Config file read when `AQI_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "aqi-server.toml";

const ENV_PREFIX: &str = "AQI";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port for the query API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Model artifact directory; searched in the default locations when unset
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,

    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_mqtt_keep_alive")]
    pub mqtt_keep_alive_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub reconnect_initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub reconnect_max_backoff_secs: u64,

    /// Number of stream predictions kept for `/history`
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_api_port() -> u16 {
    5000
}

fn default_mqtt_host() -> String {
    MqttConfig::default().host
}

fn default_mqtt_port() -> u16 {
    MqttConfig::default().port
}

fn default_mqtt_topic() -> String {
    MqttConfig::default().topic
}

fn default_mqtt_client_id() -> String {
    MqttConfig::default().client_id
}

fn default_mqtt_keep_alive() -> u64 {
    60
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    60
}

fn default_history_capacity() -> usize {
    HISTORY_CAPACITY
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            model_dir: None,
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_topic: default_mqtt_topic(),
            mqtt_client_id: default_mqtt_client_id(),
            mqtt_keep_alive_secs: default_mqtt_keep_alive(),
            reconnect_initial_backoff_ms: default_initial_backoff(),
            reconnect_max_backoff_secs: default_max_backoff(),
            history_capacity: default_history_capacity(),
            log_format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the config file and process environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::from_sources(Some(Path::new(&file)), None)
    }

    /// Load from an optional file and an explicit environment map
    /// (`None` reads the process environment)
    pub fn from_sources(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let config: ServerConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt_host.trim().is_empty() {
            bail!("mqtt_host must not be empty");
        }
        if self.mqtt_topic.trim().is_empty() {
            bail!("mqtt_topic must not be empty");
        }
        if self.history_capacity == 0 {
            bail!("history_capacity must be at least 1");
        }
        if self.reconnect_initial_backoff_ms == 0 {
            bail!("reconnect_initial_backoff_ms must be positive");
        }
        if self.reconnect_initial_backoff() > self.reconnect_max_backoff() {
            bail!(
                "reconnect_initial_backoff_ms ({}) exceeds reconnect_max_backoff_secs ({})",
                self.reconnect_initial_backoff_ms,
                self.reconnect_max_backoff_secs
            );
        }
        Ok(())
    }

    pub fn reconnect_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_backoff_ms)
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_backoff_secs)
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            topic: self.mqtt_topic.clone(),
            client_id: self.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            ..MqttConfig::default()
        }
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            initial_backoff: self.reconnect_initial_backoff(),
            max_backoff: self.reconnect_max_backoff(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_sources(None, env(&[])).unwrap();
        assert_eq!(config.api_port, 5000);
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_topic, "data/sensordata");
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.model_dir.is_none());
        assert_eq!(config.ingestion_config().max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_environment_overrides() {
        let config = ServerConfig::from_sources(
            None,
            env(&[
                ("AQI_API_PORT", "8080"),
                ("AQI_MODEL_DIR", "/srv/model"),
                ("AQI_MQTT_HOST", "broker.local"),
                ("AQI_LOG_FORMAT", "pretty"),
            ]),
        )
        .unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.model_dir, Some(PathBuf::from("/srv/model")));
        assert_eq!(config.mqtt_config().host, "broker.local");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "api_port = 6000\nmqtt_topic = \"sensors/aqi\"").unwrap();

        let config =
            ServerConfig::from_sources(Some(file.path()), env(&[("AQI_API_PORT", "7000")]))
                .unwrap();
        assert_eq!(config.api_port, 7000);
        assert_eq!(config.mqtt_topic, "sensors/aqi");
    }

    #[test]
    fn test_missing_file_is_optional() {
        let config =
            ServerConfig::from_sources(Some(Path::new("/nonexistent/aqi-server.toml")), env(&[]))
                .unwrap();
        assert_eq!(config.api_port, 5000);
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(
            ServerConfig::from_sources(None, env(&[("AQI_HISTORY_CAPACITY", "0")])).is_err()
        );
        assert!(ServerConfig::from_sources(
            None,
            env(&[
                ("AQI_RECONNECT_INITIAL_BACKOFF_MS", "120000"),
                ("AQI_RECONNECT_MAX_BACKOFF_SECS", "60"),
            ])
        )
        .is_err());
        assert!(ServerConfig::from_sources(None, env(&[("AQI_API_PORT", "not-a-port")])).is_err());
    }
}
