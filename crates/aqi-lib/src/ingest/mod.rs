//! Reading stream ingestion
//!
//! The ingestion loop owns a `Subscription`, turns every payload into a
//! prediction and publishes it into `SharedState`. The MQTT subscription is
//! the production transport; tests drive the loop through an in-memory one.

mod r#loop;
mod mqtt;

#[cfg(test)]
mod tests;

pub use mqtt::{MqttConfig, MqttSubscription};
pub use r#loop::{DropReason, IngestionConfig, IngestionLoop, MessageOutcome};

use crate::error::TransportError;
use crate::models::RawAqi;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload field holding the reading
pub const AQI_FIELD: &str = "AQI";

/// Connection state of the reading stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
}

impl StreamState {
    pub fn is_connected(self) -> bool {
        matches!(self, StreamState::Subscribed | StreamState::Receiving)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Subscribed => "subscribed",
            StreamState::Receiving => "receiving",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of raw reading payloads
#[async_trait]
pub trait Subscription: Send {
    /// Connect and subscribe; called again after every failure
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Wait for the next message payload
    async fn next_payload(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Release the connection
    async fn close(&mut self);
}

/// Extract the AQI value from a JSON payload
pub fn decode_payload(payload: &[u8]) -> Result<RawAqi, DropReason> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| DropReason::Malformed(e.to_string()))?;

    match value.get(AQI_FIELD) {
        Some(serde_json::Value::Null) | None => Err(DropReason::MissingField),
        Some(aqi) => Ok(RawAqi::from_json(aqi)),
    }
}
