//! API client for the AQI prediction server

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Non-success response from the server
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

/// API client for the prediction server
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        request.send().await.context("Failed to send request")
    }

    async fn into_error(response: Response) -> ApiError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // The server answers errors with {"error": ...} or {"message": ...}
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|e| e.error.or(e.message))
            .unwrap_or(body);
        ApiError { status, message }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = Self::send(self.client.get(self.url(path)?)).await?;

        if !response.status().is_success() {
            return Err(Self::into_error(response).await.into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = Self::send(self.client.post(self.url(path)?).json(body)).await?;

        if !response.status().is_success() {
            return Err(Self::into_error(response).await.into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Server health; a 503 still carries a health body
    pub async fn health(&self) -> Result<HealthStatus> {
        let response = Self::send(self.client.get(self.url("health")?)).await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            return Err(Self::into_error(response).await.into());
        }

        response.json().await.context("Failed to parse health response")
    }

    /// Most recent stream prediction, `None` until the first one arrives
    pub async fn latest(&self) -> Result<Option<Prediction>> {
        let response = Self::send(self.client.get(self.url("latest")?)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::into_error(response).await.into());
        }

        response
            .json()
            .await
            .map(Some)
            .context("Failed to parse response")
    }

    pub async fn history(&self, limit: usize) -> Result<History> {
        self.get(&format!("history?limit={}", limit)).await
    }

    pub async fn predict(&self, aqi: f64) -> Result<Prediction> {
        self.post("predict", &PredictRequest { aqi }).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub aqi: f64,
    pub predicted_status: String,
    pub probabilities: BTreeMap<String, f64>,
    pub timestamp: String,
}

impl Prediction {
    /// Probability of the predicted class
    pub fn confidence(&self) -> f64 {
        self.probabilities
            .get(&self.predicted_status)
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub count: usize,
    pub history: Vec<Prediction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub stream_connected: bool,
    pub stream_state: String,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(rename = "AQI")]
    pub aqi: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}
