//! HTTP client for the monitor API

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET `path`, failing on any non-2xx status
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.get_with_status::<serde_json::Value>(path).await?;
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, error_message(&body));
        }
        serde_json::from_value(body).context("Failed to parse response")
    }

    /// GET `path` and decode the body whatever the status
    ///
    /// Health endpoints answer 503 with a regular JSON body.
    pub async fn get_with_status<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response ({})", status))?;
        Ok((status, body))
    }
}

fn error_message(body: &serde_json::Value) -> String {
    body.get("error")
        .and_then(|e| e.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollup {
    pub timestamp: String,
    pub avg_left: f64,
    pub avg_right: f64,
    pub avg_temp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub machine_1: Vec<Rollup>,
    pub machine_2: Vec<Rollup>,
}

impl History {
    /// Records tagged with their machine name
    pub fn by_machine(&self) -> impl Iterator<Item = (&'static str, &Rollup)> {
        self.machine_1
            .iter()
            .map(|r| ("machine1", r))
            .chain(self.machine_2.iter().map(|r| ("machine2", r)))
    }

    pub fn is_empty(&self) -> bool {
        self.machine_1.is_empty() && self.machine_2.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub machine_name: String,
    pub score: f64,
    pub threshold: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
