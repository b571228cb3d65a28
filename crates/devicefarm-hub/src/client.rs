//! HTTP client for the hub's device inventory endpoint

use async_trait::async_trait;
use devicefarm_core::DeviceDelta;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Path of the hub inventory endpoint, relative to the hub URL
pub const DEVICES_ENDPOINT: &str = "/devices";

#[derive(Error, Debug)]
pub enum HubError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Hub unreachable: {0}")]
    Unreachable(String),
    #[error("Hub rejected {action} delta ({status}): {message}")]
    Rejected {
        action: &'static str,
        status: u16,
        message: String,
    },
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),
}

/// Destination for inventory deltas
#[async_trait]
pub trait InventorySink: Send + Sync {
    /// Send one batched delta
    async fn post_delta(&self, delta: &DeviceDelta) -> Result<(), HubError>;
}

/// Pushes inventory deltas to a hub over HTTP
#[derive(Debug, Clone)]
pub struct HubSyncClient {
    http: reqwest::Client,
    base_url: String,
}

impl HubSyncClient {
    /// Create a client for the hub at `url`
    pub fn new(url: &str, timeout: Duration) -> Result<Self, HubError> {
        let base_url = url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(HubError::InvalidUrl("URL cannot be empty".into()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(HubError::InvalidUrl(format!(
                "{} must start with http:// or https://",
                base_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(format!("devicefarm-node/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of the inventory endpoint
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, DEVICES_ENDPOINT)
    }
}

#[async_trait]
impl InventorySink for HubSyncClient {
    async fn post_delta(&self, delta: &DeviceDelta) -> Result<(), HubError> {
        if delta.is_empty() {
            return Ok(());
        }

        let action = delta.action().as_str();
        let request = self
            .http
            .post(self.endpoint())
            .query(&[("action", action)]);
        let request = match delta {
            DeviceDelta::Add(add) => request.json(add),
            DeviceDelta::Remove(remove) => request.json(remove),
        };

        debug!(url = %self.endpoint(), action, count = delta.len(), "Pushing inventory delta");

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                HubError::Unreachable(e.to_string())
            } else {
                HubError::Request(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HubError::Rejected {
                action,
                status: status.as_u16(),
                message,
            });
        }

        info!(action, count = delta.len(), "Hub accepted inventory delta");
        Ok(())
    }
}
