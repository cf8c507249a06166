//! HTTP Hosting API
//!
//! Implements HostingApi against the hosting provider's REST API.
//! Every response is wrapped in a `{success, error, data}` envelope.

use crate::domain::entities::ExternalServer;
use crate::domain::errors::SyncError;
use crate::domain::ports::HostingApi;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Default hosting API base URL.
pub const DEFAULT_API_URL: &str = "https://api.exaroton.com/v1";

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    data: Option<T>,
}

/// reqwest-backed hosting API client authenticated with a bearer token.
pub struct HttpHostingApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpHostingApi {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("edge-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// GET an endpoint and unwrap its envelope.
    async fn call<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, SyncError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::RemoteApi(format!("GET {}: {}", path, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::RemoteApi(format!("GET {}: {}", path, e)))?;

        let envelope: ApiEnvelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(SyncError::RemoteApi(format!(
                    "GET {} returned {}: {}",
                    path,
                    status,
                    body.trim()
                )));
            }
            Err(e) => {
                return Err(SyncError::RemoteApi(format!(
                    "GET {}: invalid response: {}",
                    path, e
                )));
            }
        };

        if !status.is_success() || !envelope.success {
            let reason = envelope
                .error
                .unwrap_or_else(|| format!("status {}", status));
            return Err(SyncError::RemoteApi(format!("GET {}: {}", path, reason)));
        }

        Ok(envelope.data)
    }

    async fn lifecycle(&self, server_id: &str, action: &str) -> Result<(), SyncError> {
        self.call::<serde_json::Value>(&format!("servers/{}/{}/", server_id, action))
            .await?;
        tracing::debug!("requested {} of {}", action, server_id);
        Ok(())
    }
}

#[async_trait]
impl HostingApi for HttpHostingApi {
    async fn list_servers(&self) -> Result<Vec<ExternalServer>, SyncError> {
        let servers: Vec<ExternalServer> = self
            .call("servers/")
            .await?
            .ok_or_else(|| SyncError::RemoteApi("GET servers/: response has no data".to_string()))?;
        tracing::debug!("hosting API listed {} servers", servers.len());
        Ok(servers)
    }

    async fn start(&self, server_id: &str) -> Result<(), SyncError> {
        self.lifecycle(server_id, "start").await
    }

    async fn stop(&self, server_id: &str) -> Result<(), SyncError> {
        self.lifecycle(server_id, "stop").await
    }

    async fn restart(&self, server_id: &str) -> Result<(), SyncError> {
        self.lifecycle(server_id, "restart").await
    }
}
