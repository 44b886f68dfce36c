//! Portainer client.
//!
//! Portainer proxies the Docker Engine API under
//! `/api/endpoints/{endpoint}/docker`. This module only needs three calls from
//! it (list, start, stop) plus the endpoint listing used during setup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;

pub const DEFAULT_STOP_GRACE_PERIOD_SECS: u32 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Portainer request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Portainer API error ({status}): {body}")]
    Status { status: StatusCode, body: String },
    #[error("Malformed Portainer response: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Starting,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Starting => "starting",
            ContainerStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl ContainerStatus {
    /// Maps a Docker `State` string onto our vocabulary.
    pub fn from_docker_state(state: &str) -> Self {
        match state {
            "running" => ContainerStatus::Running,
            "exited" | "created" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

impl ContainerState {
    pub fn unknown(container_name: Option<String>) -> Self {
        Self {
            status: ContainerStatus::Unknown,
            container_name,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

/// Subset of the Docker `ContainerSummary` we care about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    state: String,
}

impl ContainerSummary {
    fn matches(&self, target: &str) -> bool {
        self.id.starts_with(target) || self.names.iter().any(|name| name.contains(target))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    pub id: i64,
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: i64,
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
}

impl Endpoint {
    pub fn is_docker(&self) -> bool {
        self.kind == 1
    }
}

/// Run-state source for the managed container.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn find_container(&self) -> Result<ContainerState, TransportError>;
    async fn start(&self) -> Result<(), TransportError>;
    async fn stop(&self, grace_period_secs: u32) -> Result<(), TransportError>;
}

pub struct PortainerClient {
    base_url: String,
    api_key: String,
    container_id: String,
    endpoint_id: String,
    client: Client,
}

impl PortainerClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        log::debug!(
            "Portainer client for {} (endpoint {}, verify TLS: {})",
            config.base_url,
            config.endpoint_id,
            config.verify_tls
        );

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            container_id: config.container_id.clone(),
            endpoint_id: config.endpoint_id.clone(),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api{}", self.base_url, path);
        self.client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
    }

    fn docker_path(&self, path: &str) -> String {
        format!("/endpoints/{}/docker{}", self.endpoint_id, path)
    }

    /// Sends the request and turns any status outside 2xx (and 304, which
    /// Docker uses for "nothing to do") into an error.
    async fn execute(&self, req: RequestBuilder) -> Result<String, TransportError> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            Ok(body)
        } else {
            Err(TransportError::Status { status, body })
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, TransportError> {
        let req = self
            .request(Method::GET, &self.docker_path("/containers/json"))
            .query(&[("all", "true")]);
        let body = self.execute(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Full Docker id of the matched container. The configured identifier is
    /// only a prefix or name fragment, so it cannot go into the URL as is.
    async fn resolve_container_id(&self) -> Result<String, TransportError> {
        let containers = self.list_containers().await?;
        match containers.into_iter().find(|c| c.matches(&self.container_id)) {
            Some(container) => Ok(container.id),
            None => {
                log::warn!(
                    "Container {} not found, addressing it by the configured identifier",
                    self.container_id
                );
                Ok(self.container_id.clone())
            }
        }
    }

    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>, TransportError> {
        let body = self.execute(self.request(Method::GET, "/endpoints")).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Orchestrator for PortainerClient {
    async fn find_container(&self) -> Result<ContainerState, TransportError> {
        let containers = self.list_containers().await.inspect_err(|e| {
            log::error!("Failed to list containers: {e}");
        })?;

        let Some(container) = containers.iter().find(|c| c.matches(&self.container_id)) else {
            log::warn!("Container {} not found", self.container_id);
            return Ok(ContainerState::unknown(Some(self.container_id.clone())));
        };

        let container_name = container
            .names
            .first()
            .map(|name| name.trim_start_matches('/').to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.container_id.clone());

        Ok(ContainerState {
            status: ContainerStatus::from_docker_state(&container.state),
            container_name: Some(container_name),
        })
    }

    async fn start(&self) -> Result<(), TransportError> {
        log::info!("Starting container: {}", self.container_id);
        let result: Result<String, TransportError> = async {
            let id = self.resolve_container_id().await?;
            let path = self.docker_path(&format!("/containers/{id}/start"));
            self.execute(self.request(Method::POST, &path)).await
        }
        .await;

        result.inspect_err(|e| {
            log::error!("Failed to start container {}: {e}", self.container_id);
        })?;

        log::info!("Start command for {} accepted", self.container_id);
        Ok(())
    }

    async fn stop(&self, grace_period_secs: u32) -> Result<(), TransportError> {
        log::info!(
            "Stopping container {} (grace period {grace_period_secs}s)",
            self.container_id
        );
        let result: Result<String, TransportError> = async {
            let id = self.resolve_container_id().await?;
            let path = self.docker_path(&format!("/containers/{id}/stop"));
            let req = self
                .request(Method::POST, &path)
                .query(&[("t", grace_period_secs)]);
            self.execute(req).await
        }
        .await;

        result.inspect_err(|e| {
            log::error!("Failed to stop container {}: {e}", self.container_id);
        })?;

        log::info!("Container {} stopped", self.container_id);
        Ok(())
    }
}
