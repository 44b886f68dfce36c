use serde::Serialize;

use super::{
    liveness::{LivenessState, Prober},
    orchestrator::{ContainerState, ContainerStatus, Orchestrator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnifiedStatus {
    Online,
    Offline,
    Starting,
}

impl std::fmt::Display for UnifiedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnifiedStatus::Online => "online",
            UnifiedStatus::Offline => "offline",
            UnifiedStatus::Starting => "starting",
        };
        f.write_str(s)
    }
}

/// Merges the two signals. The container decides whether the process exists,
/// the probe decides whether it is ready. A running container whose server
/// does not answer yet is `Starting`, never `Online` or `Offline`.
pub fn reconcile(container: &ContainerState, liveness: &LivenessState) -> UnifiedStatus {
    match container.status {
        ContainerStatus::Running if liveness.online => UnifiedStatus::Online,
        ContainerStatus::Running | ContainerStatus::Starting => UnifiedStatus::Starting,
        ContainerStatus::Stopped | ContainerStatus::Unknown => UnifiedStatus::Offline,
    }
}

/// Payload served by `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub container: ContainerState,
    pub liveness: LivenessState,
    pub overall_status: UnifiedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    /// Queries both sources concurrently. An orchestrator failure still yields
    /// a renderable report: the container is `Unknown` and `error` carries the
    /// cause.
    pub async fn collect(
        orchestrator: &dyn Orchestrator,
        prober: &dyn Prober,
        display_address: Option<String>,
    ) -> Self {
        let (container, liveness) = tokio::join!(orchestrator.find_container(), prober.probe());

        let (container, error) = match container {
            Ok(container) => (container, None),
            Err(e) => {
                log::error!("Error getting server status: {e}");
                (ContainerState::unknown(None), Some(e.to_string()))
            }
        };

        Self {
            overall_status: reconcile(&container, &liveness),
            container,
            liveness,
            display_address,
            error,
        }
    }
}
