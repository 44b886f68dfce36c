use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use super::{
    liveness::Prober,
    orchestrator::Orchestrator,
    status::{UnifiedStatus, reconcile},
};

/// Cadence used by callers that want to follow a start until the server is
/// ready.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const READY_GIVE_UP_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartResult {
    AlreadyRunning,
    StartInitiated,
    Failed(String),
}

pub struct Startup {
    orchestrator: Arc<dyn Orchestrator>,
    prober: Arc<dyn Prober>,
}

impl Startup {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, prober: Arc<dyn Prober>) -> Self {
        Self {
            orchestrator,
            prober,
        }
    }

    /// Requests a start unless the container already runs. Returns as soon as
    /// the orchestrator accepted the command; it does not wait for the server
    /// to come up. Failures are reported, never retried.
    pub async fn ensure_started(&self) -> StartResult {
        match self.orchestrator.find_container().await {
            Ok(state) if state.is_running() => {
                log::info!("Container is already running, not starting it again");
                return StartResult::AlreadyRunning;
            }
            Ok(state) => log::info!("Container is {}, sending start command", state.status),
            Err(e) => return StartResult::Failed(e.to_string()),
        }

        match self.orchestrator.start().await {
            Ok(()) => StartResult::StartInitiated,
            Err(e) => StartResult::Failed(e.to_string()),
        }
    }

    /// Polls fresh snapshots every `poll_every` until the server is `Online`
    /// or `give_up_after` elapsed, and returns the last status seen. Giving up
    /// leaves the start in progress.
    pub async fn wait_until_ready(
        &self,
        poll_every: Duration,
        give_up_after: Duration,
    ) -> UnifiedStatus {
        let deadline = Instant::now() + give_up_after;
        loop {
            let status = self.current_status().await;
            if status == UnifiedStatus::Online {
                return status;
            }
            if Instant::now() + poll_every > deadline {
                log::warn!("Server still {status} after {give_up_after:?}, no longer waiting");
                return status;
            }
            log::debug!("Server is {status}, checking again in {poll_every:?}");
            tokio::time::sleep(poll_every).await;
        }
    }

    async fn current_status(&self) -> UnifiedStatus {
        let (container, liveness) =
            tokio::join!(self.orchestrator.find_container(), self.prober.probe());
        match container {
            Ok(container) => reconcile(&container, &liveness),
            Err(e) => {
                log::warn!("Could not read container state while waiting: {e}");
                UnifiedStatus::Offline
            }
        }
    }
}
