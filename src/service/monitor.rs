//! Idle shutdown.
//!
//! The monitor samples the container and the player count on a fixed period
//! and stops the container once nobody has been online for the configured
//! threshold. The idle clock (`last_active_at`) lives only inside the monitor
//! and is mutated through `&mut self`, so a single task owns it.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::{sync::watch, time::MissedTickBehavior};

use super::{
    liveness::Prober,
    orchestrator::{DEFAULT_STOP_GRACE_PERIOD_SECS, Orchestrator},
};
use crate::config::MonitorConfig;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub inactivity_threshold: TimeDelta,
    pub check_interval: Duration,
    pub stop_grace_period_secs: u32,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            inactivity_threshold: config.inactivity_threshold(),
            check_interval: config.check_interval(),
            stop_grace_period_secs: DEFAULT_STOP_GRACE_PERIOD_SECS,
        }
    }
}

/// What a single tick observed or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NotRunning,
    Active,
    IdleClockStarted,
    Idle(TimeDelta),
    Stopped,
    Failed,
}

pub struct IdleMonitor {
    orchestrator: Arc<dyn Orchestrator>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    last_active_at: Option<DateTime<Utc>>,
}

impl IdleMonitor {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        prober: Arc<dyn Prober>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            orchestrator,
            prober,
            clock,
            settings,
            last_active_at: None,
        }
    }

    #[cfg(test)]
    pub fn last_active_at(&self) -> Option<DateTime<Utc>> {
        self.last_active_at
    }

    /// One observation. Errors abandon the tick and leave the idle clock
    /// exactly as it was.
    pub async fn tick(&mut self) -> TickOutcome {
        let container = match self.orchestrator.find_container().await {
            Ok(container) => container,
            Err(e) => {
                log::error!("Error in monitoring loop: {e}");
                return TickOutcome::Failed;
            }
        };

        if !container.is_running() {
            log::info!(
                "Container is {}, skipping activity check",
                container.status
            );
            self.last_active_at = None;
            return TickOutcome::NotRunning;
        }

        if self.prober.has_active_consumers().await {
            log::info!("Players are active, resetting inactivity timer");
            self.last_active_at = Some(self.clock.now());
            return TickOutcome::Active;
        }

        let Some(last_active_at) = self.last_active_at else {
            log::info!("No players detected, starting inactivity timer");
            self.last_active_at = Some(self.clock.now());
            return TickOutcome::IdleClockStarted;
        };

        let idle = self.clock.now() - last_active_at;
        log::info!(
            "Server has been empty for {} minutes (threshold: {} minutes)",
            idle.num_minutes(),
            self.settings.inactivity_threshold.num_minutes()
        );

        if idle < self.settings.inactivity_threshold {
            return TickOutcome::Idle(idle);
        }

        log::warn!("Inactivity threshold reached! Shutting down container...");
        if let Err(e) = self
            .orchestrator
            .stop(self.settings.stop_grace_period_secs)
            .await
        {
            // The clock is kept, so the next tick is still past the
            // threshold and tries again.
            log::error!("Error in monitoring loop: {e}");
            return TickOutcome::Failed;
        }

        log::info!("Container shutdown successful");
        self.last_active_at = None;
        TickOutcome::Stopped
    }

    /// Ticks immediately and then every `check_interval` until `shutdown`
    /// flips to `true`. Shutdown is only looked at between ticks, so an
    /// in-flight stop always completes. Fires missed while a slow tick runs
    /// are dropped rather than queued.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!("=== Auto-Shutdown Monitor Started ===");
        log::info!(
            "Inactivity timeout: {} minutes",
            self.settings.inactivity_threshold.num_minutes()
        );
        log::info!("Check interval: {:?}", self.settings.check_interval);

        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.tick().await {
                TickOutcome::Idle(idle) => {
                    log::debug!("Monitor tick finished, idle for {}s", idle.num_seconds())
                }
                outcome => log::debug!("Monitor tick finished: {outcome:?}"),
            }
        }

        log::info!("Auto-shutdown monitor stopped");
    }
}
