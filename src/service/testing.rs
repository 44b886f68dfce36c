//! In-memory stand-ins for the orchestrator, the prober and the clock.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use reqwest::StatusCode;

use super::{
    liveness::{LivenessState, Prober},
    monitor::Clock,
    orchestrator::{ContainerState, ContainerStatus, Orchestrator, TransportError},
};

fn injected_failure(what: &str) -> TransportError {
    TransportError::Status {
        status: StatusCode::BAD_GATEWAY,
        body: format!("injected {what} failure"),
    }
}

/// Behaves like a single Docker container: `start` makes it run and `stop`
/// stops it.
pub struct FakeOrchestrator {
    status: Mutex<ContainerStatus>,
    fail_find: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    find_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl FakeOrchestrator {
    pub fn new(status: ContainerStatus) -> Self {
        Self {
            status: Mutex::new(status),
            fail_find: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            find_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_status(&self, status: ContainerStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn status(&self) -> ContainerStatus {
        *self.status.lock().unwrap()
    }

    pub fn fail_next_find(&self) {
        self.fail_find.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn find_container(&self) -> Result<ContainerState, TransportError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_find.swap(false, Ordering::SeqCst) {
            return Err(injected_failure("find"));
        }
        Ok(ContainerState {
            status: self.status(),
            container_name: Some("minecraft".to_string()),
        })
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(injected_failure("start"));
        }
        self.set_status(ContainerStatus::Running);
        Ok(())
    }

    async fn stop(&self, _grace_period_secs: u32) -> Result<(), TransportError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.swap(false, Ordering::SeqCst) {
            return Err(injected_failure("stop"));
        }
        self.set_status(ContainerStatus::Stopped);
        Ok(())
    }
}

pub struct FakeProber {
    state: Mutex<LivenessState>,
}

impl FakeProber {
    pub fn new(state: LivenessState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_players(players: u32) -> Self {
        Self::new(LivenessState {
            online: true,
            active_consumer_count: players,
            max_consumer_count: 20,
            ..Default::default()
        })
    }

    pub fn set(&self, state: LivenessState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_players(&self, players: u32) {
        let mut state = self.state.lock().unwrap();
        state.online = true;
        state.max_consumer_count = 20;
        state.active_consumer_count = players;
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self) -> LivenessState {
        self.state.lock().unwrap().clone()
    }
}

pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
