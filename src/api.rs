use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch};

use crate::service::{
    liveness::Prober,
    orchestrator::Orchestrator,
    startup::{StartResult, Startup},
    status::StatusReport,
};

const NO_STORE: &str = "no-store, no-cache, must-revalidate";

/// State shared across axum handlers.
pub struct AppState {
    orchestrator: Arc<dyn Orchestrator>,
    prober: Arc<dyn Prober>,
    startup: Startup,
    display_address: Option<String>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        prober: Arc<dyn Prober>,
        display_address: Option<String>,
    ) -> Self {
        Self {
            startup: Startup::new(orchestrator.clone(), prober.clone()),
            orchestrator,
            prober,
            display_address,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum StartStatus {
    Running,
    Starting,
    Error,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    success: bool,
    message: String,
    status: StartStatus,
}

fn start_response(result: StartResult) -> (StatusCode, StartResponse) {
    match result {
        StartResult::AlreadyRunning => (
            StatusCode::OK,
            StartResponse {
                success: true,
                message: "Container is already running".to_string(),
                status: StartStatus::Running,
            },
        ),
        StartResult::StartInitiated => (
            StatusCode::OK,
            StartResponse {
                success: true,
                message: "Container start command sent successfully".to_string(),
                status: StartStatus::Starting,
            },
        ),
        StartResult::Failed(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            StartResponse {
                success: false,
                message,
                status: StartStatus::Error,
            },
        ),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/start", post(start_server))
        .with_state(state)
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .inspect_err(|e| log::error!("Unable to listen on {addr}: {e}"))
}

/// Serves the API until `shutdown` flips to `true`. In-flight requests are
/// allowed to finish.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    log::info!("Starting HTTP API on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            log::info!("HTTP API shutting down");
        })
        .await
}

/// Handler for `GET /status`. Always answers with a full payload; an
/// orchestrator failure turns it into a 500 with `error` set.
async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = StatusReport::collect(
        state.orchestrator.as_ref(),
        state.prober.as_ref(),
        state.display_address.clone(),
    )
    .await;

    let code = match report.error {
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
        None => StatusCode::OK,
    };
    (code, [(header::CACHE_CONTROL, NO_STORE)], Json(report))
}

/// Handler for `POST /start`.
async fn start_server(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.startup.ensure_started().await;
    if let StartResult::Failed(reason) = &result {
        log::error!("Error starting container: {reason}");
    }
    let (code, body) = start_response(result);
    (code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{
        liveness::LivenessState,
        orchestrator::ContainerStatus,
        testing::{FakeOrchestrator, FakeProber},
    };
    use serde_json::Value;

    async fn spawn_api(orchestrator: Arc<FakeOrchestrator>, prober: Arc<FakeProber>) -> String {
        let state = Arc::new(AppState::new(
            orchestrator,
            prober,
            Some("play.example.com".to_string()),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_status_for_busy_server() {
        let orchestrator = Arc::new(FakeOrchestrator::new(ContainerStatus::Running));
        let prober = Arc::new(FakeProber::with_players(3));
        let base = spawn_api(orchestrator, prober).await;

        let response = reqwest::get(format!("{base}/status")).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CACHE_CONTROL],
            NO_STORE
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["overallStatus"], "online");
        assert_eq!(body["liveness"]["online"], true);
        assert_eq!(body["liveness"]["activeConsumerCount"], 3);
        assert_eq!(body["displayAddress"], "play.example.com");
    }

    #[tokio::test]
    async fn test_status_degrades_with_error_field() {
        let orchestrator = Arc::new(FakeOrchestrator::new(ContainerStatus::Running));
        orchestrator.fail_next_find();
        let prober = Arc::new(FakeProber::new(LivenessState::offline()));
        let base = spawn_api(orchestrator, prober).await;

        let response = reqwest::get(format!("{base}/status")).await.unwrap();

        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["overallStatus"], "offline");
        assert_eq!(body["container"]["status"], "unknown");
        assert_eq!(body["liveness"]["online"], false);
        assert!(body["error"].as_str().unwrap().contains("injected find failure"));
    }

    #[tokio::test]
    async fn test_start_stopped_container() {
        let orchestrator = Arc::new(FakeOrchestrator::new(ContainerStatus::Stopped));
        let prober = Arc::new(FakeProber::new(LivenessState::offline()));
        let base = spawn_api(orchestrator.clone(), prober).await;
        let client = reqwest::Client::new();

        let status: Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["overallStatus"], "offline");

        let response = client.post(format!("{base}/start")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "starting");

        // Container runs now, server has not answered yet.
        let status: Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["overallStatus"], "starting");

        let body: Value = client
            .post(format!("{base}/start"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "running");
        assert_eq!(orchestrator.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_start_failure() {
        let orchestrator = Arc::new(FakeOrchestrator::new(ContainerStatus::Stopped));
        orchestrator.fail_next_start();
        let prober = Arc::new(FakeProber::new(LivenessState::offline()));
        let base = spawn_api(orchestrator, prober).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/start"))
            .send()
            .await
            .unwrap();

        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("injected start failure"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let state = Arc::new(AppState::new(
            Arc::new(FakeOrchestrator::new(ContainerStatus::Stopped)),
            Arc::new(FakeProber::new(LivenessState::offline())),
            None,
        ));
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(serve(listener, state, rx));

        tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server stops")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_fails_on_taken_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        assert!(bind(addr).await.is_err());
    }
}
