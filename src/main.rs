use std::{path::Path, process::ExitCode, sync::Arc};

use cli::Commands;
use config::{OrchestratorConfig, ServerConfig};
use service::{
    liveness::{Prober, SlpProber},
    monitor::{IdleMonitor, MonitorSettings, SystemClock},
    orchestrator::{Orchestrator, PortainerClient},
    startup::{READY_GIVE_UP_AFTER, READY_POLL_INTERVAL, StartResult, Startup},
    status::{StatusReport, UnifiedStatus},
};
use tokio::sync::watch;

mod api;
mod cli;
mod config;
mod service;
mod signals;
mod verify;

fn load_env_file(path: &Path) {
    match dotenv::from_path(path) {
        Ok(()) => log::debug!("Loaded environment from {path:?}"),
        Err(dotenv::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No env file at {path:?}, using the process environment")
        }
        Err(e) => log::warn!("Unable to read env file {path:?}: {e}"),
    }
}

struct Clients {
    orchestrator: Arc<dyn Orchestrator>,
    prober: Arc<dyn Prober>,
}

impl Clients {
    fn try_init(config: &ServerConfig) -> Result<Self, service::orchestrator::TransportError> {
        Ok(Self {
            orchestrator: Arc::new(PortainerClient::new(&config.orchestrator)?),
            prober: Arc::new(SlpProber::new(&config.liveness)),
        })
    }

    fn monitor(&self, config: &ServerConfig) -> IdleMonitor {
        IdleMonitor::new(
            self.orchestrator.clone(),
            self.prober.clone(),
            Arc::new(SystemClock),
            MonitorSettings::from(&config.monitor),
        )
    }
}

async fn serve(
    config: &ServerConfig,
    clients: Clients,
    listen: std::net::SocketAddr,
    with_monitor: bool,
) -> ExitCode {
    let (shutdown_tx, _) = watch::channel(false);
    if let Err(e) = signals::handle_shutdown(shutdown_tx.clone()) {
        log::error!("Unable to install signal handlers: {e}");
        return ExitCode::FAILURE;
    }

    match run_server(config, clients, listen, with_monitor, shutdown_tx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("HTTP API failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the API and, optionally, the idle monitor until `shutdown` flips.
/// The listener is bound before anything else starts, and whenever the API
/// returns the monitor is told to stop as well.
async fn run_server(
    config: &ServerConfig,
    clients: Clients,
    listen: std::net::SocketAddr,
    with_monitor: bool,
    shutdown: watch::Sender<bool>,
) -> std::io::Result<()> {
    let listener = api::bind(listen).await?;

    let monitor = with_monitor.then(|| {
        let monitor = clients.monitor(config);
        tokio::spawn(monitor.run(shutdown.subscribe()))
    });

    let state = Arc::new(api::AppState::new(
        clients.orchestrator,
        clients.prober,
        config.display_address.clone(),
    ));
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    let served = api::serve(listener, state, shutdown.subscribe()).await;
    shutdown.send_replace(true);

    if let Some(monitor) = monitor {
        if let Err(e) = monitor.await {
            log::error!("Monitor task failed: {e}");
        }
    }

    served
}

async fn monitor(config: &ServerConfig, clients: Clients) -> ExitCode {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = signals::handle_shutdown(shutdown_tx) {
        log::error!("Unable to install signal handlers: {e}");
        return ExitCode::FAILURE;
    }
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    clients.monitor(config).run(shutdown_rx).await;
    ExitCode::SUCCESS
}

async fn status(config: &ServerConfig, clients: Clients) -> ExitCode {
    let report = StatusReport::collect(
        clients.orchestrator.as_ref(),
        clients.prober.as_ref(),
        config.display_address.clone(),
    )
    .await;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            log::error!("Unable to encode status: {e}");
            return ExitCode::FAILURE;
        }
    }

    if report.error.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn start(clients: Clients, wait: bool) -> ExitCode {
    let startup = Startup::new(clients.orchestrator, clients.prober);

    match startup.ensure_started().await {
        StartResult::AlreadyRunning => println!("Container is already running"),
        StartResult::StartInitiated => println!("Container start command sent successfully"),
        StartResult::Failed(reason) => {
            eprintln!("Failed to start container: {reason}");
            return ExitCode::FAILURE;
        }
    }

    if !wait {
        return ExitCode::SUCCESS;
    }

    match startup
        .wait_until_ready(READY_POLL_INTERVAL, READY_GIVE_UP_AFTER)
        .await
    {
        UnifiedStatus::Online => {
            println!("Server is online");
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("Server is still {other}; the start continues in the background");
            ExitCode::FAILURE
        }
    }
}

async fn endpoints() -> ExitCode {
    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let endpoints = match PortainerClient::new(&config) {
        Ok(client) => client.list_endpoints().await,
        Err(e) => Err(e),
    };
    let endpoints = match endpoints {
        Ok(endpoints) => endpoints,
        Err(e) => {
            eprintln!("Error fetching endpoints: {e}");
            return ExitCode::FAILURE;
        }
    };

    if endpoints.is_empty() {
        println!("No endpoints found in Portainer");
        return ExitCode::SUCCESS;
    }

    for endpoint in &endpoints {
        println!("ID: {}", endpoint.id);
        println!("  Name: {}", endpoint.name);
        println!(
            "  Type: {}",
            if endpoint.is_docker() { "Docker" } else { "Other" }
        );
        println!(
            "  URL: {}",
            endpoint.url.as_deref().filter(|u| !u.is_empty()).unwrap_or("N/A")
        );
    }

    if let Some(docker) = endpoints.iter().find(|e| e.is_docker()) {
        println!(
            "\nRecommended: PORTAINER_ENDPOINT_ID={} ({})",
            docker.id, docker.name
        );
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::get_cli_args();
    load_env_file(&args.env_file);

    let command = match &args.command {
        Commands::Verify => return verify::run().await,
        Commands::Endpoints => return endpoints().await,
        command => command.clone(),
    };

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let clients = match Clients::try_init(&config) {
        Ok(clients) => clients,
        Err(e) => {
            log::error!("Unable to create the Portainer client: {e}");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Commands::Serve { listen, no_monitor } => serve(&config, clients, listen, !no_monitor).await,
        Commands::Monitor => monitor(&config, clients).await,
        Commands::Status => status(&config, clients).await,
        Commands::Start { wait } => start(clients, wait).await,
        Commands::Verify | Commands::Endpoints => unreachable!("handled before loading config"),
    }
}
