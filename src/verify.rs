//! `dormant verify`: walks through the configuration and both external
//! services and prints what it finds.

use std::process::ExitCode;

use crate::{
    config::{API_KEY_PLACEHOLDER, ServerConfig},
    service::{
        liveness::SlpProber,
        orchestrator::{ContainerStatus, Orchestrator, PortainerClient},
    },
};

const REQUIRED_VARS: [&str; 5] = [
    "PORTAINER_URL",
    "PORTAINER_API_KEY",
    "PORTAINER_CONTAINER_ID",
    "MINECRAFT_HOST",
    "MINECRAFT_PORT",
];

fn header(text: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{text}");
    println!("{}", "=".repeat(60));
}

fn ok(text: &str) {
    println!("  [ok]   {text}");
}

fn fail(text: &str) {
    println!("  [fail] {text}");
}

fn warn(text: &str) {
    println!("  [warn] {text}");
}

fn info(text: &str) {
    println!("  [info] {text}");
}

/// Returns the loaded configuration when every required variable is present
/// and valid.
fn check_environment<F>(lookup: F) -> Option<ServerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    header("1. Checking Environment Variables");

    let mut all_present = true;
    for var in REQUIRED_VARS {
        match lookup(var) {
            Some(value) if !value.trim().is_empty() && value != API_KEY_PLACEHOLDER => {
                ok(&format!("{var} is set"))
            }
            _ => {
                fail(&format!("{var} is not set or has default value"));
                all_present = false;
            }
        }
    }

    match ServerConfig::from_lookup(&lookup) {
        Ok(config) if all_present => {
            ok("All required environment variables are set");
            Some(config)
        }
        Ok(_) => {
            fail("Some required environment variables are missing");
            info("Defaults would be used for the missing values");
            None
        }
        Err(e) => {
            fail(&format!("Configuration is invalid: {e}"));
            None
        }
    }
}

async fn check_orchestrator(client: &PortainerClient, config: &ServerConfig) -> bool {
    header("2. Testing Portainer Connection");

    match client.find_container().await {
        Ok(state) if state.status == ContainerStatus::Unknown => {
            fail(&format!(
                "Container '{}' not found in Portainer (or in an unrecognized state)",
                config.orchestrator.container_id
            ));
            info("Check PORTAINER_CONTAINER_ID and PORTAINER_ENDPOINT_ID (see `dormant endpoints`)");
            false
        }
        Ok(state) => {
            ok(&format!(
                "Connected successfully. Container status: {}",
                state.status
            ));
            true
        }
        Err(e) => {
            fail(&format!("Connection failed: {e}"));
            false
        }
    }
}

async fn check_container(client: &PortainerClient) {
    header("3. Checking Container Status");

    match client.find_container().await {
        Ok(state) => {
            info(&format!(
                "Container: {}",
                state.container_name.as_deref().unwrap_or("Unknown")
            ));
            info(&format!("Status: {}", state.status));
            match state.status {
                ContainerStatus::Running => ok("Container is currently running"),
                ContainerStatus::Stopped => {
                    warn("Container is currently stopped");
                    info("This is normal if the server is not in use");
                }
                other => warn(&format!("Container status is: {other}")),
            }
        }
        Err(e) => fail(&format!("Failed to check container status: {e}")),
    }
}

async fn check_liveness(config: &ServerConfig) {
    header("4. Checking Minecraft Server");
    info(&format!(
        "Querying {}:{} (timeout {:?})...",
        config.liveness.host, config.liveness.port, config.liveness.timeout
    ));

    match SlpProber::new(&config.liveness).query().await {
        Ok(state) => {
            ok("Minecraft server is online and responding");
            info(&format!(
                "Players online: {}/{}",
                state.active_consumer_count, state.max_consumer_count
            ));
            info(&format!(
                "Version: {}",
                state.protocol_version.as_deref().unwrap_or("Unknown")
            ));
            if let Some(motd) = &state.announcement {
                info(&format!("MOTD: {motd}"));
            }
        }
        Err(e) => {
            warn(&format!("Minecraft server is not responding: {e}"));
            info("This is normal if the container is stopped or starting up");
        }
    }
}

pub async fn run() -> ExitCode {
    println!("\nSetup verification");

    let Some(config) = check_environment(|key| std::env::var(key).ok()) else {
        info("Skipping remaining checks due to missing environment variables");
        return ExitCode::FAILURE;
    };

    let client = match PortainerClient::new(&config.orchestrator) {
        Ok(client) => client,
        Err(e) => {
            fail(&format!("Unable to build the Portainer client: {e}"));
            return ExitCode::FAILURE;
        }
    };

    let orchestrator_ok = check_orchestrator(&client, &config).await;
    if orchestrator_ok {
        check_container(&client).await;
    } else {
        warn("Portainer connection failed, skipping container checks");
    }

    check_liveness(&config).await;

    header("Setup Verification Summary");
    if orchestrator_ok {
        info("Setup is ready. Start the API with `dormant serve`.");
        ExitCode::SUCCESS
    } else {
        info("Fix the failures above and run `dormant verify` again.");
        ExitCode::FAILURE
    }
}
