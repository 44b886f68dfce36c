//! Process configuration.
//!
//! Everything is read once from the environment at start up and frozen into a
//! [`ServerConfig`]. Components receive the parts they need through their
//! constructors and never look at the environment themselves.

use std::{num::NonZeroU64, time::Duration};

use chrono::TimeDelta;

pub const DEFAULT_PORTAINER_URL: &str = "http://localhost:9000";
pub const DEFAULT_ENDPOINT_ID: &str = "2";
pub const DEFAULT_MINECRAFT_HOST: &str = "localhost";
pub const DEFAULT_MINECRAFT_PORT: u16 = 25565;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_INACTIVITY_TIMEOUT_MINUTES: u64 = 15;
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 5;
/// Upper bound for every minute setting (one year).
pub const MAX_MINUTES: u64 = 60 * 24 * 365;

/// Value shipped in the example env file. Treated as unset.
pub const API_KEY_PLACEHOLDER: &str = "your_api_key_here";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub base_url: String,
    pub api_key: String,
    /// Id prefix or name of the managed container. May be empty when only
    /// endpoint discovery is needed.
    pub container_id: String,
    pub endpoint_id: String,
    pub verify_tls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    /// Resolve `_minecraft._tcp.<host>` before connecting.
    pub srv_lookup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub inactivity_timeout_minutes: NonZeroU64,
    pub check_interval_minutes: NonZeroU64,
}

impl MonitorConfig {
    pub fn inactivity_threshold(&self) -> TimeDelta {
        i64::try_from(self.inactivity_timeout_minutes.get())
            .ok()
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.get().saturating_mul(60))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_minutes: NonZeroU64::new(DEFAULT_INACTIVITY_TIMEOUT_MINUTES)
                .unwrap_or(NonZeroU64::MIN),
            check_interval_minutes: NonZeroU64::new(DEFAULT_CHECK_INTERVAL_MINUTES)
                .unwrap_or(NonZeroU64::MIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub orchestrator: OrchestratorConfig,
    pub liveness: LivenessConfig,
    pub monitor: MonitorConfig,
    /// Address players should connect to, shown next to the status.
    pub display_address: Option<String>,
}

fn parse_minutes<F>(
    lookup: &F,
    key: &'static str,
    default: NonZeroU64,
) -> Result<NonZeroU64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let minutes = parse(lookup, key, default)?;
    if minutes.get() > MAX_MINUTES {
        return Err(ConfigError::Invalid {
            key,
            value: minutes.to_string(),
            reason: format!("must be at most {MAX_MINUTES} minutes"),
        });
    }
    Ok(minutes)
}

/// Reads a variable, treating empty values as unset.
fn read<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match read(lookup, key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

impl OrchestratorConfig {
    /// Only the API key is mandatory here. The container id is checked by
    /// [`ServerConfig::from_lookup`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url =
            read(&lookup, "PORTAINER_URL").unwrap_or_else(|| DEFAULT_PORTAINER_URL.to_string());
        if let Err(e) = reqwest::Url::parse(&base_url) {
            return Err(ConfigError::Invalid {
                key: "PORTAINER_URL",
                value: base_url,
                reason: e.to_string(),
            });
        }

        let api_key = read(&lookup, "PORTAINER_API_KEY")
            .filter(|k| k != API_KEY_PLACEHOLDER)
            .ok_or(ConfigError::Missing("PORTAINER_API_KEY"))?;

        // Anything other than an explicit "false" keeps verification on.
        let verify_tls = read(&lookup, "PORTAINER_REJECT_UNAUTHORIZED")
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            container_id: read(&lookup, "PORTAINER_CONTAINER_ID").unwrap_or_default(),
            endpoint_id: read(&lookup, "PORTAINER_ENDPOINT_ID")
                .unwrap_or_else(|| DEFAULT_ENDPOINT_ID.to_string()),
            verify_tls,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl ServerConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let orchestrator = OrchestratorConfig::from_lookup(&lookup)?;
        if orchestrator.container_id.is_empty() {
            return Err(ConfigError::Missing("PORTAINER_CONTAINER_ID"));
        }

        let timeout_ms: u64 = parse(
            &lookup,
            "MINECRAFT_PROBE_TIMEOUT_MS",
            DEFAULT_PROBE_TIMEOUT_MS,
        )?;
        let liveness = LivenessConfig {
            host: read(&lookup, "MINECRAFT_HOST")
                .unwrap_or_else(|| DEFAULT_MINECRAFT_HOST.to_string()),
            port: parse(&lookup, "MINECRAFT_PORT", DEFAULT_MINECRAFT_PORT)?,
            timeout: Duration::from_millis(timeout_ms),
            srv_lookup: parse(&lookup, "MINECRAFT_ENABLE_SRV", true)?,
        };

        let defaults = MonitorConfig::default();
        let monitor = MonitorConfig {
            inactivity_timeout_minutes: parse_minutes(
                &lookup,
                "INACTIVITY_TIMEOUT_MINUTES",
                defaults.inactivity_timeout_minutes,
            )?,
            check_interval_minutes: parse_minutes(
                &lookup,
                "ACTIVITY_CHECK_INTERVAL_MINUTES",
                defaults.check_interval_minutes,
            )?,
        };

        Ok(Self {
            orchestrator,
            liveness,
            monitor,
            display_address: read(&lookup, "SERVER_DISPLAY_ADDRESS"),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}
