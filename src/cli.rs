use std::{net::SocketAddr, path::PathBuf, sync::OnceLock};

use clap::{Parser, Subcommand};

/// Starts a dormant game server on demand and stops it again once nobody plays.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Dotenv file loaded before reading the configuration. Missing files are
    /// ignored.
    #[arg(short, long, default_value = ".env.local")]
    pub env_file: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the status/start HTTP API and run the idle shutdown monitor.
    Serve {
        #[arg(short, long, default_value = "0.0.0.0:3000")]
        listen: SocketAddr,
        /// Only serve the API.
        #[arg(long)]
        no_monitor: bool,
    },
    /// Run the idle shutdown monitor on its own.
    Monitor,
    /// Print the current status as JSON.
    Status,
    /// Start the server unless it is already running.
    Start {
        /// Keep polling until the server answers (up to two minutes).
        #[arg(short, long)]
        wait: bool,
    },
    /// Check configuration and connectivity.
    Verify,
    /// List the Portainer environments visible to the API key.
    Endpoints,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let args = Args::try_parse_from(["dormant", "serve", "--listen", "127.0.0.1:8080"]).unwrap();
        assert_eq!(args.env_file, PathBuf::from(".env.local"));
        match args.command {
            Commands::Serve { listen, no_monitor } => {
                assert_eq!(listen, "127.0.0.1:8080".parse().unwrap());
                assert!(!no_monitor);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_start_wait() {
        let args = Args::try_parse_from(["dormant", "-e", "prod.env", "start", "--wait"]).unwrap();
        assert_eq!(args.env_file, PathBuf::from("prod.env"));
        assert!(matches!(args.command, Commands::Start { wait: true }));
    }
}
