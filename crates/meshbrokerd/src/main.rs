//! meshbrokerd — the broker daemon.
//!
//! Resolves configuration from CLI flags, an optional TOML file, and
//! the environment (including docker secrets), then listens for client
//! connections and joins the cluster. Exits non-zero when the initial
//! listen-and-join sequence fails.
//!
//! # Usage
//!
//! ```text
//! meshbrokerd --join s3cret@state:7777 --port 8888
//! SECRET=s3cret STATE=state:7777 meshbrokerd
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use meshbroker_cluster::Broker;
use meshbroker_core::{BrokerConfig, BrokerOptions, LogLevel, env as broker_env};

#[derive(Parser)]
#[command(name = "meshbrokerd", about = "meshbroker daemon")]
struct Cli {
    /// Join token, `secret@host:port`.
    #[arg(long)]
    join: Option<String>,

    /// Cluster secret; combined with --state when --join is not given.
    #[arg(long)]
    secret: Option<String>,

    /// State node address; combined with --secret when --join is not given.
    #[arg(long)]
    state: Option<String>,

    /// Inbound listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Inbound base path.
    #[arg(long)]
    path: Option<String>,

    /// Log level: nothing, errors, errors-and-warnings, everything (or 0-3).
    #[arg(long, value_parser = LogLevel::from_arg)]
    log_level: Option<LogLevel>,

    /// Address advertised to the cluster.
    #[arg(long)]
    advertise_ip: Option<String>,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_options(self) -> BrokerOptions {
        BrokerOptions {
            join: broker_env::compose_join_token(self.join, self.secret, self.state),
            log_level: self.log_level,
            port: self.port,
            path: self.path,
            advertise_ip: self.advertise_ip,
        }
    }
}

/// Flags override the environment, which overrides the config file.
fn resolve_config(cli: Cli) -> anyhow::Result<BrokerConfig> {
    let file = match &cli.config {
        Some(path) => BrokerOptions::from_file(path)?,
        None => BrokerOptions::default(),
    };
    let options = file
        .overlay(broker_env::options_from_env())
        .overlay(cli.into_options());
    Ok(BrokerConfig::resolve(options))
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.filter_str())),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(cli)?;
    init_tracing(config.log_level);

    let broker = Broker::new(config);
    if let Err(e) = broker.listen_and_join().await {
        error!(error = %e, "the broker could not launch");
        std::process::exit(1);
    }

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
    broker.terminate().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_compose_a_join_token() {
        let cli = Cli::parse_from(["meshbrokerd", "--secret", "s", "--state", "host:1"]);
        let options = cli.into_options();
        assert_eq!(options.join.as_deref(), Some("s@host:1"));
    }

    #[test]
    fn explicit_join_flag_wins_over_the_parts() {
        let cli = Cli::parse_from([
            "meshbrokerd",
            "--join",
            "j@host:1",
            "--secret",
            "ignored",
        ]);
        let options = cli.into_options();
        assert_eq!(options.join.as_deref(), Some("j@host:1"));
    }

    #[test]
    fn log_level_accepts_numeric_form() {
        let cli = Cli::parse_from(["meshbrokerd", "--log-level", "1"]);
        assert_eq!(cli.log_level, Some(LogLevel::Errors));
    }
}
