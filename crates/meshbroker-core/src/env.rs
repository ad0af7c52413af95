//! Environment and docker-secret resolution for the daemon.
//!
//! Container deployments pass settings either as plain env vars or as
//! docker secrets mounted under `/run/secrets`; both spell the same
//! names (`JOIN`, `SECRET`, `STATE`, `PORT`, `SERVER_PATH`, `LOG_LEVEL`,
//! `ADVERTISE_IP`).

use std::path::Path;

use crate::config::BrokerOptions;
use crate::log::LogLevel;

const SECRETS_DIR: &str = "/run/secrets";

/// Read `name` from the environment, falling back to the docker secret
/// file of the same name. Empty values count as unset.
pub fn env_or_secret(name: &str) -> Option<String> {
    if let Ok(value) = std::env::var(name) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    std::fs::read_to_string(Path::new(SECRETS_DIR).join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Compose a join token from its parts: an explicit `join` wins
/// outright; otherwise `secret@state` is assembled from the two halves.
pub fn compose_join_token(
    join: Option<String>,
    secret: Option<String>,
    state: Option<String>,
) -> Option<String> {
    if join.is_some() {
        return join;
    }
    if secret.is_none() && state.is_none() {
        return None;
    }
    Some(format!(
        "{}@{}",
        secret.unwrap_or_default(),
        state.unwrap_or_default()
    ))
}

/// Broker options drawn from the process environment.
pub fn options_from_env() -> BrokerOptions {
    BrokerOptions {
        join: compose_join_token(
            env_or_secret("JOIN"),
            env_or_secret("SECRET"),
            env_or_secret("STATE"),
        ),
        log_level: env_or_secret("LOG_LEVEL").and_then(|v| LogLevel::from_arg(&v).ok()),
        port: env_or_secret("PORT").and_then(|v| v.parse().ok()),
        path: env_or_secret("SERVER_PATH"),
        advertise_ip: env_or_secret("ADVERTISE_IP"),
    }
}
