//! Broker configuration resolution.
//!
//! Options arrive as a partial record (CLI flags, a TOML file, env vars);
//! `BrokerConfig::resolve` overlays them on the defaults. Only fields that
//! are actually set override; everything else keeps its default, and
//! unknown keys in a config file are silently ignored.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::log::LogLevel;
use crate::token::{JoinToken, normalize_path};

/// Default inbound listen port.
pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Partial broker options; `None` keeps the default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrokerOptions {
    /// Join token, `secret@host:port`.
    pub join: Option<String>,
    pub log_level: Option<LogLevel>,
    /// Inbound listen port.
    pub port: Option<u16>,
    /// Inbound base path.
    pub path: Option<String>,
    /// Address advertised to the cluster.
    pub advertise_ip: Option<String>,
}

impl BrokerOptions {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn overlay(self, other: BrokerOptions) -> BrokerOptions {
        BrokerOptions {
            join: other.join.or(self.join),
            log_level: other.log_level.or(self.log_level),
            port: other.port.or(self.port),
            path: other.path.or(self.path),
            advertise_ip: other.advertise_ip.or(self.advertise_ip),
        }
    }
}

/// Fully resolved broker configuration. Immutable once built.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub token: JoinToken,
    pub log_level: LogLevel,
    pub port: u16,
    /// Normalized inbound base path (`""` for root).
    pub path: String,
    pub advertise_ip: String,
}

impl BrokerConfig {
    pub fn resolve(options: BrokerOptions) -> Self {
        Self {
            token: JoinToken::parse(options.join.as_deref().unwrap_or("")),
            log_level: options.log_level.unwrap_or_default(),
            port: options.port.unwrap_or(DEFAULT_PORT),
            path: normalize_path(options.path.as_deref().unwrap_or("/")),
            advertise_ip: options
                .advertise_ip
                .unwrap_or_else(|| "127.0.0.1".to_string()),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::resolve(BrokerOptions::default())
    }
}
