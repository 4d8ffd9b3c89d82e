//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::entities::SimulationParams;
use crate::game::truth::TruthConfig;
use crate::game::LifecycleConfig;
use crate::util::time::TICK_DURATION_MS;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS; `None` allows any origin
    pub client_origin: Option<String>,

    /// Minimum gap between processed ticks
    pub tick_ms: u64,
    pub match_max_duration: Duration,
    pub start_grace: Duration,
    pub reconnect_grace: Duration,
    pub reconnect_allowance: u32,
    pub win_score: u8,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT; fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").filter(|origin| !origin.is_empty()),

            tick_ms: parse_or(&lookup, "TICK_MS", TICK_DURATION_MS)?,
            match_max_duration: Duration::from_secs(parse_or(
                &lookup,
                "MATCH_MAX_DURATION_SECS",
                300,
            )?),
            start_grace: Duration::from_secs(parse_or(&lookup, "START_GRACE_SECS", 20)?),
            reconnect_grace: Duration::from_secs(parse_or(&lookup, "RECONNECT_GRACE_SECS", 10)?),
            reconnect_allowance: parse_or(&lookup, "RECONNECT_ALLOWANCE", 3)?,
            win_score: parse_or(&lookup, "WIN_SCORE", 5)?,
        };

        if config.tick_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "TICK_MS",
                value: "0".to_string(),
            });
        }
        if config.win_score == 0 {
            return Err(ConfigError::Invalid {
                key: "WIN_SCORE",
                value: "0".to_string(),
            });
        }

        Ok(config)
    }

    /// Lifecycle tuning for every match created by this server
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let defaults = LifecycleConfig::default();
        LifecycleConfig {
            start_grace: self.start_grace,
            reconnect_grace: self.reconnect_grace,
            reconnect_allowance: self.reconnect_allowance,
            win_score: self.win_score,
            truth: TruthConfig {
                tick_ms: self.tick_ms,
                max_duration_ms: self.match_max_duration.as_millis() as u64,
                ..TruthConfig::default()
            },
            params: SimulationParams::default(),
            ..defaults
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}
