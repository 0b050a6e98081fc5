// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for suro-dispatch.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default number of concurrent executors.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Dispatch configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the optimisation backend API
    pub api_url: String,
    /// API token sent with every backend request
    pub api_token: String,
    /// Number of executors in the worker pool
    pub max_concurrent: usize,
    /// Sleep between executor poll iterations
    pub check_interval: Duration,
    /// One-time delay before an executor starts polling
    pub ramp_up: Duration,
    /// Sleep between remote job status polls
    pub monitor_poll_interval: Duration,
    /// Sleep between readiness checks while waiting to resume runs
    pub resume_poll_interval: Duration,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Directory holding `models/<id>.mod` and `data/<id>.dat`
    pub catalog_dir: PathBuf,
    /// HTTP API listen address
    pub http_addr: SocketAddr,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("SURO_OAAS_API_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SURO_OAAS_API_URL"))?;
        let api_token = std::env::var("SURO_OAAS_API_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("SURO_OAAS_API_TOKEN"))?;

        let max_concurrent =
            parse_max_concurrent(std::env::var("SURO_OAAS_MAX_CONCURRENT").ok().as_deref());

        let check_interval = duration_ms("SURO_EXECUTOR_CHECK_INTERVAL_MS", 5000)?;
        let ramp_up = duration_ms("SURO_EXECUTOR_RAMP_UP_MS", 10_000)?;
        let monitor_poll_interval = duration_ms("SURO_MONITOR_POLL_INTERVAL_MS", 2000)?;
        let resume_poll_interval = duration_ms("SURO_RESUME_POLL_INTERVAL_MS", 2000)?;

        let database_path = PathBuf::from(
            std::env::var("SURO_DATABASE_PATH").unwrap_or_else(|_| ".data/suro.db".to_string()),
        );

        let catalog_dir = PathBuf::from(
            std::env::var("SURO_CATALOG_DIR").unwrap_or_else(|_| ".data/catalog".to_string()),
        );

        let port: u16 = std::env::var("SURO_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        Ok(Self {
            api_url,
            api_token,
            max_concurrent,
            check_interval,
            ramp_up,
            monitor_poll_interval,
            resume_poll_interval,
            database_path,
            catalog_dir,
            http_addr,
        })
    }
}

/// Parse the worker pool size.
///
/// A missing value yields the default silently; an unparsable or zero value
/// yields the default with a warning.
pub fn parse_max_concurrent(raw: Option<&str>) -> usize {
    let Some(raw) = raw else {
        return DEFAULT_MAX_CONCURRENT;
    };

    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            warn!(
                value = raw,
                default = DEFAULT_MAX_CONCURRENT,
                "Invalid max concurrent executor count, using default"
            );
            DEFAULT_MAX_CONCURRENT
        }
    }
}

fn duration_ms(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidDuration(key)),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A millisecond duration could not be parsed.
    #[error("Invalid duration in {0}, expected milliseconds")]
    InvalidDuration(&'static str),
}
