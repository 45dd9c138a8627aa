//! Operator configuration module
//!
//! Command-line flags cover the manager surface (probe/metrics addresses,
//! leader election); everything that shapes reconciliation itself comes from
//! environment variables with defaults. `DATABASE_URL` is the one required
//! value and its absence is a startup-fatal error.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Manager flags, mirroring the conventional controller-manager surface.
/// None of these affect reconciliation semantics.
#[derive(Parser, Debug, Clone)]
#[command(name = "postgres-operator", about = "PostgreSQL table operator")]
pub struct ControllerArgs {
    /// The address the metric endpoint binds to (reserved).
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: SocketAddr,

    /// The address the health probe endpoint binds to.
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,

    /// Enable leader election for the controller manager. Enabling this
    /// ensures there is only one active controller manager; the election
    /// itself is provided by the deployment environment.
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,
}

/// Database connection and pool tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_pool_size: usize,
    pub pool_wait_timeout: Duration,
    pub statement_timeout: Duration,
}

/// Requeue and backoff tuning for the reconciler.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay after a transient failure.
    pub base: Duration,
    /// Upper bound for the exponential schedule.
    pub cap: Duration,
    /// Fixed requeue interval for specs that cannot be translated; retrying
    /// sooner cannot succeed without a spec edit.
    pub invalid_spec_requeue: Duration,
    /// Periodic resync on success, healing external drift the watch layer
    /// cannot see.
    pub resync: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(300),
            invalid_spec_requeue: Duration::from_secs(600),
            resync: Duration::from_secs(300),
        }
    }
}

/// Complete operator settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub backoff: BackoffConfig,
}

impl Settings {
    /// Load settings from environment variables (and `.env` if present).
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let database = DatabaseConfig {
            url,
            max_pool_size: env_parse("DB_MAX_CONNECTIONS", 10)?,
            pool_wait_timeout: Duration::from_secs(env_parse("DB_POOL_WAIT_TIMEOUT_SECS", 5)?),
            statement_timeout: Duration::from_secs(env_parse("DB_STATEMENT_TIMEOUT_SECS", 10)?),
        };

        let defaults = BackoffConfig::default();
        let backoff = BackoffConfig {
            base: Duration::from_secs(env_parse(
                "RECONCILE_BACKOFF_BASE_SECS",
                defaults.base.as_secs(),
            )?),
            cap: Duration::from_secs(env_parse(
                "RECONCILE_BACKOFF_CAP_SECS",
                defaults.cap.as_secs(),
            )?),
            invalid_spec_requeue: Duration::from_secs(env_parse(
                "RECONCILE_INVALID_SPEC_REQUEUE_SECS",
                defaults.invalid_spec_requeue.as_secs(),
            )?),
            resync: Duration::from_secs(env_parse(
                "RECONCILE_RESYNC_SECS",
                defaults.resync.as_secs(),
            )?),
        };

        Ok(Self { database, backoff })
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{var}={raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_backoff_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.base, Duration::from_secs(5));
        assert_eq!(config.cap, Duration::from_secs(300));
        assert!(config.invalid_spec_requeue > config.cap);
    }

    #[test]
    fn controller_args_defaults() {
        let args = ControllerArgs::parse_from(["postgres-operator"]);
        assert_eq!(args.health_probe_bind_address.port(), 8081);
        assert_eq!(args.metrics_bind_address.port(), 8080);
        assert!(!args.leader_elect);
    }

    #[test]
    fn controller_args_flags_override_defaults() {
        let args = ControllerArgs::parse_from([
            "postgres-operator",
            "--leader-elect",
            "--health-probe-bind-address",
            "127.0.0.1:9999",
        ]);
        assert!(args.leader_elect);
        assert_eq!(args.health_probe_bind_address.port(), 9999);
    }
}
