//! Process configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use hazrisk_core::execution::{ExecutionMode, LogLevel};
use hazrisk_engine::supervisor::{
    DEFAULT_CONCURRENCY, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
use hazrisk_engine::{OrchestratorConfig, SupervisorConfig};

const DEFAULT_DATABASE_URL: &str = "sqlite://hazrisk.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_OWNER: &str = "hazrisk";

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Work units executing at once in distributed mode.
    pub concurrency: usize,
    pub heartbeat_timeout: Duration,
    pub poll_interval: Duration,
    pub mode: ExecutionMode,
    /// Recorded as the owner of everything this process creates.
    pub owner: String,
}

impl CliConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default               |
    /// |----------------------------------|-----------------------|
    /// | `DATABASE_URL`                   | `sqlite://hazrisk.db` |
    /// | `HAZRISK_MAX_CONNECTIONS`        | `5`                   |
    /// | `HAZRISK_CONCURRENCY`            | `4`                   |
    /// | `HAZRISK_HEARTBEAT_TIMEOUT_SECS` | `60`                  |
    /// | `HAZRISK_POLL_INTERVAL_MS`       | `500`                 |
    /// | `HAZRISK_NO_DISTRIBUTE`          | `false`               |
    /// | `HAZRISK_OWNER`, then `USER`     | `hazrisk`             |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let max_connections = parse_var(&lookup, "HAZRISK_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let concurrency = parse_var(&lookup, "HAZRISK_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(anyhow!("HAZRISK_CONCURRENCY must be at least 1"));
        }
        let heartbeat_secs = parse_var(
            &lookup,
            "HAZRISK_HEARTBEAT_TIMEOUT_SECS",
            DEFAULT_HEARTBEAT_TIMEOUT.as_secs(),
        )?;
        let poll_ms = parse_var(
            &lookup,
            "HAZRISK_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        )?;
        let no_distribute = match lookup("HAZRISK_NO_DISTRIBUTE") {
            Some(raw) => parse_flag(&raw).context("HAZRISK_NO_DISTRIBUTE must be a boolean")?,
            None => false,
        };
        let owner = lookup("HAZRISK_OWNER")
            .or_else(|| lookup("USER"))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OWNER.to_string());

        Ok(Self {
            database_url,
            max_connections,
            concurrency,
            heartbeat_timeout: Duration::from_secs(heartbeat_secs),
            poll_interval: Duration::from_millis(poll_ms),
            mode: ExecutionMode::from_no_distribute(no_distribute),
            owner,
        })
    }

    /// `--no-distribute` on the command line forces debug mode.
    pub fn with_no_distribute(mut self, no_distribute: bool) -> Self {
        if no_distribute {
            self.mode = ExecutionMode::Debug;
        }
        self
    }

    pub fn orchestrator_config(&self, log_level: LogLevel) -> OrchestratorConfig {
        OrchestratorConfig {
            owner: self.owner.clone(),
            log_level,
            supervisor: SupervisorConfig {
                mode: self.mode,
                concurrency: self.concurrency,
                heartbeat_timeout: self.heartbeat_timeout,
                poll_interval: self.poll_interval,
            },
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("unrecognized value '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<CliConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CliConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.heartbeat_timeout, DEFAULT_HEARTBEAT_TIMEOUT);
        assert_eq!(config.mode, ExecutionMode::Distributed);
        assert_eq!(config.owner, DEFAULT_OWNER);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("HAZRISK_CONCURRENCY", "8"),
            ("HAZRISK_HEARTBEAT_TIMEOUT_SECS", "5"),
            ("HAZRISK_NO_DISTRIBUTE", "yes"),
            ("USER", "alice"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(5));
        assert_eq!(config.mode, ExecutionMode::Debug);
        assert_eq!(config.owner, "alice");
    }

    #[test]
    fn explicit_owner_wins_over_user() {
        let config = config(&[("HAZRISK_OWNER", "ops"), ("USER", "alice")]).unwrap();
        assert_eq!(config.owner, "ops");
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config(&[("HAZRISK_CONCURRENCY", "many")]).is_err());
        assert!(config(&[("HAZRISK_CONCURRENCY", "0")]).is_err());
        assert!(config(&[("HAZRISK_NO_DISTRIBUTE", "maybe")]).is_err());
    }

    #[test]
    fn command_line_flag_forces_debug_mode() {
        let config = config(&[]).unwrap().with_no_distribute(true);
        assert_eq!(config.mode, ExecutionMode::Debug);
        let supervisor = config.orchestrator_config(LogLevel::Info).supervisor;
        assert_eq!(supervisor.mode, ExecutionMode::Debug);
    }
}
