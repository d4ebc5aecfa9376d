//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use crate::orchestrator::advisor::AdvisorConfig;
use crate::state::persistence::EntityStore;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Persistence configuration
    pub persistence: PersistenceConfig,
    /// Execution configuration
    pub execution: ExecutionConfig,
    /// Notification configuration
    pub notifications: NotificationConfig,
    /// Advisor thresholds
    pub advisor: AdvisorConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Directory holding the collection files
    pub data_dir: PathBuf,
}

/// Execution configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Timeout applied to every step command (in seconds)
    pub command_timeout_secs: u64,
    /// Directory commands run in (None = server working directory)
    pub working_dir: Option<PathBuf>,
}

/// Notification configuration
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    /// Webhook receiving every notification, if any
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8080,
                host: "0.0.0.0".to_string(),
            },
            persistence: PersistenceConfig {
                data_dir: EntityStore::default_data_dir(),
            },
            execution: ExecutionConfig {
                command_timeout_secs: 600,
                working_dir: None,
            },
            notifications: NotificationConfig::default(),
            advisor: AdvisorConfig::default(),
        }
    }
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables with defaults
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server: ServerConfig {
                port: parsed("PORT").unwrap_or(defaults.server.port),
                host: non_empty("HOST").unwrap_or(defaults.server.host),
            },
            persistence: PersistenceConfig {
                data_dir: non_empty("DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.persistence.data_dir),
            },
            execution: ExecutionConfig {
                command_timeout_secs: parsed::<u64>("COMMAND_TIMEOUT_SECS")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(defaults.execution.command_timeout_secs),
                working_dir: non_empty("WORKING_DIR").map(PathBuf::from),
            },
            notifications: NotificationConfig {
                webhook_url: non_empty("NOTIFY_WEBHOOK_URL"),
            },
            advisor: AdvisorConfig {
                max_average_duration_ms: parsed("ADVISOR_MAX_AVG_DURATION_MS")
                    .unwrap_or(defaults.advisor.max_average_duration_ms),
                min_success_rate: parsed("ADVISOR_MIN_SUCCESS_RATE")
                    .unwrap_or(defaults.advisor.min_success_rate),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
