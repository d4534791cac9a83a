//! Runtime configuration, resolved from flags or `FINTRACK_*` environment variables.

use std::time::Duration;

use clap::{Args, ValueEnum};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human readable, for terminals
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Database file path
    #[arg(short, long, env = "FINTRACK_DATABASE", default_value = "fintrack.db")]
    pub database: String,

    /// User the commands act on behalf of
    #[arg(short, long, env = "FINTRACK_USER")]
    pub user: Option<Uuid>,

    /// Log output format
    #[arg(long, env = "FINTRACK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Maximum pooled database connections
    #[arg(long, env = "FINTRACK_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Connections kept open while idle
    #[arg(long, env = "FINTRACK_MIN_CONNECTIONS", default_value_t = 0)]
    pub min_connections: u32,

    /// Seconds to wait for a free connection
    #[arg(long, env = "FINTRACK_ACQUIRE_TIMEOUT_SECS", default_value_t = 30)]
    pub acquire_timeout_secs: u64,

    /// Seconds before an idle connection is closed
    #[arg(long, env = "FINTRACK_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,
}

impl Config {
    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            database_path: self.database.clone(),
            max_connections: self.max_connections.max(1),
            min_connections: self.min_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

/// Connection pool settings for the SQLite store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub database_path: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl StorageConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database_path)
    }
}
