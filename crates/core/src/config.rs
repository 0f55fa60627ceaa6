//! Configuration types shared across crates.

use crate::error::{Error, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::Duration;

/// Default lease time-to-live in seconds.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 60;

/// Default SQLite pool size. WAL lets readers proceed beside one writer.
pub const DEFAULT_SQLITE_MAX_CONNECTIONS: u32 = 4;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "LARDER_";

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Backend database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// SQLite database (single host; several processes may share the file).
    Sqlite {
        /// Database file path, or ":memory:".
        path: PathBuf,
        /// How long a statement waits on another process's write lock, in milliseconds.
        #[serde(default = "default_sqlite_busy_timeout_ms")]
        busy_timeout_ms: u64,
        /// Maximum connections in the pool. An in-memory database always uses one.
        #[serde(default = "default_sqlite_max_connections")]
        max_connections: u32,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer LARDER_BACKEND__PASSWORD over storing it in a file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds, enforced server-side.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_busy_timeout_ms() -> u64 {
    5_000
}

fn default_sqlite_max_connections() -> u32 {
    DEFAULT_SQLITE_MAX_CONNECTIONS
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/larder.db"),
            busy_timeout_ms: default_sqlite_busy_timeout_ms(),
            max_connections: default_sqlite_max_connections(),
        }
    }
}

impl BackendConfig {
    /// Validate backend configuration invariants.
    pub fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::Sqlite {
                path,
                max_connections,
                ..
            } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::Config("sqlite config requires a 'path'".to_string()));
                }
                if *max_connections == 0 {
                    return Err(Error::Config(
                        "sqlite 'max_connections' must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            BackendConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err(Error::Config(
                        "postgres 'max_connections' must be greater than zero".to_string(),
                    ));
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(Error::Config(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    )),
                    (None, Some(_), None) => Err(Error::Config(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    )),
                }
            }
        }
    }
}

/// Where lease timestamps come from.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// Ask the database for the current time, so every process shares one clock.
    #[default]
    Backend,
    /// Use the local system clock. Only safe when hosts are tightly synchronized.
    System,
}

/// Lease lock configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease TTL in seconds. Non-positive values fall back to 60.
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: i64,
    /// Clock used to stamp and compare lease expirations.
    #[serde(default)]
    pub clock: ClockSource,
}

fn default_lock_ttl_secs() -> i64 {
    DEFAULT_LOCK_TTL_SECS
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
            clock: ClockSource::default(),
        }
    }
}

impl LockConfig {
    /// Get the default lease TTL as a Duration.
    pub fn default_ttl(&self) -> Duration {
        if self.ttl_secs <= 0 {
            return Duration::seconds(DEFAULT_LOCK_TTL_SECS);
        }
        Duration::seconds(self.ttl_secs)
    }
}

/// Complete store configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend database configuration.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Lease lock configuration.
    #[serde(default)]
    pub lock: LockConfig,
    /// Deadline applied to every storage operation, in milliseconds.
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

impl StoreConfig {
    /// Load configuration from an optional TOML file, then `LARDER_` environment variables.
    ///
    /// Nested fields use `__` in variable names, e.g. `LARDER_BACKEND__TYPE=postgres`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate configuration from an assembled figment.
    pub fn extract(figment: Figment) -> Result<Self> {
        let config: StoreConfig = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        if self.operation_timeout_ms == Some(0) {
            return Err(Error::Config(
                "'operation_timeout_ms' must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the operation deadline as a std Duration, if configured.
    pub fn operation_timeout(&self) -> Option<std::time::Duration> {
        self.operation_timeout_ms
            .map(std::time::Duration::from_millis)
    }
}
