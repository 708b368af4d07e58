//! Store configuration from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CASEFILE_DATABASE_URL` (then `DATABASE_URL`) | required |
//! | `CASEFILE_DB_MAX_CONNECTIONS` | [`DB_MAX_CONNECTIONS`] |
//! | `CASEFILE_DB_CONNECT_TIMEOUT_SECS` | [`DB_CONNECT_TIMEOUT_SECS`] |
//! | `CASEFILE_CONTENT_DIR` | [`CONTENT_DIR`] |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use casefile_core::defaults::{
    CONTENT_DIR, DB_CONNECT_TIMEOUT_SECS, DB_IDLE_TIMEOUT_SECS, DB_MAX_CONNECTIONS,
    DB_MAX_LIFETIME_SECS, DB_MIN_CONNECTIONS,
};

pub const ENV_DATABASE_URL: &str = "CASEFILE_DATABASE_URL";
pub const ENV_DATABASE_URL_FALLBACK: &str = "DATABASE_URL";
pub const ENV_MAX_CONNECTIONS: &str = "CASEFILE_DB_MAX_CONNECTIONS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "CASEFILE_DB_CONNECT_TIMEOUT_SECS";
pub const ENV_CONTENT_DIR: &str = "CASEFILE_CONTENT_DIR";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CASEFILE_DATABASE_URL (or DATABASE_URL) is not set")]
    MissingDatabaseUrl,

    #[error("{name} must be a positive integer (got '{value}')")]
    InvalidNumber { name: &'static str, value: String },
}

impl From<ConfigError> for casefile_core::Error {
    fn from(e: ConfigError) -> Self {
        casefile_core::Error::Config(e.to_string())
    }
}

/// Connection pool limits; see [`crate::pool::pool_options`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_connections: u32,
    /// Clamped to `max_connections` when the pool is built.
    pub min_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections: DB_MAX_CONNECTIONS,
            min_connections: DB_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DB_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(DB_MAX_LIFETIME_SECS)),
        }
    }
}

/// Everything needed to open the relational and content stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub pool: PoolLimits,
    pub content_dir: PathBuf,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: PoolLimits::default(),
            content_dir: PathBuf::from(CONTENT_DIR),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get(ENV_DATABASE_URL)
            .or_else(|| get(ENV_DATABASE_URL_FALLBACK))
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let max_connections = match get(ENV_MAX_CONNECTIONS) {
            Some(v) => parse_positive(ENV_MAX_CONNECTIONS, &v)? as u32,
            None => DB_MAX_CONNECTIONS,
        };
        let connect_timeout_secs = match get(ENV_CONNECT_TIMEOUT_SECS) {
            Some(v) => parse_positive(ENV_CONNECT_TIMEOUT_SECS, &v)?,
            None => DB_CONNECT_TIMEOUT_SECS,
        };
        let content_dir = get(ENV_CONTENT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONTENT_DIR));

        let pool = PoolLimits {
            max_connections,
            acquire_timeout: Duration::from_secs(connect_timeout_secs),
            ..PoolLimits::default()
        };

        Ok(Self {
            database_url,
            pool,
            content_dir,
        })
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 && n <= u64::from(u32::MAX) => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_apply() {
        let config = StoreConfig::from_lookup(lookup(&[(ENV_DATABASE_URL, "postgres://x/db")]))
            .unwrap();
        assert_eq!(config.database_url, "postgres://x/db");
        assert_eq!(config.pool, PoolLimits::default());
        assert_eq!(config.content_dir, PathBuf::from(CONTENT_DIR));
    }

    #[test]
    fn test_database_url_fallback() {
        let config =
            StoreConfig::from_lookup(lookup(&[(ENV_DATABASE_URL_FALLBACK, "postgres://y/db")]))
                .unwrap();
        assert_eq!(config.database_url, "postgres://y/db");

        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://x/db"),
            (ENV_DATABASE_URL_FALLBACK, "postgres://y/db"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://x/db");
    }

    #[test]
    fn test_missing_database_url() {
        let err = StoreConfig::from_lookup(lookup(&[(ENV_DATABASE_URL, "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDatabaseUrl);
    }

    #[test]
    fn test_overrides() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://x/db"),
            (ENV_MAX_CONNECTIONS, "3"),
            (ENV_CONNECT_TIMEOUT_SECS, "7"),
            (ENV_CONTENT_DIR, "/srv/content"),
        ]))
        .unwrap();
        assert_eq!(config.pool.max_connections, 3);
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(7));
        assert_eq!(config.content_dir, PathBuf::from("/srv/content"));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        for bad in ["0", "-1", "ten"] {
            let err = StoreConfig::from_lookup(lookup(&[
                (ENV_DATABASE_URL, "postgres://x/db"),
                (ENV_MAX_CONNECTIONS, bad),
            ]))
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidNumber { name, .. } if name == ENV_MAX_CONNECTIONS));
        }
    }

    #[test]
    fn test_config_error_converts_to_core_error() {
        let err: casefile_core::Error = ConfigError::MissingDatabaseUrl.into();
        assert!(matches!(err, casefile_core::Error::Config(_)));
    }
}
