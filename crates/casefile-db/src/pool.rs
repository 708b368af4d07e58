//! Connection pool opened from a [`StoreConfig`].

use std::time::Instant;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use casefile_core::Result;

use crate::config::{PoolLimits, StoreConfig};

/// Pool options carrying every limit of `limits`.
pub fn pool_options(limits: &PoolLimits) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(limits.max_connections)
        .min_connections(limits.min_connections.min(limits.max_connections))
        .acquire_timeout(limits.acquire_timeout)
        .idle_timeout(limits.idle_timeout)
        .max_lifetime(limits.max_lifetime)
}

/// `url` with its password replaced, for logs.
fn redacted(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
    match authority.rsplit_once('@') {
        Some((userinfo, host)) => match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}{path}"),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}

/// Open the PostgreSQL pool described by `config`.
pub async fn connect_pool(config: &StoreConfig) -> Result<PgPool> {
    let start = Instant::now();
    let target = redacted(&config.database_url);
    let limits = &config.pool;

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        target = %target,
        max_connections = limits.max_connections,
        acquire_timeout_secs = limits.acquire_timeout.as_secs(),
        "Connecting to database"
    );

    let pool = match pool_options(limits).connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!(
                subsystem = "database",
                component = "pool",
                op = "connect",
                target = %target,
                error = %e,
                "Database connection failed"
            );
            return Err(e.into());
        }
    };

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}
