//! # casefile-db
//!
//! PostgreSQL and filesystem backends for casefile.
//!
//! This crate provides:
//! - Connection pool management and environment configuration
//! - SQL rendering of `casefile-core` predicates
//! - [`PgRelationalStore`], the `sqlx` implementation of `RelationalStore`
//! - [`FilesystemContentStore`] for evidence content
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use casefile_db::{Access, Database, StoreConfig, TimelineFilters};
//!
//! let db = Database::connect(StoreConfig::from_env()?).await?;
//! let evidence = casefile_core::services::list_evidence_for_operation(
//!     &db.store,
//!     &Access::bypass(),
//!     "op-slug",
//!     &TimelineFilters::new(),
//! )
//! .await?;
//! let report = casefile_core::delete_operation(&db.store, db.content.clone(), &Access::bypass(), "op-slug").await?;
//! ```

pub mod config;
pub mod content_store;
pub mod pool;
pub mod render;
pub mod store;

// Compiled outside cfg(test) so tests/ can reach it
pub mod test_fixtures;

use std::sync::Arc;

pub use casefile_core::*;

pub use config::{ConfigError, PoolLimits, StoreConfig};
pub use content_store::FilesystemContentStore;
pub use pool::{connect_pool, pool_options};
pub use render::{PgRenderer, QueryParam};
pub use store::{PgRelationalStore, PgStoreTransaction};

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Relational and content stores opened from one [`StoreConfig`].
#[derive(Clone)]
pub struct Database {
    pub store: PgRelationalStore,
    pub content: Arc<dyn ContentStore>,
}

impl Database {
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let pool = connect_pool(&config).await?;
        Ok(Self {
            store: PgRelationalStore::new(pool),
            content: Arc::new(FilesystemContentStore::new(config.content_dir)),
        })
    }

    /// Apply `migrations/` to the connected database.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(self.store.pool())
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("c:\\dir"), "c:\\\\dir");
    }
}
