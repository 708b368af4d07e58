//! Storage traits consumed by the services and the cascade orchestrator.
//!
//! Implementations: [`crate::memory::MemoryStore`] and
//! [`crate::memory::MemoryContentStore`] in this crate, the PostgreSQL store
//! and filesystem content store in `casefile-db`.

use async_trait::async_trait;

use crate::error::Result;
use crate::predicate::{Predicate, Row, Select, Update};
use crate::schema::Table;

// =============================================================================
// RELATIONAL STORE
// =============================================================================

/// Transactional relational storage driven by [`Predicate`] trees.
///
/// Methods on the store itself run in their own implicit transaction.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Run a query; rows carry exactly the selected columns.
    async fn select(&self, query: &Select) -> Result<Vec<Row>>;

    /// Insert rows into `table`, returning the number inserted.
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<u64>;

    /// Apply an update, returning the number of affected rows.
    async fn update(&self, update: &Update) -> Result<u64>;

    /// Delete matching rows of `table`, returning the number removed.
    async fn delete(&self, table: Table, filter: &Predicate) -> Result<u64>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Transaction>;
}

/// An open transaction.
///
/// Nothing is visible to other callers until [`StoreTransaction::commit`].
/// Dropping the transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn select(&mut self, query: &Select) -> Result<Vec<Row>>;

    async fn insert(&mut self, table: Table, rows: Vec<Row>) -> Result<u64>;

    async fn update(&mut self, update: &Update) -> Result<u64>;

    async fn delete(&mut self, table: Table, filter: &Predicate) -> Result<u64>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

// =============================================================================
// CONTENT STORE
// =============================================================================

/// Key-addressed blob storage for evidence content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous content.
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read the content stored under `key`.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete the content stored under `key`.
    ///
    /// A missing key is an error (`Error::NotFound`).
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether `key` holds content.
    async fn exists(&self, key: &str) -> Result<bool>;
}
