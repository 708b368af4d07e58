//! # casefile-core
//!
//! Core types and engines for casefile: the filter value model, the
//! predicate compiler, tag reconciliation between operations, and the
//! cascading delete orchestrator.
//!
//! Storage is reached through the [`RelationalStore`] and [`ContentStore`]
//! traits. `casefile-db` provides the PostgreSQL and filesystem backends;
//! [`memory`] provides in-process ones.

pub mod cascade;
pub mod compiler;
pub mod defaults;
pub mod error;
pub mod filter;
pub mod logging;
pub mod memory;
pub mod models;
pub mod policy;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod services;
pub mod tag_diff;
pub mod traits;

// Re-export commonly used types at crate root
pub use cascade::{delete_content, delete_evidence, delete_operation};
pub use compiler::{compile_evidence_filters, compile_finding_filters, Entity, TagMatch};
pub use error::{ContentCleanupFailure, Error, OrphanedContent, Result};
pub use filter::{
    DateRange, DateRangeTerm, FilterModifier, FilterValue, FilterValues, SplitValues,
    TimelineFilters,
};
pub use memory::{MemoryContentStore, MemoryStore};
pub use models::*;
pub use policy::{Access, Deny, FullAccess, OperationRole, OperationRolePolicy, Permission, Policy};
pub use predicate::{Predicate, Row, Select, Subquery, Update, Value};
pub use query::parse_timeline_query;
pub use schema::{Column, ColumnType, Table};
pub use tag_diff::{diff, diff_for_evidence, normalize_tag_name};
pub use traits::*;
