//! Structured logging conventions for casefile.
//!
//! Every crate logs through `tracing` with the same field names so log
//! aggregation can query across subsystems:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subsystem` | `"core"`, `"database"` or `"storage"` |
//! | `component` | Module within the subsystem, e.g. `"cascade"`, `"compiler"`, `"pool"` |
//! | `op` | Logical operation, e.g. `"delete_operation"`, `"list_evidence"` |
//! | `operation_id`, `operation_slug` | Operation acted on |
//! | `evidence_uuid`, `finding_uuid` | Entity acted on |
//! | `keys` | Content store keys involved in a failure |
//! | `unique_key` | Stable marker for remediation queries, see [`ORPHANED_DELETE`] |
//! | `rows_deleted`, `result_count`, `clause_count` | Counts |
//! | `duration_ms` | Wall-clock duration |
//! | `error` | Error message of a failed step |
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, e.g. orphaned blob content after a delete |
//! | INFO  | Lifecycle events, completed deletions and moves |
//! | DEBUG | Compiled predicates, row counts per phase |
//! | TRACE | Per-row / per-key iteration |

/// `unique_key` value on blob deletions that failed after the relational
/// phase committed. Remediation passes search for it to find orphaned keys.
pub const ORPHANED_DELETE: &str = "orphaned_delete";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orphaned_marker_is_stable() {
        assert_eq!(ORPHANED_DELETE, "orphaned_delete");
    }
}
