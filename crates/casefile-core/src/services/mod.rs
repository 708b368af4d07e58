//! Operation-scoped services over a [`RelationalStore`](crate::traits::RelationalStore).
//!
//! Every entry point resolves its operation, checks the caller's
//! [`Access`](crate::policy::Access), then reads or writes through the store.

pub mod evidence;
pub mod findings;
pub mod lookup;
pub mod tags;

pub use evidence::{list_evidence_for_operation, list_evidence_matching, move_evidence};
pub use findings::{add_evidence_to_finding, list_findings_for_operation, list_findings_matching};
pub use lookup::{lookup_evidence, lookup_finding, lookup_operation};
pub use tags::{list_tag_difference, list_tag_difference_for_evidence};
