//! Centralized default constants for casefile.
//!
//! Crates reference these constants instead of defining their own magic
//! numbers. Grouped by domain area.

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Default maximum number of connections in the pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default minimum number of connections kept open.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Default connection acquire timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default maximum connection lifetime in seconds (30 minutes).
pub const DB_MAX_LIFETIME_SECS: u64 = 1800;

// =============================================================================
// CONTENT STORE
// =============================================================================

/// Default base directory for the filesystem content store.
pub const CONTENT_DIR: &str = "./data/content";

// =============================================================================
// FILTERS
// =============================================================================

/// Maximum number of values accepted for one filter field and modifier.
///
/// Lists bind as a single array parameter, so this bounds the array size
/// rather than the query text.
pub const MAX_FILTER_VALUES: usize = 1000;

/// Time of day assigned to a date-only upper bound of a range (end of day).
pub const END_OF_DAY_HMS: (u32, u32, u32) = (23, 59, 59);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_bounds_are_consistent() {
        assert!(DB_MIN_CONNECTIONS <= DB_MAX_CONNECTIONS);
        assert!(DB_IDLE_TIMEOUT_SECS < DB_MAX_LIFETIME_SECS);
    }

    #[test]
    fn test_end_of_day_is_valid_time() {
        let (h, m, s) = END_OF_DAY_HMS;
        assert!(chrono::NaiveTime::from_hms_opt(h, m, s).is_some());
    }
}
