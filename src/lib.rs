/*!
 * Hansard - resilient ingestion of legislative open-data APIs
 *
 * Pulls legislators, expenses and propositions from a slow, rate-limited
 * upstream and upserts them by natural key, so overlapping and repeated
 * runs converge on the same rows:
 * - Token-bucket rate limiting and a circuit breaker around every fetch
 * - Bounded retry with exponential backoff and jitter
 * - Month-by-month backfill and cheap incremental refreshes
 * - Run ledger driving the incremental proposition window
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod payload;
pub mod source;
pub mod sync;

// Re-export commonly used types
pub use config::HansardConfig;
pub use error::{HansardError, Result};
pub use source::{DataSource, FetchError, ResilientClient};
pub use sync::{SyncReport, SyncSettings, Syncer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
