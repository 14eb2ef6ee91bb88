//! Backfill and incremental sync runs

mod orchestrator;
mod report;

pub use orchestrator::{SyncSettings, Syncer};
pub use report::SyncReport;

use thiserror::Error;

/// Reasons a sync run refuses to start
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Invalid year range: {start} is after {end}")]
    InvalidRange { start: i32, end: i32 },
}
