/*!
 * Error types for Hansard
 */

use crate::sync::SyncError;
use hansard_core_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HansardError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Setup and application-level errors
///
/// Failures inside a sync run never surface here; they are counted in the
/// run's report. Everything in this enum stops the process.
#[derive(Debug, Error)]
pub enum HansardError {
    /// One or more configuration values are invalid
    #[error("Invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    /// The configuration file could not be read or parsed
    #[error("Cannot load config file {}: {reason}", path.display())]
    ConfigFile { path: PathBuf, reason: String },

    /// The record store could not be opened or queried
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The HTTP client could not be built
    #[error("Cannot build HTTP client: {0}")]
    Client(String),

    /// Logging could not be initialised
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// A sync run was asked to do something impossible
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl HansardError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        // Partial runs are reported through SyncReport, never as an error
        EXIT_FATAL
    }
}
