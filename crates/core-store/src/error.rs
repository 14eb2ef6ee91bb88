//! Error types for the record store

use thiserror::Error;

/// Errors that can occur while persisting or reading records
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected or failed the statement
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migrations could not be applied
    #[cfg(feature = "sqlite")]
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The record failed validation and was not written
    #[error("Record {key} rejected: {reason}")]
    Rejected { key: String, reason: String },

    /// A stored value could not be decoded
    #[error("Invalid value in column {column}: {value:?}")]
    Corrupt { column: &'static str, value: String },

    /// The store location could not be opened
    #[error("Cannot open store at {path}: {reason}")]
    Open { path: String, reason: String },
}

impl StoreError {
    /// Whether the failure is tied to one record rather than the store
    ///
    /// Record-level failures are counted and skipped; store-level failures
    /// are worth surfacing to the run.
    pub fn is_record_level(&self) -> bool {
        matches!(self, StoreError::Rejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let rejected = StoreError::Rejected {
            key: "expense:1/A/2023-01".to_string(),
            reason: "document_code is empty".to_string(),
        };
        assert!(rejected.is_record_level());
        assert!(rejected.to_string().contains("expense:1/A/2023-01"));

        let open = StoreError::Open {
            path: "/nope/db.sqlite".to_string(),
            reason: "permission denied".to_string(),
        };
        assert!(!open.is_record_level());
    }
}
