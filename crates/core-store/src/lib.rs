//! Hansard Core Store: idempotent persistence for ingested records
//!
//! # Overview
//!
//! Records are written by natural key with insert-or-update semantics, so
//! repeated or overlapping syncs converge on the same rows. The store also
//! keeps a ledger of finished sync runs.
//!
//! # Backends
//!
//! - **SQLite** (default): WAL mode, embedded migrations, `ON CONFLICT` upserts
//! - **Memory**: a keyed map, for tests and dry runs
//!
//! # Example
//!
//! ```no_run
//! use hansard_core_store::{Legislator, Record, RecordStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hansard_core_store::StoreError> {
//!     let store = hansard_core_store::open("hansard.db").await?;
//!
//!     let record = Record::from(Legislator {
//!         legislator_id: 204554,
//!         name: "Ana Souza".to_string(),
//!         party: "ABC".to_string(),
//!         state: "SP".to_string(),
//!         email: None,
//!     });
//!
//!     // Writing the same key twice leaves one row
//!     store.upsert(&record).await?;
//!     store.upsert(&record).await?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::sync::Arc;

pub mod backends;
pub mod error;
pub mod ledger;
pub mod records;

pub use backends::memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use backends::sqlite::SqliteStore;
pub use error::{Result, StoreError};
pub use ledger::{RunCounts, RunStatus, SyncMode, SyncRun};
pub use records::{EntityKind, Expense, Legislator, NaturalKey, Proposition, Record};

/// Path that selects the in-memory backend
pub const MEMORY_PATH: &str = ":memory:";

/// Core trait for record storage backends
///
/// Implementations must make `upsert` idempotent per natural key and
/// `upsert_batch` all-or-nothing. Methods take `&self` so one store can be
/// shared by concurrent sync units.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert the record, or overwrite the non-key fields of the existing row
    async fn upsert(&self, record: &Record) -> Result<()>;

    /// Upsert every record in one transaction
    ///
    /// On error nothing from the batch is kept. Returns the number of
    /// records written.
    async fn upsert_batch(&self, records: &[Record]) -> Result<usize> {
        // Default implementation: validate up front, then write one-by-one
        for record in records {
            record.validate()?;
        }
        for record in records {
            self.upsert(record).await?;
        }
        Ok(records.len())
    }

    /// Fetch a stored record by its natural key
    async fn get(&self, key: &NaturalKey) -> Result<Option<Record>>;

    /// Number of stored records of one kind
    async fn count(&self, kind: EntityKind) -> Result<u64>;

    /// Append a finished run to the ledger and return its id
    async fn record_run(&self, run: &SyncRun) -> Result<i64>;

    /// Most recent run of `mode` that finished with [`RunStatus::Success`]
    async fn last_successful_run(&self, mode: SyncMode) -> Result<Option<SyncRun>>;

    /// Most recent runs of any mode, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>>;
}

/// Open a record store at the specified path
///
/// `:memory:` selects [`MemoryStore`]; anything else is a SQLite database
/// file, created and migrated on first use.
#[allow(clippy::needless_return)]
pub async fn open(path: &str) -> Result<Arc<dyn RecordStore>> {
    if path == MEMORY_PATH {
        return Ok(Arc::new(MemoryStore::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        let store = SqliteStore::open(path).await?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "sqlite"))]
    Err(StoreError::Open {
        path: path.to_string(),
        reason: "no file-backed store available; enable the 'sqlite' feature".to_string(),
    })
}
