//! Sync run ledger types
//!
//! Each finished sync run is recorded so the next incremental run knows
//! where the previous one left off, and so `status` can show recent history.

use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a run walked the upstream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Bulk load of a year range
    Backfill,
    /// Roster, current month and recent propositions
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Backfill => write!(f, "backfill"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backfill" => Ok(SyncMode::Backfill),
            "incremental" => Ok(SyncMode::Incremental),
            _ => Err(StoreError::Corrupt {
                column: "mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Final status of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every unit completed
    Success,
    /// Some units failed and were skipped
    Partial,
    /// No unit completed
    Failed,
    /// The run was cancelled or hit its deadline
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(StoreError::Corrupt {
                column: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// Counters a run accumulated
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounts {
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub records_fetched: u64,
    pub records_persisted: u64,
    pub records_skipped: u64,
    pub records_failed: u64,
}

/// One row of the run ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    pub mode: SyncMode,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Date range the run covered, when it had one
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    pub counts: RunCounts,
}

impl SyncRun {
    /// Duration between start and finish, never negative
    pub fn elapsed(&self) -> chrono::Duration {
        (self.finished_at - self.started_at).max(chrono::Duration::zero())
    }
}
