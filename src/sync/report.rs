//! Run statistics
//!
//! Units may run concurrently, so counting goes through atomics and the
//! report is a snapshot taken at the end of the run.

use crate::error::{EXIT_PARTIAL, EXIT_SUCCESS};
use crate::source::Window;
use chrono::{DateTime, Utc};
use hansard_core_store::{RunCounts, RunStatus, SyncMode, SyncRun};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Unit name of the legislator roster refresh
pub(crate) const ROSTER_UNIT: &str = "roster";

/// Outcome of one backfill or incremental run
///
/// `counts.units_*` cover months and proposition windows only. The roster
/// is reported through `roster_synced`, and by name in `failed_units` when
/// it fails.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Date range covered, when the run had one
    pub window: Option<Window>,
    pub counts: RunCounts,
    pub roster_synced: bool,
    /// Names of the units that failed, e.g. `2023-03` or `roster`
    pub failed_units: Vec<String>,
    /// The run stopped early on cancellation or deadline
    pub cancelled: bool,
}

impl SyncReport {
    pub fn status(&self) -> RunStatus {
        let c = &self.counts;
        if self.cancelled {
            RunStatus::Cancelled
        } else if c.units_failed == 0 && c.records_failed == 0 && self.roster_synced {
            RunStatus::Success
        } else if c.units_succeeded == 0 && !self.roster_synced {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Success
    }

    /// Process exit code for a finished run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL
        }
    }

    /// Ledger row for this run
    pub fn to_run(&self) -> SyncRun {
        SyncRun {
            id: None,
            mode: self.mode,
            status: self.status(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            window_start: self.window.map(|w| w.start),
            window_end: self.window.map(|w| w.end),
            counts: self.counts,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    units_succeeded: AtomicU64,
    units_failed: AtomicU64,
    records_fetched: AtomicU64,
    records_persisted: AtomicU64,
    records_skipped: AtomicU64,
    records_failed: AtomicU64,
    roster_synced: AtomicBool,
    failed_units: Mutex<Vec<String>>,
}

impl SyncCounters {
    pub(crate) fn unit_succeeded(&self, unit: &str) {
        if unit == ROSTER_UNIT {
            self.roster_synced.store(true, Ordering::Relaxed);
        } else {
            self.units_succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn unit_failed(&self, unit: &str) {
        if unit != ROSTER_UNIT {
            self.units_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.failed_units
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(unit.to_string());
    }

    pub(crate) fn fetched(&self, n: usize) {
        self.records_fetched.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn persisted(&self, n: usize) {
        self.records_persisted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn skipped(&self, n: usize) {
        self.records_skipped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RunCounts {
        RunCounts {
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            records_fetched: self.records_fetched.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn roster_synced(&self) -> bool {
        self.roster_synced.load(Ordering::Relaxed)
    }

    pub(crate) fn failed_units(&self) -> Vec<String> {
        let mut units = self
            .failed_units
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        units.sort();
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(counts: RunCounts, cancelled: bool) -> SyncReport {
        let now = Utc::now();
        SyncReport {
            mode: SyncMode::Backfill,
            started_at: now,
            finished_at: now,
            window: None,
            counts,
            roster_synced: true,
            failed_units: Vec::new(),
            cancelled,
        }
    }

    #[test]
    fn test_status_from_counts() {
        let clean = RunCounts {
            units_succeeded: 12,
            ..Default::default()
        };
        assert_eq!(report(clean, false).status(), RunStatus::Success);
        assert_eq!(report(clean, false).exit_code(), EXIT_SUCCESS);
        assert_eq!(report(clean, true).status(), RunStatus::Cancelled);

        let partial = RunCounts {
            units_succeeded: 11,
            units_failed: 1,
            ..Default::default()
        };
        assert_eq!(report(partial, false).status(), RunStatus::Partial);
        assert_eq!(report(partial, false).exit_code(), EXIT_PARTIAL);

        let record_failures = RunCounts {
            units_succeeded: 2,
            records_failed: 1,
            ..Default::default()
        };
        assert_eq!(report(record_failures, false).status(), RunStatus::Partial);

        // every month failed, but the roster landed
        let months_failed = RunCounts {
            units_failed: 3,
            ..Default::default()
        };
        assert_eq!(report(months_failed, false).status(), RunStatus::Partial);

        let nothing_landed = SyncReport {
            roster_synced: false,
            ..report(months_failed, false)
        };
        assert_eq!(nothing_landed.status(), RunStatus::Failed);

        let roster_failed = SyncReport {
            roster_synced: false,
            failed_units: vec![ROSTER_UNIT.to_string()],
            ..report(clean, false)
        };
        assert_eq!(roster_failed.status(), RunStatus::Partial);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = SyncCounters::default();
        counters.unit_succeeded("2023-01");
        counters.unit_failed("2023-05");
        counters.unit_failed("2023-02");
        counters.fetched(10);
        counters.persisted(8);
        counters.skipped(1);
        counters.record_failed();

        let counts = counters.snapshot();
        assert_eq!(counts.units_succeeded, 1);
        assert_eq!(counts.units_failed, 2);
        assert_eq!(counts.records_fetched, 10);
        assert_eq!(counts.records_persisted, 8);
        assert_eq!(counts.records_skipped, 1);
        assert_eq!(counts.records_failed, 1);
        assert_eq!(counters.failed_units(), vec!["2023-02", "2023-05"]);
        assert!(!counters.roster_synced());
    }

    #[test]
    fn test_roster_is_not_a_counted_unit() {
        let counters = SyncCounters::default();
        counters.unit_succeeded(ROSTER_UNIT);
        counters.unit_succeeded("2023-01");
        assert!(counters.roster_synced());
        assert_eq!(counters.snapshot().units_succeeded, 1);

        let failing = SyncCounters::default();
        failing.unit_failed(ROSTER_UNIT);
        assert_eq!(failing.snapshot().units_failed, 0);
        assert_eq!(failing.failed_units(), vec![ROSTER_UNIT]);
    }
}
