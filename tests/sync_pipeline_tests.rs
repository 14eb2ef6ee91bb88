//! Backfill and incremental runs against a scripted upstream
//!
//! Each scenario runs against both the in-memory and the SQLite store.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use hansard::source::{DataSource, ExternalRecord, FetchError, Filters, Window};
use hansard::sync::{SyncSettings, Syncer};
use hansard_core_store::{
    EntityKind, NaturalKey, RecordStore, RunCounts, RunStatus, SyncMode, SyncRun,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct ScriptedUpstream {
    roster: Vec<i64>,
    failing_months: HashSet<(i32, u32)>,
    /// Month whose first page carries a record the store rejects
    poisoned_month: Option<(i32, u32)>,
    /// Expense listings never answer until cancelled
    hang_expenses: bool,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    lookups: Mutex<Vec<i64>>,
    windows: Mutex<Vec<Window>>,
    /// Every upstream call in order, with the (tokio) time it was made
    calls: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedUpstream {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }

    fn calls(&self) -> Vec<(Instant, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn expenses(&self, year: i32, month: u32) -> Vec<ExternalRecord> {
        let mut page: Vec<ExternalRecord> = ["A", "B"]
            .iter()
            .map(|suffix| {
                json!({
                    "legislator_id": 1,
                    "document_code": format!("{}{:02}-{}", year, month, suffix),
                    "year": year,
                    "month": month,
                    "expense_type": "FUEL",
                    "supplier": "Posto Central",
                    "net_value": 99.5
                })
            })
            .collect();
        if self.poisoned_month == Some((year, month)) {
            page.push(json!({
                "legislator_id": 1,
                "document_code": "BAD",
                "year": year,
                "month": 13
            }));
        }
        page
    }

    async fn simulate_latency(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(self.latency) => Ok(()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl DataSource for ScriptedUpstream {
    async fn list_page(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        filters: &Filters,
        page: u32,
        _page_size: u32,
    ) -> Result<Vec<ExternalRecord>, FetchError> {
        let period = match (filters.get("year"), filters.get("month")) {
            (Some(year), Some(month)) => format!(" {}-{:0>2}", year, month),
            _ => String::new(),
        };
        self.record(format!("{}{} p{}", entity.table(), period, page));
        if page > 1 {
            return Ok(Vec::new());
        }
        match entity {
            EntityKind::Legislator => Ok(self
                .roster
                .iter()
                .map(|id| json!({"id": id, "name": format!("Member {}", id), "party": "IND"}))
                .collect()),
            EntityKind::Expense => {
                if self.hang_expenses {
                    cancel.cancelled().await;
                    return Err(FetchError::Cancelled);
                }
                self.simulate_latency(cancel).await?;

                let year: i32 = filters.get("year").unwrap().parse().unwrap();
                let month: u32 = filters.get("month").unwrap().parse().unwrap();
                if self.failing_months.contains(&(year, month)) {
                    return Err(FetchError::RetriesExhausted {
                        attempts: 3,
                        cause: Box::new(FetchError::RetryableHttp {
                            status: 503,
                            url: format!("http://upstream/expenses?year={}&month={}", year, month),
                        }),
                    });
                }
                Ok(self.expenses(year, month))
            }
            EntityKind::Proposition => Ok(Vec::new()),
        }
    }

    async fn get_by_id(
        &self,
        _cancel: &CancellationToken,
        _entity: EntityKind,
        id: i64,
    ) -> Result<Option<ExternalRecord>, FetchError> {
        self.record(format!("lookup {}", id));
        self.lookups.lock().unwrap().push(id);
        Ok(Some(json!({"id": id, "name": format!("Member {}", id)})))
    }

    async fn list_by_window(
        &self,
        _cancel: &CancellationToken,
        _entity: EntityKind,
        window: &Window,
    ) -> Result<Vec<ExternalRecord>, FetchError> {
        self.record(format!("propositions {}", window));
        self.windows.lock().unwrap().push(*window);
        Ok(vec![json!({
            "id": window.start.format("%Y%m%d").to_string().parse::<i64>().unwrap(),
            "type": "PL",
            "number": 1,
            "summary": "Window marker",
            "presented_at": format!("{}T12:00:00Z", window.start)
        })])
    }
}

fn settings() -> SyncSettings {
    SyncSettings {
        page_delay: Duration::ZERO,
        failure_cooldown: Duration::ZERO,
        unit_timeout: Duration::from_secs(10),
        ..SyncSettings::default()
    }
}

async fn stores(dir: &TempDir) -> Vec<Arc<dyn RecordStore>> {
    let db = dir.path().join("hansard.db");
    vec![
        hansard_core_store::open(":memory:").await.unwrap(),
        hansard_core_store::open(db.to_str().unwrap()).await.unwrap(),
    ]
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_backfill_isolates_failed_month() {
    let dir = TempDir::new().unwrap();
    for store in stores(&dir).await {
        let upstream = Arc::new(ScriptedUpstream {
            roster: vec![1],
            failing_months: HashSet::from([(2023, 3)]),
            ..Default::default()
        });
        let syncer = Syncer::new(upstream, store.clone(), settings()).with_today(date(2024, 1, 15));

        let report = syncer
            .run_backfill(&CancellationToken::new(), 2023, 2023)
            .await
            .unwrap();

        assert_eq!(report.failed_units, vec!["2023-03"]);
        assert_eq!(report.counts.units_failed, 1);
        assert_eq!(report.counts.units_succeeded, 11);
        assert!(report.roster_synced);
        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(report.exit_code(), 1);

        assert_eq!(store.count(EntityKind::Expense).await.unwrap(), 22);
        // the failed month stops before its proposition window
        assert_eq!(store.count(EntityKind::Proposition).await.unwrap(), 11);

        let runs = store.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Partial);
        assert_eq!(runs[0].counts, report.counts);
    }
}

#[tokio::test]
async fn test_overlapping_backfills_converge() {
    let dir = TempDir::new().unwrap();
    for store in stores(&dir).await {
        let upstream = Arc::new(ScriptedUpstream {
            roster: vec![1, 2],
            ..Default::default()
        });
        let syncer = Syncer::new(upstream, store.clone(), settings()).with_today(date(2024, 6, 30));
        let cancel = CancellationToken::new();

        syncer.run_backfill(&cancel, 2023, 2023).await.unwrap();
        let expenses = store.count(EntityKind::Expense).await.unwrap();
        let legislators = store.count(EntityKind::Legislator).await.unwrap();

        let again = syncer.run_backfill(&cancel, 2023, 2024).await.unwrap();
        assert!(again.is_success());
        assert_eq!(store.count(EntityKind::Legislator).await.unwrap(), legislators);
        // 2024 adds January through June on top of 2023
        assert_eq!(store.count(EntityKind::Expense).await.unwrap(), expenses + 12);
    }
}

#[tokio::test]
async fn test_rejected_record_does_not_abort_batch() {
    let dir = TempDir::new().unwrap();
    for store in stores(&dir).await {
        let upstream = Arc::new(ScriptedUpstream {
            roster: vec![1],
            poisoned_month: Some((2023, 2)),
            ..Default::default()
        });
        let syncer = Syncer::new(upstream, store.clone(), settings()).with_today(date(2023, 2, 28));

        let report = syncer
            .run_backfill(&CancellationToken::new(), 2023, 2023)
            .await
            .unwrap();

        assert_eq!(report.counts.records_failed, 1);
        assert_eq!(report.counts.units_failed, 0);
        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(store.count(EntityKind::Expense).await.unwrap(), 4);

        let kept = NaturalKey::Expense {
            legislator_id: 1,
            document_code: "202302-A".to_string(),
            year: 2023,
            month: 2,
        };
        assert!(store.get(&kept).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_missing_legislators_are_fetched_once() {
    let dir = TempDir::new().unwrap();
    for store in stores(&dir).await {
        let upstream = Arc::new(ScriptedUpstream::default());
        let syncer =
            Syncer::new(upstream.clone(), store.clone(), settings()).with_today(date(2023, 3, 31));

        let report = syncer
            .run_backfill(&CancellationToken::new(), 2023, 2023)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(*upstream.lookups.lock().unwrap(), vec![1]);
        assert!(store
            .get(&NaturalKey::Legislator(1))
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn test_concurrent_months_respect_limit() {
    let upstream = Arc::new(ScriptedUpstream {
        roster: vec![1],
        latency: Duration::from_millis(20),
        ..Default::default()
    });
    let store: Arc<dyn RecordStore> = hansard_core_store::open(":memory:").await.unwrap();
    let syncer = Syncer::new(
        upstream.clone(),
        store.clone(),
        SyncSettings {
            max_concurrent_units: 4,
            ..settings()
        },
    )
    .with_today(date(2024, 1, 1));

    let report = syncer
        .run_backfill(&CancellationToken::new(), 2023, 2023)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(store.count(EntityKind::Expense).await.unwrap(), 24);
    let peak = upstream.max_in_flight.load(Ordering::SeqCst);
    assert!(peak > 1 && peak <= 4, "peak concurrency was {}", peak);
}

#[tokio::test]
async fn test_run_deadline_cancels_outstanding_work() {
    let upstream = Arc::new(ScriptedUpstream {
        roster: vec![1],
        hang_expenses: true,
        ..Default::default()
    });
    let store: Arc<dyn RecordStore> = hansard_core_store::open(":memory:").await.unwrap();
    let syncer = Syncer::new(
        upstream,
        store.clone(),
        SyncSettings {
            run_deadline: Some(Duration::from_millis(100)),
            ..settings()
        },
    )
    .with_today(date(2024, 1, 1));

    let report = syncer
        .run_backfill(&CancellationToken::new(), 2023, 2023)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status(), RunStatus::Cancelled);
    assert_eq!(report.counts.units_failed, 0);
    assert_eq!(report.counts.units_succeeded, 0);
    assert!(report.roster_synced);

    let runs = store.recent_runs(1).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_incremental_window_follows_ledger() {
    let dir = TempDir::new().unwrap();
    for store in stores(&dir).await {
        let previous = SyncRun {
            id: None,
            mode: SyncMode::Incremental,
            status: RunStatus::Success,
            started_at: Utc.with_ymd_and_hms(2024, 6, 15, 9, 58, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap(),
            window_start: Some(date(2024, 6, 8)),
            window_end: Some(date(2024, 6, 15)),
            counts: RunCounts::default(),
        };
        store.record_run(&previous).await.unwrap();

        // A later partial run does not move the window
        store
            .record_run(&SyncRun {
                status: RunStatus::Partial,
                started_at: Utc.with_ymd_and_hms(2024, 6, 18, 9, 0, 0).unwrap(),
                finished_at: Utc.with_ymd_and_hms(2024, 6, 18, 9, 5, 0).unwrap(),
                ..previous.clone()
            })
            .await
            .unwrap();

        let upstream = Arc::new(ScriptedUpstream {
            roster: vec![1],
            ..Default::default()
        });
        let syncer =
            Syncer::new(upstream.clone(), store.clone(), settings()).with_today(date(2024, 6, 20));

        let report = syncer.run_incremental(&CancellationToken::new()).await;
        assert!(report.is_success());
        assert_eq!(report.window, Some(Window::new(date(2024, 6, 14), date(2024, 6, 20))));
        assert_eq!(
            *upstream.windows.lock().unwrap(),
            vec![Window::new(date(2024, 6, 14), date(2024, 6, 20))]
        );
        // current month and proposition window
        assert_eq!(report.counts.units_succeeded, 2);
        assert!(report.roster_synced);

        let last = store
            .last_successful_run(SyncMode::Incremental)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.window_start, Some(date(2024, 6, 14)));
    }
}

#[tokio::test]
async fn test_incremental_reruns_are_idempotent() {
    let dir = TempDir::new().unwrap();
    for store in stores(&dir).await {
        let upstream = Arc::new(ScriptedUpstream {
            roster: vec![1, 2, 3],
            ..Default::default()
        });
        let syncer = Syncer::new(upstream, store.clone(), settings());
        let cancel = CancellationToken::new();

        let first = syncer.run_incremental(&cancel).await;
        let second = syncer.run_incremental(&cancel).await;
        assert!(first.is_success());
        assert!(second.is_success());
        assert_eq!(first.counts.records_persisted, second.counts.records_persisted);

        assert_eq!(store.count(EntityKind::Legislator).await.unwrap(), 3);
        assert_eq!(store.count(EntityKind::Expense).await.unwrap(), 2);
        assert_eq!(store.recent_runs(10).await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_cancellation_stops_backfill_without_failures() {
    let upstream = Arc::new(ScriptedUpstream {
        roster: vec![1],
        hang_expenses: true,
        ..Default::default()
    });
    let store: Arc<dyn RecordStore> = hansard_core_store::open(":memory:").await.unwrap();
    let syncer = Syncer::new(upstream, store, settings()).with_today(date(2024, 1, 1));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = syncer.run_backfill(&cancel, 2023, 2023).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.counts.units_failed, 0);
    assert!(report.failed_units.is_empty());
}

fn paced_settings(page_delay: Duration, failure_cooldown: Duration) -> SyncSettings {
    SyncSettings {
        page_delay,
        failure_cooldown,
        unit_timeout: Duration::from_secs(600),
        ..SyncSettings::default()
    }
}

/// Time between one call and the next, labelled by both calls
fn gaps(calls: &[(Instant, String)]) -> Vec<(Duration, String, String)> {
    calls
        .windows(2)
        .map(|pair| (pair[1].0 - pair[0].0, pair[0].1.clone(), pair[1].1.clone()))
        .collect()
}

fn position(calls: &[(Instant, String)], call: &str) -> Vec<usize> {
    calls
        .iter()
        .enumerate()
        .filter(|(_, (_, c))| c == call)
        .map(|(i, _)| i)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_backfill_spaces_pages_and_units() {
    let upstream = Arc::new(ScriptedUpstream {
        roster: vec![1],
        ..Default::default()
    });
    let store: Arc<dyn RecordStore> = hansard_core_store::open(":memory:").await.unwrap();
    let delay = Duration::from_secs(1);
    let syncer = Syncer::new(upstream.clone(), store, paced_settings(delay, Duration::ZERO))
        .with_today(date(2023, 3, 31));

    let report = syncer
        .run_backfill(&CancellationToken::new(), 2023, 2023)
        .await
        .unwrap();
    assert!(report.is_success());

    let calls = upstream.calls();
    let names: Vec<&str> = calls.iter().map(|(_, c)| c.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "legislators p1",
            "legislators p2",
            "expenses 2023-01 p1",
            "expenses 2023-01 p2",
            "propositions 2023-01-01..2023-01-31",
            "expenses 2023-02 p1",
            "expenses 2023-02 p2",
            "propositions 2023-02-01..2023-02-28",
            "expenses 2023-03 p1",
            "expenses 2023-03 p2",
            "propositions 2023-03-01..2023-03-31",
        ]
    );
    for (gap, before, after) in gaps(&calls) {
        assert!(gap >= delay, "{:?} between `{}` and `{}`", gap, before, after);
    }
}

#[tokio::test(start_paused = true)]
async fn test_incremental_spaces_units() {
    let upstream = Arc::new(ScriptedUpstream {
        roster: vec![1],
        ..Default::default()
    });
    let store: Arc<dyn RecordStore> = hansard_core_store::open(":memory:").await.unwrap();
    let delay = Duration::from_millis(250);
    let syncer = Syncer::new(upstream.clone(), store, paced_settings(delay, Duration::ZERO))
        .with_today(date(2024, 6, 20));

    let report = syncer.run_incremental(&CancellationToken::new()).await;
    assert!(report.is_success());

    let calls = upstream.calls();
    assert_eq!(calls.len(), 5);
    for (gap, before, after) in gaps(&calls) {
        assert!(gap >= delay, "{:?} between `{}` and `{}`", gap, before, after);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_month_is_followed_by_cooldown() {
    let upstream = Arc::new(ScriptedUpstream {
        roster: vec![1],
        failing_months: HashSet::from([(2023, 2)]),
        ..Default::default()
    });
    let store: Arc<dyn RecordStore> = hansard_core_store::open(":memory:").await.unwrap();
    let delay = Duration::from_secs(1);
    let cooldown = Duration::from_secs(30);
    let syncer = Syncer::new(upstream.clone(), store, paced_settings(delay, cooldown))
        .with_today(date(2023, 3, 31));

    let report = syncer
        .run_backfill(&CancellationToken::new(), 2023, 2023)
        .await
        .unwrap();
    assert_eq!(report.failed_units, vec!["2023-02"]);
    assert_eq!(report.counts.units_succeeded, 2);

    let calls = upstream.calls();
    let february = position(&calls, "expenses 2023-02 p1");
    let march = position(&calls, "expenses 2023-03 p1");
    // tried in order, then once more after March
    assert_eq!(february.len(), 2);
    assert_eq!(march.len(), 1);
    assert!(february[0] < march[0] && march[0] < february[1]);

    let after_failure = calls[february[0] + 1].0 - calls[february[0]].0;
    assert_eq!(calls[february[0] + 1].1, "expenses 2023-03 p1");
    assert!(after_failure >= cooldown + delay, "{:?}", after_failure);

    let before_retry = calls[february[1]].0 - calls[february[1] - 1].0;
    assert!(before_retry >= delay, "{:?}", before_retry);
    assert!(before_retry < cooldown, "{:?}", before_retry);
}
