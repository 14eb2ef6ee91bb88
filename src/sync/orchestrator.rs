/*!
 * Sync orchestration
 *
 * A run is split into units (the legislator roster, one calendar month, a
 * proposition window). Units fail independently: a failed unit is logged,
 * counted and followed by a cooldown, and the run moves on. Only invalid
 * input stops a run before it starts.
 *
 * Consecutive units are separated by the page delay. A backfill month that
 * fails with a transient error (open circuit, exhausted retries, timeout)
 * is tried once more after the other months.
 */

use super::report::{SyncCounters, SyncReport, ROSTER_UNIT};
use super::SyncError;
use crate::config::HansardConfig;
use crate::payload::{convert, Conversion};
use crate::source::{DataSource, ExternalRecord, FetchError, Filters, Window};
use chrono::{Datelike, Days, NaiveDate, Utc};
use futures::StreamExt;
use hansard_core_store::{EntityKind, NaturalKey, Record, RecordStore, SyncMode};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Succeeded,
    Failed,
    /// Failed transiently; worth one more attempt at the end of the run
    Deferred,
    /// Cancelled before or while running
    Interrupted,
}

/// Tunables for a [`Syncer`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub page_size: u32,
    pub max_pages: u32,
    /// Polite pause between pages and between sub-units
    pub page_delay: Duration,
    pub unit_timeout: Duration,
    /// Pause after a failed unit
    pub failure_cooldown: Duration,
    pub max_concurrent_units: usize,
    pub proposition_lookback_days: u32,
    pub run_deadline: Option<Duration>,
}

impl SyncSettings {
    pub fn from_config(config: &HansardConfig) -> Self {
        let sync = &config.sync;
        Self {
            page_size: sync.page_size,
            max_pages: sync.max_pages,
            page_delay: Duration::from_millis(sync.page_delay_ms),
            unit_timeout: Duration::from_secs(sync.unit_timeout_secs),
            failure_cooldown: config.failure_cooldown(),
            max_concurrent_units: sync.max_concurrent_units.max(1),
            proposition_lookback_days: sync.proposition_lookback_days,
            run_deadline: sync.run_deadline_secs.map(Duration::from_secs),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&HansardConfig::default())
    }
}

/// Drives a [`DataSource`] into a [`RecordStore`]
pub struct Syncer<S: ?Sized, R: ?Sized> {
    source: Arc<S>,
    store: Arc<R>,
    settings: SyncSettings,
    today: Option<NaiveDate>,
}

impl<S, R> Syncer<S, R>
where
    S: DataSource + ?Sized,
    R: RecordStore + ?Sized,
{
    pub fn new(source: Arc<S>, store: Arc<R>, settings: SyncSettings) -> Self {
        Self {
            source,
            store,
            settings,
            today: None,
        }
    }

    /// Pin the calendar date used to decide which months exist yet
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Load every month from January of `start_year` through December of
    /// `end_year`, stopping at the current month
    ///
    /// The roster is synced first. Months run up to `max_concurrent_units`
    /// at a time, each under `unit_timeout`.
    pub async fn run_backfill(
        &self,
        cancel: &CancellationToken,
        start_year: i32,
        end_year: i32,
    ) -> Result<SyncReport, SyncError> {
        if start_year > end_year {
            return Err(SyncError::InvalidRange {
                start: start_year,
                end: end_year,
            });
        }

        let today = self.today();
        let current = (today.year(), today.month());
        let months: Vec<(i32, u32)> = (start_year..=end_year)
            .flat_map(|year| (1..=12).map(move |month| (year, month)))
            .filter(|&period| period <= current)
            .collect();

        let window = match (months.first(), months.last()) {
            (Some(&(fy, fm)), Some(&(ly, lm))) => {
                match (Window::month(fy, fm), Window::month(ly, lm)) {
                    (Some(first), Some(last)) => {
                        Some(Window::new(first.start, last.end.min(today)))
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        info!(
            start_year,
            end_year,
            months = months.len(),
            concurrency = self.settings.max_concurrent_units,
            "Starting backfill"
        );

        let started_at = Utc::now();
        let counters = SyncCounters::default();
        let run_cancel = cancel.child_token();

        let body = async {
            let cancel = &run_cancel;
            let counters = &counters;

            self.run_unit(cancel, counters, ROSTER_UNIT, false, self.sync_roster(cancel, counters))
                .await;

            let outcomes: Vec<((i32, u32), UnitOutcome)> = futures::stream::iter(months)
                .map(move |(year, month)| async move {
                    let outcome = self.run_month(cancel, counters, year, month, today, true).await;
                    ((year, month), outcome)
                })
                .buffer_unordered(self.settings.max_concurrent_units.max(1))
                .collect()
                .await;

            let mut deferred: Vec<(i32, u32)> = outcomes
                .into_iter()
                .filter(|(_, outcome)| *outcome == UnitOutcome::Deferred)
                .map(|(period, _)| period)
                .collect();
            deferred.sort_unstable();
            if !deferred.is_empty() {
                info!(months = deferred.len(), "Retrying months that failed transiently");
            }
            for (year, month) in deferred {
                if self.run_month(cancel, counters, year, month, today, false).await
                    == UnitOutcome::Interrupted
                {
                    break;
                }
            }
        };
        self.with_deadline(&run_cancel, body).await;

        Ok(self
            .finish(SyncMode::Backfill, started_at, window, &counters, &run_cancel)
            .await)
    }

    /// Refresh the roster, the current month's expenses and the recent
    /// proposition window
    ///
    /// The window starts one day before the last successful incremental run
    /// finished, or `proposition_lookback_days` ago when there is none.
    pub async fn run_incremental(&self, cancel: &CancellationToken) -> SyncReport {
        let today = self.today();
        let window = self.proposition_window(today).await;

        info!(window = %window, days = window.days(), "Starting incremental sync");

        let started_at = Utc::now();
        let counters = SyncCounters::default();
        let run_cancel = cancel.child_token();

        let body = async {
            let cancel = &run_cancel;
            let counters = &counters;

            self.run_unit(cancel, counters, ROSTER_UNIT, false, self.sync_roster(cancel, counters))
                .await;

            if !self.pause(cancel, self.settings.page_delay).await {
                return;
            }
            let (year, month) = (today.year(), today.month());
            let expenses = Filters::period(year, month);
            let unit = format!("expenses {:04}-{:02}", year, month);
            self.run_unit(
                cancel,
                counters,
                &unit,
                false,
                self.sync_paged(cancel, counters, EntityKind::Expense, &expenses),
            )
            .await;

            if !self.pause(cancel, self.settings.page_delay).await {
                return;
            }
            let unit = format!("propositions {}", window);
            self.run_unit(
                cancel,
                counters,
                &unit,
                false,
                self.sync_window(cancel, counters, EntityKind::Proposition, &window),
            )
            .await;
        };
        self.with_deadline(&run_cancel, body).await;

        self.finish(
            SyncMode::Incremental,
            started_at,
            Some(window),
            &counters,
            &run_cancel,
        )
        .await
    }

    async fn proposition_window(&self, today: NaiveDate) -> Window {
        let lookback = today
            .checked_sub_days(Days::new(u64::from(self.settings.proposition_lookback_days)))
            .unwrap_or(today);

        let start = match self.store.last_successful_run(SyncMode::Incremental).await {
            Ok(Some(run)) => run
                .finished_at
                .date_naive()
                .pred_opt()
                .unwrap_or(lookback),
            Ok(None) => lookback,
            Err(e) => {
                warn!(error = %e, "Cannot read run ledger, using lookback window");
                lookback
            }
        };

        Window::new(start.min(today), today)
    }

    /// Run `body`, cancelling it once the run deadline passes
    async fn with_deadline<F>(&self, run_cancel: &CancellationToken, body: F)
    where
        F: Future<Output = ()>,
    {
        let mut body = std::pin::pin!(body);
        let deadline = async {
            match self.settings.run_deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let expired = tokio::select! {
            _ = &mut body => false,
            _ = deadline => true,
        };

        if expired {
            warn!(
                deadline_secs = self.settings.run_deadline.map(|d| d.as_secs()),
                "Run deadline reached, cancelling remaining work"
            );
            run_cancel.cancel();
            body.await;
        }
    }

    async fn finish(
        &self,
        mode: SyncMode,
        started_at: chrono::DateTime<Utc>,
        window: Option<Window>,
        counters: &SyncCounters,
        run_cancel: &CancellationToken,
    ) -> SyncReport {
        let report = SyncReport {
            mode,
            started_at,
            finished_at: Utc::now(),
            window,
            counts: counters.snapshot(),
            roster_synced: counters.roster_synced(),
            failed_units: counters.failed_units(),
            cancelled: run_cancel.is_cancelled(),
        };

        let c = &report.counts;
        info!(
            mode = %mode,
            status = %report.status(),
            roster_synced = report.roster_synced,
            units_succeeded = c.units_succeeded,
            units_failed = c.units_failed,
            fetched = c.records_fetched,
            persisted = c.records_persisted,
            skipped = c.records_skipped,
            failed = c.records_failed,
            "Sync finished"
        );

        if let Err(e) = self.store.record_run(&report.to_run()).await {
            warn!(error = %e, "Failed to record run in ledger");
        }

        report
    }

    /// Run one calendar month as a unit, after the polite delay
    async fn run_month(
        &self,
        cancel: &CancellationToken,
        counters: &SyncCounters,
        year: i32,
        month: u32,
        today: NaiveDate,
        defer_transient: bool,
    ) -> UnitOutcome {
        if !self.pause(cancel, self.settings.page_delay).await {
            return UnitOutcome::Interrupted;
        }
        let unit = format!("{:04}-{:02}", year, month);
        self.run_unit(
            cancel,
            counters,
            &unit,
            defer_transient,
            self.sync_month(cancel, counters, year, month, today),
        )
        .await
    }

    /// Run one unit under the unit timeout and account for its outcome
    ///
    /// With `defer_transient`, a transient failure is neither counted nor
    /// recorded; the caller is expected to run the unit again.
    async fn run_unit<F>(
        &self,
        cancel: &CancellationToken,
        counters: &SyncCounters,
        unit: &str,
        defer_transient: bool,
        work: F,
    ) -> UnitOutcome
    where
        F: Future<Output = Result<(), FetchError>>,
    {
        if cancel.is_cancelled() {
            return UnitOutcome::Interrupted;
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(self.settings.unit_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.settings.unit_timeout)),
        };

        let outcome = match result {
            Ok(()) => {
                counters.unit_succeeded(unit);
                debug!(unit, elapsed_ms = started.elapsed().as_millis() as u64, "Unit complete");
                return UnitOutcome::Succeeded;
            }
            Err(e) if e.is_cancellation() => {
                info!(unit, "Unit interrupted by cancellation");
                return UnitOutcome::Interrupted;
            }
            Err(e) if defer_transient && e.is_transient() => {
                warn!(unit, error = %e, "Unit failed transiently, will retry at end of run");
                UnitOutcome::Deferred
            }
            Err(e) => {
                error!(unit, error = %e, transient = e.is_transient(), "Unit failed, skipping");
                counters.unit_failed(unit);
                UnitOutcome::Failed
            }
        };

        self.pause(cancel, self.settings.failure_cooldown).await;
        outcome
    }

    async fn sync_roster(
        &self,
        cancel: &CancellationToken,
        counters: &SyncCounters,
    ) -> Result<(), FetchError> {
        self.sync_paged(cancel, counters, EntityKind::Legislator, &Filters::new())
            .await
    }

    async fn sync_month(
        &self,
        cancel: &CancellationToken,
        counters: &SyncCounters,
        year: i32,
        month: u32,
        today: NaiveDate,
    ) -> Result<(), FetchError> {
        self.sync_paged(cancel, counters, EntityKind::Expense, &Filters::period(year, month))
            .await?;

        if !self.pause(cancel, self.settings.page_delay).await {
            return Err(FetchError::Cancelled);
        }

        let Some(month_window) = Window::month(year, month) else {
            return Ok(());
        };
        let window = Window::new(month_window.start, month_window.end.min(today));
        if !window.is_whole_month() {
            debug!(window = %window, "Month still in progress, window ends today");
        }
        self.sync_window(cancel, counters, EntityKind::Proposition, &window)
            .await
    }

    /// Page through a listing until an empty page or the page ceiling
    async fn sync_paged(
        &self,
        cancel: &CancellationToken,
        counters: &SyncCounters,
        entity: EntityKind,
        filters: &Filters,
    ) -> Result<(), FetchError> {
        let mut page = 1;
        loop {
            if page > self.settings.max_pages {
                warn!(
                    entity = %entity,
                    max_pages = self.settings.max_pages,
                    "Page ceiling reached, stopping pagination"
                );
                break;
            }
            if page > 1 && !self.pause(cancel, self.settings.page_delay).await {
                return Err(FetchError::Cancelled);
            }

            let raw = self
                .source
                .list_page(cancel, entity, filters, page, self.settings.page_size)
                .await?;
            if raw.is_empty() {
                break;
            }
            debug!(entity = %entity, page, records = raw.len(), "Fetched page");

            counters.fetched(raw.len());
            let records = self.persist(entity, &raw, counters).await;
            if entity == EntityKind::Expense {
                self.ensure_legislators(cancel, counters, &records).await?;
            }

            page += 1;
        }
        Ok(())
    }

    async fn sync_window(
        &self,
        cancel: &CancellationToken,
        counters: &SyncCounters,
        entity: EntityKind,
        window: &Window,
    ) -> Result<(), FetchError> {
        let raw = self.source.list_by_window(cancel, entity, window).await?;
        debug!(entity = %entity, window = %window, records = raw.len(), "Fetched window");

        counters.fetched(raw.len());
        self.persist(entity, &raw, counters).await;
        Ok(())
    }

    /// Convert and upsert a batch, falling back to one record at a time
    ///
    /// Returns the converted records.
    async fn persist(
        &self,
        entity: EntityKind,
        raw: &[ExternalRecord],
        counters: &SyncCounters,
    ) -> Vec<Record> {
        let mut records = Vec::with_capacity(raw.len());
        for item in raw {
            match convert(entity, item) {
                Conversion::Record(record) => records.push(record),
                Conversion::Skip { reason } => {
                    warn!(entity = %entity, reason = %reason, "Skipping record");
                    counters.skipped(1);
                }
            }
        }
        if records.is_empty() {
            return records;
        }

        match self.store.upsert_batch(&records).await {
            Ok(written) => counters.persisted(written),
            Err(e) => {
                warn!(
                    entity = %entity,
                    records = records.len(),
                    error = %e,
                    "Batch upsert failed, retrying record by record"
                );
                for record in &records {
                    match self.store.upsert(record).await {
                        Ok(()) => counters.persisted(1),
                        Err(e) if e.is_record_level() => {
                            warn!(key = %record.natural_key(), error = %e, "Record rejected");
                            counters.record_failed();
                        }
                        Err(e) => {
                            error!(key = %record.natural_key(), error = %e, "Store failed to persist record");
                            counters.record_failed();
                        }
                    }
                }
            }
        }

        records
    }

    /// Fetch legislators referenced by expenses but missing from the store
    async fn ensure_legislators(
        &self,
        cancel: &CancellationToken,
        counters: &SyncCounters,
        records: &[Record],
    ) -> Result<(), FetchError> {
        let ids: BTreeSet<i64> = records
            .iter()
            .filter_map(|record| match record {
                Record::Expense(expense) => Some(expense.legislator_id),
                _ => None,
            })
            .collect();

        for id in ids {
            match self.store.get(&NaturalKey::Legislator(id)).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    warn!(legislator_id = id, error = %e, "Cannot look up legislator");
                    continue;
                }
            }

            match self.source.get_by_id(cancel, EntityKind::Legislator, id).await {
                Ok(Some(raw)) => {
                    counters.fetched(1);
                    self.persist(EntityKind::Legislator, std::slice::from_ref(&raw), counters)
                        .await;
                }
                Ok(None) => {
                    warn!(legislator_id = id, "Expense references unknown legislator");
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    warn!(legislator_id = id, error = %e, "Cannot fetch missing legislator");
                }
            }
        }
        Ok(())
    }

    /// Sleep for `duration` unless cancelled; false when cancelled
    async fn pause(&self, cancel: &CancellationToken, duration: Duration) -> bool {
        if duration.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
