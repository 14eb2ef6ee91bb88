//! SQLite backend implementation
//!
//! Provides persistent storage using SQLite with WAL mode for concurrency.
//! Every write is an `INSERT ... ON CONFLICT (<natural key>) DO UPDATE`, so
//! the database's uniqueness constraint is what makes concurrent upserts of
//! the same key collapse to one row.

use crate::{
    EntityKind, Expense, Legislator, NaturalKey, Proposition, Record, RecordStore, Result,
    RunCounts, RunStatus, StoreError, SyncMode, SyncRun,
};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Executor, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const UPSERT_LEGISLATOR: &str = "INSERT INTO legislators (legislator_id, name, party, state, email)
     VALUES (?, ?, ?, ?, ?)
     ON CONFLICT (legislator_id) DO UPDATE SET
         name = excluded.name,
         party = excluded.party,
         state = excluded.state,
         email = excluded.email,
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const UPSERT_EXPENSE: &str = "INSERT INTO expenses
         (legislator_id, document_code, year, month, expense_type, supplier, amount_cents, document_date)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT (legislator_id, document_code, year, month) DO UPDATE SET
         expense_type = excluded.expense_type,
         supplier = excluded.supplier,
         amount_cents = excluded.amount_cents,
         document_date = excluded.document_date,
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const UPSERT_PROPOSITION: &str = "INSERT INTO propositions
         (proposition_id, kind, number, year, summary, presented_at)
     VALUES (?, ?, ?, ?, ?, ?)
     ON CONFLICT (proposition_id) DO UPDATE SET
         kind = excluded.kind,
         number = excluded.number,
         year = excluded.year,
         summary = excluded.summary,
         presented_at = excluded.presented_at,
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const RUN_COLUMNS: &str = "id, mode, status, started_at, finished_at, window_start, window_end,
     units_succeeded, units_failed, records_fetched, records_persisted, records_skipped, records_failed";

/// SQLite-backed record store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a SQLite database at the specified path
    ///
    /// Automatically runs migrations to set up the schema.
    pub async fn open(path: &str) -> Result<Self> {
        let db_url = if path.starts_with("sqlite://") {
            path.to_string()
        } else {
            format!("sqlite://{}", path)
        };

        // WAL lets the status command read while a sync is writing
        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        debug!(path, "Opened SQLite record store");
        Ok(Self { pool })
    }

    /// Get the underlying pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn write_record<'e, E>(executor: E, record: &Record) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    match record {
        Record::Legislator(l) => {
            sqlx::query(UPSERT_LEGISLATOR)
                .bind(l.legislator_id)
                .bind(&l.name)
                .bind(&l.party)
                .bind(&l.state)
                .bind(l.email.as_deref())
                .execute(executor)
                .await?;
        }
        Record::Expense(e) => {
            sqlx::query(UPSERT_EXPENSE)
                .bind(e.legislator_id)
                .bind(&e.document_code)
                .bind(e.year)
                .bind(i64::from(e.month))
                .bind(&e.expense_type)
                .bind(&e.supplier)
                .bind(e.amount_cents)
                .bind(e.document_date)
                .execute(executor)
                .await?;
        }
        Record::Proposition(p) => {
            sqlx::query(UPSERT_PROPOSITION)
                .bind(p.proposition_id)
                .bind(&p.kind)
                .bind(p.number)
                .bind(p.year)
                .bind(&p.summary)
                .bind(p.presented_at)
                .execute(executor)
                .await?;
        }
    }
    Ok(())
}

fn to_u64(row: &SqliteRow, column: &'static str) -> Result<u64> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn row_to_run(row: &SqliteRow) -> Result<SyncRun> {
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;

    Ok(SyncRun {
        id: Some(row.try_get("id")?),
        mode: SyncMode::from_str(&mode)?,
        status: RunStatus::from_str(&status)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
        counts: RunCounts {
            units_succeeded: to_u64(row, "units_succeeded")?,
            units_failed: to_u64(row, "units_failed")?,
            records_fetched: to_u64(row, "records_fetched")?,
            records_persisted: to_u64(row, "records_persisted")?,
            records_skipped: to_u64(row, "records_skipped")?,
            records_failed: to_u64(row, "records_failed")?,
        },
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(&self, record: &Record) -> Result<()> {
        record.validate()?;
        write_record(&self.pool, record).await
    }

    async fn upsert_batch(&self, records: &[Record]) -> Result<usize> {
        for record in records {
            record.validate()?;
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            write_record(&mut *tx, record).await?;
        }
        tx.commit().await?;

        Ok(records.len())
    }

    async fn get(&self, key: &NaturalKey) -> Result<Option<Record>> {
        let record = match key {
            NaturalKey::Legislator(id) => sqlx::query(
                "SELECT legislator_id, name, party, state, email FROM legislators
                 WHERE legislator_id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| -> Result<Record> {
                Ok(Record::Legislator(Legislator {
                    legislator_id: row.try_get("legislator_id")?,
                    name: row.try_get("name")?,
                    party: row.try_get("party")?,
                    state: row.try_get("state")?,
                    email: row.try_get("email")?,
                }))
            }),
            NaturalKey::Expense {
                legislator_id,
                document_code,
                year,
                month,
            } => sqlx::query(
                "SELECT legislator_id, document_code, year, month, expense_type, supplier,
                        amount_cents, document_date
                 FROM expenses
                 WHERE legislator_id = ? AND document_code = ? AND year = ? AND month = ?",
            )
            .bind(legislator_id)
            .bind(document_code)
            .bind(year)
            .bind(i64::from(*month))
            .fetch_optional(&self.pool)
            .await?
            .map(|row| -> Result<Record> {
                let month: i64 = row.try_get("month")?;
                Ok(Record::Expense(Expense {
                    legislator_id: row.try_get("legislator_id")?,
                    document_code: row.try_get("document_code")?,
                    year: row.try_get("year")?,
                    month: u32::try_from(month).map_err(|_| StoreError::Corrupt {
                        column: "month",
                        value: month.to_string(),
                    })?,
                    expense_type: row.try_get("expense_type")?,
                    supplier: row.try_get("supplier")?,
                    amount_cents: row.try_get("amount_cents")?,
                    document_date: row.try_get("document_date")?,
                }))
            }),
            NaturalKey::Proposition(id) => sqlx::query(
                "SELECT proposition_id, kind, number, year, summary, presented_at
                 FROM propositions WHERE proposition_id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| -> Result<Record> {
                Ok(Record::Proposition(Proposition {
                    proposition_id: row.try_get("proposition_id")?,
                    kind: row.try_get("kind")?,
                    number: row.try_get("number")?,
                    year: row.try_get("year")?,
                    summary: row.try_get("summary")?,
                    presented_at: row.try_get("presented_at")?,
                }))
            }),
        };

        record.transpose()
    }

    async fn count(&self, kind: EntityKind) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", kind.table());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        to_u64(&row, "n")
    }

    async fn record_run(&self, run: &SyncRun) -> Result<i64> {
        let c = &run.counts;
        let result = sqlx::query(
            "INSERT INTO sync_runs (mode, status, started_at, finished_at, window_start, window_end,
                 units_succeeded, units_failed, records_fetched, records_persisted,
                 records_skipped, records_failed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.mode.to_string())
        .bind(run.status.to_string())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.window_start)
        .bind(run.window_end)
        .bind(c.units_succeeded as i64)
        .bind(c.units_failed as i64)
        .bind(c.records_fetched as i64)
        .bind(c.records_persisted as i64)
        .bind(c.records_skipped as i64)
        .bind(c.records_failed as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn last_successful_run(&self, mode: SyncMode) -> Result<Option<SyncRun>> {
        let sql = format!(
            "SELECT {} FROM sync_runs WHERE mode = ? AND status = 'success'
             ORDER BY finished_at DESC, id DESC LIMIT 1",
            RUN_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(mode.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_run).transpose()
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let sql = format!(
            "SELECT {} FROM sync_runs ORDER BY id DESC LIMIT ?",
            RUN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_run).collect()
    }
}
