//! In-memory backend
//!
//! Keyed by natural key, so it has the same idempotence as the SQL backend.
//! Nothing survives the process.

use crate::{
    EntityKind, NaturalKey, Record, RecordStore, Result, RunStatus, SyncMode, SyncRun,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Record store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<NaturalKey, Record>>,
    runs: Mutex<Vec<SyncRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record of one kind
    pub fn records_of(&self, kind: EntityKind) -> Vec<Record> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, record: &Record) -> Result<()> {
        record.validate()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.natural_key(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &NaturalKey) -> Result<Option<Record>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(key).cloned())
    }

    async fn count(&self, kind: EntityKind) -> Result<u64> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.keys().filter(|k| k.kind() == kind).count() as u64)
    }

    async fn record_run(&self, run: &SyncRun) -> Result<i64> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let id = runs.len() as i64 + 1;
        let mut stored = run.clone();
        stored.id = Some(id);
        runs.push(stored);
        Ok(id)
    }

    async fn last_successful_run(&self, mode: SyncMode) -> Result<Option<SyncRun>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(runs
            .iter()
            .filter(|r| r.mode == mode && r.status == RunStatus::Success)
            .max_by_key(|r| (r.finished_at, r.id))
            .cloned())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }
}
