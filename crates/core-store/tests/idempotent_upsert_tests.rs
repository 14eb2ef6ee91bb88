//! Idempotence tests that run against every backend

use hansard_core_store::{
    open, EntityKind, Legislator, MemoryStore, NaturalKey, Proposition, Record, RecordStore,
    SqliteStore,
};
use std::sync::Arc;
use tempfile::TempDir;

fn legislator(id: i64, name: &str) -> Record {
    Record::from(Legislator {
        legislator_id: id,
        name: name.to_string(),
        party: "XYZ".to_string(),
        state: "MG".to_string(),
        email: Some(format!("dep.{}@camara.example", id)),
    })
}

fn proposition(id: i64, summary: &str) -> Record {
    Record::from(Proposition {
        proposition_id: id,
        kind: "PL".to_string(),
        number: id * 10,
        year: 2024,
        summary: summary.to_string(),
        presented_at: None,
    })
}

async fn backends(dir: &TempDir) -> Vec<(&'static str, Arc<dyn RecordStore>)> {
    let db = dir.path().join("hansard.db");
    let sqlite = SqliteStore::open(db.to_str().unwrap()).await.unwrap();
    vec![
        ("memory", Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>),
        ("sqlite", Arc::new(sqlite) as Arc<dyn RecordStore>),
    ]
}

#[tokio::test]
async fn test_overlapping_batches_converge() {
    let dir = TempDir::new().unwrap();
    for (name, store) in backends(&dir).await {
        // Two syncs whose windows overlap on proposition 2
        store
            .upsert_batch(&[proposition(1, "first"), proposition(2, "draft")])
            .await
            .unwrap();
        store
            .upsert_batch(&[proposition(2, "final"), proposition(3, "third")])
            .await
            .unwrap();

        assert_eq!(store.count(EntityKind::Proposition).await.unwrap(), 3, "{}", name);
        assert_eq!(
            store.get(&NaturalKey::Proposition(2)).await.unwrap(),
            Some(proposition(2, "final")),
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_concurrent_upserts_of_same_key_leave_one_row() {
    let dir = TempDir::new().unwrap();
    for (name, store) in backends(&dir).await {
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(&legislator(77, &format!("writer {}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count(EntityKind::Legislator).await.unwrap(), 1, "{}", name);
    }
}

#[tokio::test]
async fn test_kinds_are_counted_separately() {
    let store = open(":memory:").await.unwrap();
    store.upsert(&legislator(1, "A")).await.unwrap();
    store.upsert(&proposition(1, "B")).await.unwrap();

    assert_eq!(store.count(EntityKind::Legislator).await.unwrap(), 1);
    assert_eq!(store.count(EntityKind::Proposition).await.unwrap(), 1);
    assert_eq!(store.count(EntityKind::Expense).await.unwrap(), 0);
}

#[tokio::test]
async fn test_open_creates_sqlite_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested.db");
    let store = open(path.to_str().unwrap()).await.unwrap();

    store.upsert(&legislator(5, "Persisted")).await.unwrap();
    drop(store);

    let reopened = open(path.to_str().unwrap()).await.unwrap();
    assert_eq!(
        reopened.get(&NaturalKey::Legislator(5)).await.unwrap(),
        Some(legislator(5, "Persisted"))
    );
}
