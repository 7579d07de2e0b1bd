use tollgate_core::models::{DedupRecord, Listing};
use tollgate_core::traits::DurableStore;
use tollgate_core::{DedupConfig, DedupStore};
use tollgate_db::{Database, DedupRepository};

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn put_and_get_record() {
    let (pool, _container) = setup_test_db().await;
    let repo = DedupRepository::new(pool);

    let record = DedupRecord::new(
        "https://acme.com/jobs/1",
        serde_json::json!({"title": "Backend Engineer"}),
    );
    repo.put(&record).await.unwrap();

    let stored = repo
        .get(&record.key)
        .await
        .unwrap()
        .expect("Should find the record");

    assert_eq!(stored.key, record.key);
    assert_eq!(stored.url, "https://acme.com/jobs/1");
    assert_eq!(stored.payload["title"], "Backend Engineer");
    assert!(repo.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn resave_keeps_first_seen_at() {
    let (pool, _container) = setup_test_db().await;
    let repo = DedupRepository::new(pool);

    let mut first = DedupRecord::new("https://acme.com/jobs/1", serde_json::Value::Null);
    first.first_seen_at -= chrono::Duration::days(7);
    repo.put(&first).await.unwrap();

    let second = DedupRecord::new(
        "https://acme.com/jobs/1",
        serde_json::json!({"title": "Renamed"}),
    );
    repo.put(&second).await.unwrap();

    let stored = repo.get(&first.key).await.unwrap().unwrap();
    assert_eq!(
        stored.first_seen_at.timestamp(),
        first.first_seen_at.timestamp()
    );
    assert_eq!(stored.payload["title"], "Renamed");
    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn put_batch_and_keys() {
    let (pool, _container) = setup_test_db().await;
    let repo = DedupRepository::new(pool);

    let records: Vec<_> = (0..5)
        .map(|i| DedupRecord::new(format!("https://acme.com/jobs/{i}"), serde_json::Value::Null))
        .collect();
    repo.put_batch(&records).await.unwrap();

    let mut keys = repo.keys().await.unwrap();
    keys.sort();
    let mut expected: Vec<_> = records.iter().map(|r| r.key.clone()).collect();
    expected.sort();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn delete_reports_existence() {
    let (pool, _container) = setup_test_db().await;
    let repo = DedupRepository::new(pool);

    let record = DedupRecord::new("https://acme.com/jobs/1", serde_json::Value::Null);
    repo.put(&record).await.unwrap();

    assert!(repo.delete(&record.key).await.unwrap());
    assert!(!repo.delete(&record.key).await.unwrap());
    assert_eq!(repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn dedup_store_survives_restart() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);

    let store = DedupStore::new(db.dedup_repo(), DedupConfig { batch_size: 2 });
    let saved = store
        .record_batch(&[
            Listing::new("A", "https://acme.com/jobs/1/"),
            Listing::new("B", "https://acme.com/jobs/2"),
            Listing::new("C", "https://acme.com/jobs/3"),
        ])
        .await
        .unwrap();
    assert_eq!(saved, 3);

    // A fresh store loads its membership set from the table.
    let reopened = DedupStore::new(db.dedup_repo(), DedupConfig::default());
    assert!(reopened.is_seen("https://ACME.com/jobs/1").await.unwrap());
    assert!(!reopened.is_seen("https://acme.com/jobs/9").await.unwrap());
    assert_eq!(reopened.known_count().await.unwrap(), 3);
}

#[tokio::test]
async fn migrate_runs_over_existing_schema() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);

    db.migrate().await.unwrap();
    db.migrate().await.unwrap();

    let repo = db.dedup_repo();
    repo.put(&DedupRecord::new("https://acme.com/jobs/1", serde_json::Value::Null))
        .await
        .unwrap();
    assert_eq!(repo.count().await.unwrap(), 1);
}
