//! Bulk sweep against a live database

mod common;

use event_system::recording::{CallKind, RecordingListener};
use event_system::{ListenerRegistry, TableName};
use search_indexer::{BulkConfig, BulkIndexer};
use std::sync::Arc;

#[tokio::test]
async fn test_index_all_completes_for_populated_table() {
    let Some(db) = common::setup().await else {
        return;
    };

    sqlx::query(
        "INSERT INTO repositories (id, name, owner)
         SELECT lpad(n::text, 6, '0'), 'chart-' || n, 'u1' FROM generate_series(1, 1203) AS n",
    )
    .execute(&db.pool)
    .await
    .unwrap();

    let recorder = Arc::new(RecordingListener::new("recorder"));
    let registry = Arc::new(ListenerRegistry::new());
    registry.append(recorder.clone());

    let report = BulkIndexer::new(db.pool.clone(), registry, &BulkConfig { batch_size: 500 })
        .index_all()
        .await;

    assert!(report.is_complete(), "{report:?}");
    let repositories = report.table(TableName::Repositories).unwrap();
    assert_eq!(repositories.rows, 1203);
    assert_eq!(repositories.batches, 3);
    for table in [TableName::Users, TableName::Organizations, TableName::RepositoryReleases] {
        assert_eq!(report.table(table).unwrap().rows, 0);
    }

    let calls = recorder.log().calls();
    assert_eq!(calls.len(), 1203);
    assert!(calls.iter().all(|call| call.kind == CallKind::Create
        && call.table == Some(TableName::Repositories)));

    // Keyset pages hand rows over in id order
    let ids: Vec<_> = calls.iter().filter_map(|call| call.id.clone()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn test_exact_multiple_of_batch_size() {
    let Some(db) = common::setup().await else {
        return;
    };

    sqlx::query(
        "INSERT INTO users (id, username)
         SELECT 'u' || lpad(n::text, 3, '0'), 'user-' || n FROM generate_series(1, 10) AS n",
    )
    .execute(&db.pool)
    .await
    .unwrap();

    let registry = Arc::new(ListenerRegistry::new());
    let report = BulkIndexer::new(db.pool.clone(), registry, &BulkConfig { batch_size: 5 })
        .index_all()
        .await;

    let users = report.table(TableName::Users).unwrap();
    assert_eq!(users.rows, 10);
    // Two full pages and a final empty one
    assert_eq!(users.batches, 3);
}
