//! Listener that keeps a search backend in sync with the database
//!
//! Every row is coerced into its document shape and checked against the
//! [`VersionLedger`] before it is written, so a stale copy of a row (for
//! example a bulk sweep page racing a live update) never replaces a newer one.
//! Deletes record a tombstone one tick after the deleted row's version.
//!
//! The ledger check and the write for one document run under a per-document
//! lock, so within a process an admitted older write cannot land after a newer
//! one. Across processes only Elasticsearch enforces the order itself, through
//! external versions; with Meilisearch it is best effort.
//!
//! Failures are logged and swallowed; one bad row or a flaky backend must not
//! stop delivery to the other listeners.

use async_trait::async_trait;
use cache_system::VersionLedger;
use event_system::{row_id, Listener, RowSnapshot, TableName};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::SearchClient;
use crate::documents::{all_indexes, index_name, row_version, DocumentError, SearchDocument};
use crate::errors::SearchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Stale,
}

/// Stripes of the per-document write lock
const WRITE_LOCKS: usize = 64;

pub struct SearchListener {
    name: String,
    client: Arc<dyn SearchClient>,
    ledger: Arc<dyn VersionLedger>,
    write_locks: Box<[Mutex<()>]>,
}

impl std::fmt::Debug for SearchListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchListener")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SearchListener {
    pub fn new(client: Arc<dyn SearchClient>, ledger: Arc<dyn VersionLedger>) -> Self {
        Self {
            name: client.backend().to_string(),
            client,
            ledger,
            write_locks: (0..WRITE_LOCKS).map(|_| Mutex::new(())).collect(),
        }
    }

    fn write_lock(&self, table: TableName, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        table.hash(&mut hasher);
        id.hash(&mut hasher);
        let stripe = (hasher.finish() % self.write_locks.len() as u64) as usize;
        &self.write_locks[stripe]
    }

    /// Check the backend is reachable and create missing indexes
    pub async fn prepare(&self) -> Result<(), SearchError> {
        self.client.health().await?;
        self.client.ensure_indexes(&all_indexes()).await
    }

    async fn upsert_row(&self, table: TableName, payload: &RowSnapshot) -> Result<Outcome, SearchError> {
        let document = SearchDocument::from_row(table, payload)?;
        let body = document.to_json()?;
        let version = document.version();

        let _guard = self.write_lock(table, document.id()).lock().await;
        if let Some(version) = version {
            if !self.ledger.admit(table.as_str(), document.id(), version).await? {
                return Ok(Outcome::Stale);
            }
        }

        let written = self
            .client
            .upsert(document.index(), document.id(), &body, version)
            .await;
        applied(written)
    }

    async fn delete_row(&self, table: TableName, payload: &RowSnapshot) -> Result<Outcome, SearchError> {
        let id = row_id(payload).ok_or(DocumentError::MissingId)?;
        let tombstone = row_version(payload).map(|version| version.saturating_add(1));

        let _guard = self.write_lock(table, &id).lock().await;
        if let Some(tombstone) = tombstone {
            if !self.ledger.admit(table.as_str(), &id, tombstone).await? {
                return Ok(Outcome::Stale);
            }
        }

        let written = self.client.delete(index_name(table), &id, tombstone).await;
        applied(written)
    }

    fn report(
        &self,
        operation: &'static str,
        table: TableName,
        payload: &RowSnapshot,
        result: Result<Outcome, SearchError>,
    ) {
        let id = row_id(payload);
        let id = id.as_deref().unwrap_or("<none>");
        match result {
            Ok(Outcome::Applied) => {
                debug!(listener = %self.name, operation, table = %table, id, "search document written");
            }
            Ok(Outcome::Stale) => {
                debug!(listener = %self.name, operation, table = %table, id, "skipped stale row version");
            }
            Err(err) => {
                warn!(
                    listener = %self.name,
                    operation,
                    table = %table,
                    id,
                    error = %err,
                    "failed to apply row to search index"
                );
            }
        }
    }
}

/// A write the backend refused as older than what it holds is a stale row
fn applied(written: Result<(), SearchError>) -> Result<Outcome, SearchError> {
    match written {
        Ok(()) => Ok(Outcome::Applied),
        Err(SearchError::VersionConflict { .. }) => Ok(Outcome::Stale),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl Listener for SearchListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connected(&self) {
        match self.prepare().await {
            Ok(()) => info!(listener = %self.name, "search backend ready"),
            Err(err) => warn!(listener = %self.name, error = %err, "search backend is not ready"),
        }
    }

    async fn disposed(&self) {
        debug!(listener = %self.name, "search listener disposed");
    }

    async fn create(&self, table: TableName, payload: &RowSnapshot) {
        let result = self.upsert_row(table, payload).await;
        self.report("create", table, payload, result);
    }

    async fn update(&self, table: TableName, payload: &RowSnapshot) {
        let result = self.upsert_row(table, payload).await;
        self.report("update", table, payload, result);
    }

    async fn delete(&self, table: TableName, payload: &RowSnapshot) {
        let result = self.delete_row(table, payload).await;
        self.report("delete", table, payload, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndex;
    use cache_system::MemoryLedger;
    use serde_json::json;

    fn repository(id: &str, name: &str, updated_at: &str) -> RowSnapshot {
        json!({
            "id": id,
            "name": name,
            "owner": "42",
            "updated_at": updated_at
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn listener() -> (Arc<MemoryIndex>, SearchListener) {
        let index = Arc::new(MemoryIndex::new());
        let listener = SearchListener::new(index.clone(), Arc::new(MemoryLedger::new()));
        (index, listener)
    }

    const T1: &str = "2024-03-01T10:00:00+00:00";
    const T2: &str = "2024-03-01T11:00:00+00:00";

    #[tokio::test]
    async fn test_repeated_create_is_idempotent() {
        let (index, listener) = listener();
        let row = repository("r1", "hello", T1);

        listener.create(TableName::Repositories, &row).await;
        listener.create(TableName::Repositories, &row).await;

        assert_eq!(index.len("charted-repositories"), 1);
        let doc = index.document("charted-repositories", "r1").unwrap();
        assert_eq!(doc["name"], "hello");
    }

    #[tokio::test]
    async fn test_stale_update_is_skipped() {
        let (index, listener) = listener();

        listener
            .update(TableName::Repositories, &repository("r1", "renamed", T2))
            .await;
        listener
            .create(TableName::Repositories, &repository("r1", "original", T1))
            .await;

        let doc = index.document("charted-repositories", "r1").unwrap();
        assert_eq!(doc["name"], "renamed");
        assert_eq!(index.writes(), 1);
    }

    #[tokio::test]
    async fn test_delete_wins_over_late_copy() {
        let (index, listener) = listener();
        let row = repository("r1", "hello", T1);

        listener.create(TableName::Repositories, &row).await;
        listener.delete(TableName::Repositories, &row).await;
        listener.create(TableName::Repositories, &row).await;

        assert!(index.document("charted-repositories", "r1").is_none());
    }

    #[tokio::test]
    async fn test_rows_without_versions_apply_in_arrival_order() {
        let (index, listener) = listener();
        let first = json!({ "id": "u1", "username": "first" }).as_object().cloned().unwrap();
        let second = json!({ "id": "u1", "username": "second" }).as_object().cloned().unwrap();

        listener.create(TableName::Users, &first).await;
        listener.update(TableName::Users, &second).await;

        let doc = index.document("charted-users", "u1").unwrap();
        assert_eq!(doc["username"], "second");
    }

    #[tokio::test]
    async fn test_bad_rows_are_logged_not_written() {
        let (index, listener) = listener();
        let no_id = json!({ "username": "ghost" }).as_object().cloned().unwrap();

        listener.create(TableName::Users, &no_id).await;
        listener.delete(TableName::Users, &no_id).await;

        assert_eq!(index.writes(), 0);
    }

    /// Holds back writes of documents named "slow"
    struct SlowIndex {
        inner: MemoryIndex,
    }

    #[async_trait]
    impl SearchClient for SlowIndex {
        fn backend(&self) -> &'static str {
            "slow"
        }

        async fn health(&self) -> Result<(), SearchError> {
            self.inner.health().await
        }

        async fn ensure_indexes(&self, indexes: &[&str]) -> Result<(), SearchError> {
            self.inner.ensure_indexes(indexes).await
        }

        async fn upsert(
            &self,
            index: &str,
            id: &str,
            document: &serde_json::Value,
            version: Option<i64>,
        ) -> Result<(), SearchError> {
            if document["name"] == "slow" {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.inner.upsert(index, id, document, version).await
        }

        async fn delete(&self, index: &str, id: &str, version: Option<i64>) -> Result<(), SearchError> {
            self.inner.delete(index, id, version).await
        }
    }

    #[tokio::test]
    async fn test_slow_older_write_does_not_overtake_newer_one() {
        let index = Arc::new(SlowIndex {
            inner: MemoryIndex::new(),
        });
        let listener = Arc::new(SearchListener::new(index.clone(), Arc::new(MemoryLedger::new())));

        let sweep = {
            let listener = listener.clone();
            tokio::spawn(async move {
                listener
                    .create(TableName::Repositories, &repository("r1", "slow", T1))
                    .await;
            })
        };
        // Let the older copy get admitted and start writing
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        listener
            .update(TableName::Repositories, &repository("r1", "fresh", T2))
            .await;
        sweep.await.unwrap();

        let doc = index.inner.document("charted-repositories", "r1").unwrap();
        assert_eq!(doc["name"], "fresh");
        assert_eq!(index.inner.writes(), 2);
    }

    /// Backend that enforces versions itself and rejects everything
    struct RejectingIndex;

    #[async_trait]
    impl SearchClient for RejectingIndex {
        fn backend(&self) -> &'static str {
            "rejecting"
        }

        async fn health(&self) -> Result<(), SearchError> {
            Ok(())
        }

        async fn ensure_indexes(&self, _indexes: &[&str]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn upsert(
            &self,
            index: &str,
            id: &str,
            _document: &serde_json::Value,
            _version: Option<i64>,
        ) -> Result<(), SearchError> {
            Err(SearchError::VersionConflict {
                backend: "rejecting",
                index: index.to_string(),
                id: id.to_string(),
            })
        }

        async fn delete(&self, _index: &str, _id: &str, _version: Option<i64>) -> Result<(), SearchError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_backend_version_conflict_counts_as_stale() {
        let listener = SearchListener::new(Arc::new(RejectingIndex), Arc::new(MemoryLedger::new()));
        let outcome = listener
            .upsert_row(TableName::Repositories, &repository("r1", "hello", T1))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Stale);
    }

    #[tokio::test]
    async fn test_connected_creates_indexes_when_healthy() {
        let (index, listener) = listener();

        index.set_healthy(false);
        listener.connected().await;
        assert!(!index.has_index("charted-users"));

        index.set_healthy(true);
        listener.connected().await;
        for name in all_indexes() {
            assert!(index.has_index(name));
        }
        assert_eq!(listener.name(), "memory");
    }
}
