//! In-memory search client used as a test double

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::client::SearchClient;
use crate::errors::SearchError;

/// Stores documents in a map of index name to `id -> document`
#[derive(Debug)]
pub struct MemoryIndex {
    documents: Mutex<HashMap<String, HashMap<String, Value>>>,
    healthy: AtomicBool,
    writes: AtomicU64,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Value>>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.documents().get(index)?.get(id).cloned()
    }

    /// Documents in `index`, or 0 if it does not exist
    pub fn len(&self, index: &str) -> usize {
        self.documents().get(index).map(HashMap::len).unwrap_or(0)
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.documents().contains_key(index)
    }

    /// Upserts and deletes applied so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SearchClient for MemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn health(&self) -> Result<(), SearchError> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(SearchError::Unhealthy {
                backend: "memory",
                reason: "marked unhealthy".to_string(),
            })
        }
    }

    async fn ensure_indexes(&self, indexes: &[&str]) -> Result<(), SearchError> {
        let mut documents = self.documents();
        for index in indexes {
            documents.entry(index.to_string()).or_default();
        }
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        _version: Option<i64>,
    ) -> Result<(), SearchError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.documents()
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str, _version: Option<i64>) -> Result<(), SearchError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if let Some(documents) = self.documents().get_mut(index) {
            documents.remove(id);
        }
        Ok(())
    }
}
