//! In-process ledger used when no Redis instance is configured

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::errors::CacheError;
use crate::ledger::VersionLedger;

/// Same retention as the Redis ledger's default TTL
const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    version: i64,
    recorded_at: Instant,
}

#[derive(Debug)]
struct Versions {
    entries: HashMap<(String, String), Entry>,
    next_sweep: Instant,
}

/// Ledger that lives as long as the process
///
/// Only protects against races inside one process; the `index` and `run`
/// commands share versions only through [`crate::RedisLedger`]. Entries expire
/// after the TTL like Redis keys do, and expired entries are swept at most once
/// per TTL.
#[derive(Debug)]
pub struct MemoryLedger {
    ttl: Duration,
    versions: RwLock<Versions>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            versions: RwLock::new(Versions {
                entries: HashMap::new(),
                next_sweep: Instant::now() + ttl,
            }),
        }
    }

    pub async fn version(&self, table: &str, id: &str) -> Option<i64> {
        let versions = self.versions.read().await;
        let entry = versions.entries.get(&(table.to_string(), id.to_string()))?;
        (entry.recorded_at.elapsed() < self.ttl).then_some(entry.version)
    }

    /// Entries currently held, expired or not
    pub async fn entries(&self) -> usize {
        self.versions.read().await.entries.len()
    }
}

#[async_trait]
impl VersionLedger for MemoryLedger {
    async fn admit(&self, table: &str, id: &str, version: i64) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut versions = self.versions.write().await;

        if now >= versions.next_sweep {
            let ttl = self.ttl;
            versions
                .entries
                .retain(|_, entry| now.duration_since(entry.recorded_at) < ttl);
            versions.next_sweep = now + ttl;
        }

        let key = (table.to_string(), id.to_string());
        if let Some(entry) = versions.entries.get(&key) {
            let live = now.duration_since(entry.recorded_at) < self.ttl;
            if live && entry.version > version {
                return Ok(false);
            }
        }

        versions.entries.insert(
            key,
            Entry {
                version,
                recorded_at: now,
            },
        );
        Ok(true)
    }
}
