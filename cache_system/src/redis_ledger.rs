//! Redis-backed version ledger
//!
//! Versions are stored as `{prefix}:{table}:version:{id}` keys with a TTL. The
//! compare-and-set runs as a Lua script so concurrent writers from different
//! processes cannot interleave between the read and the write.

use async_trait::async_trait;
use config::CacheConfig;
use redis::{Client, Script};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::CacheError;
use crate::ledger::VersionLedger;

const ADMIT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and tonumber(current) > tonumber(ARGV[1]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return 1
"#;

/// Ledger shared by every indexer process pointed at the same Redis
#[derive(Clone)]
pub struct RedisLedger {
    client: Arc<Client>,
    config: Arc<CacheConfig>,
    connection_pool: Arc<RwLock<Option<redis::aio::MultiplexedConnection>>>,
    admit_script: Arc<Script>,
}

impl Debug for RedisLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connection_status = match self.connection_pool.try_read() {
            Ok(pool) => {
                if pool.is_some() {
                    "connected"
                } else {
                    "no_connection"
                }
            }
            Err(_) => "lock_error",
        };

        f.debug_struct("RedisLedger")
            .field("key_prefix", &self.config.key_prefix)
            .field("ttl_seconds", &self.config.ttl_seconds)
            .field("connected", &connection_status)
            .finish()
    }
}

impl RedisLedger {
    /// Create a ledger; the connection is opened lazily on first use
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.redis_url.as_str())?;

        Ok(Self {
            client: Arc::new(client),
            config: Arc::new(config),
            connection_pool: Arc::new(RwLock::new(None)),
            admit_script: Arc::new(Script::new(ADMIT_SCRIPT)),
        })
    }

    /// Get or create Redis connection
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        let mut pool = self.connection_pool.write().await;

        if pool.is_none() {
            let connection = self.client.get_multiplexed_async_connection().await?;
            *pool = Some(connection);
        }

        Ok(pool
            .as_ref()
            .ok_or_else(|| CacheError::Connection("Failed to get connection from pool".into()))?
            .clone())
    }

    /// Forget the pooled connection so the next call reconnects
    async fn reset_connection(&self) {
        self.connection_pool.write().await.take();
    }

    pub(crate) fn build_version_key(&self, table: &str, id: &str) -> String {
        format!("{}:{}:version:{}", self.config.key_prefix, table, id)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<String, CacheError> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[async_trait]
impl VersionLedger for RedisLedger {
    async fn admit(&self, table: &str, id: &str, version: i64) -> Result<bool, CacheError> {
        let key = self.build_version_key(table, id);
        let mut conn = self.get_connection().await?;

        let reply: Result<i64, redis::RedisError> = self
            .admit_script
            .key(&key)
            .arg(version)
            .arg(self.config.ttl_seconds)
            .invoke_async(&mut conn)
            .await;

        match reply {
            Ok(1) => Ok(true),
            Ok(0) => Ok(false),
            Ok(other) => Err(CacheError::UnexpectedReply(other)),
            Err(err) => {
                if err.is_connection_dropped() || err.is_io_error() {
                    tracing::warn!(error = %err, "redis connection lost, will reconnect on next call");
                    self.reset_connection().await;
                }
                Err(err.into())
            }
        }
    }
}
