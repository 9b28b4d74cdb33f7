//! Convenience re-exports for common cache-system usage

// Core cache system components
pub use crate::errors::CacheError;
pub use crate::ledger::VersionLedger;
pub use crate::memory::MemoryLedger;
pub use crate::redis_ledger::RedisLedger;

// Re-export centralized config
pub use config::CacheConfig;
