//! Cache system for document version tracking
//!
//! This crate provides the version ledger that search sinks consult to keep
//! last-write-wins semantics when the same row arrives more than once.

pub mod errors;
pub mod ledger;
pub mod memory;
pub mod prelude;
pub mod redis_ledger;

// Re-export centralized config
pub use config::CacheConfig;

pub use errors::CacheError;
pub use ledger::VersionLedger;
pub use memory::MemoryLedger;
pub use redis_ledger::RedisLedger;
