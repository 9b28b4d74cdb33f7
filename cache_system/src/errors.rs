//! Error types for ledger operations
//!
//! This module defines all error types that can occur
//! while reading or writing document versions.

use thiserror::Error;

/// Cache system errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Connection(String),

    #[error("Unexpected ledger reply: {0}")]
    UnexpectedReply(i64),
}
