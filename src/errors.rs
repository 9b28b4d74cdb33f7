//! Error types for the indexer
//!
//! Listener failures never show up here: sinks handle their own errors. These
//! are the failures that stop a command.

use cache_system::CacheError;
use config::ConfigError;
use search_backend::SearchError;
use std::time::Duration;
use thiserror::Error;

use crate::core::IndexerState;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not connect to the database within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Notification source closed")]
    SourceClosed,

    #[error("Indexer is {actual}, expected {expected}")]
    InvalidState {
        expected: IndexerState,
        actual: IndexerState,
    },

    #[error("Version ledger error: {0}")]
    Cache(#[from] CacheError),

    #[error("Search backend error: {0}")]
    Search(#[from] SearchError),
}
