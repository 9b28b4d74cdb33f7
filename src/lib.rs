//! # search-indexer
//!
//! Change-data-capture pipeline that keeps the registry's search index in
//! sync with PostgreSQL.
//!
//! Triggers installed by [`triggers::install_triggers`] publish every row
//! change on a notification channel. The [`Indexer`] subscribes to that
//! channel, decodes each payload and fans it out to the registered
//! [`Listener`](event_system::Listener)s. [`BulkIndexer`] performs the
//! one-shot sweep that (re)indexes existing rows.
//!
//! ```rust,no_run
//! use search_indexer::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), IndexerError> {
//!     let config = Arc::new(AppConfig::load(None)?);
//!
//!     let indexer = Indexer::new(config);
//!     indexer.append_listener(Arc::new(LogListener::new()));
//!     indexer.spawn(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub mod bulk;
pub mod core;
pub mod errors;
pub mod listeners;
pub mod logging;
pub mod prelude;
pub mod source;
pub mod subscription;
pub mod triggers;

// Re-export the main public types for convenience
pub use bulk::{BulkIndexer, BulkReport, TableReport};
pub use crate::core::{connect_pool, Indexer, IndexerState};
pub use errors::IndexerError;
pub use source::{NotificationSource, SourceEvent};
pub use subscription::{ConnectionState, PgChangeSubscription};

// Re-export centralized config
pub use config::{AppConfig, BulkConfig, DatabaseConfig, ListenerConfig, LoggingConfig};

// Re-export workspace crates used in the public API
pub use cache_system;
pub use event_system;
pub use search_backend;

// Re-export external dependencies used in public API
pub use async_trait;
pub use sqlx;
