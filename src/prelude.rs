//! Convenience re-exports for wiring an indexer

pub use crate::bulk::{BulkIndexer, BulkReport, TableReport};
pub use crate::core::{connect_pool, Indexer, IndexerState};
pub use crate::errors::IndexerError;
pub use crate::listeners::{build_ledger, build_listeners};
pub use crate::source::{NotificationSource, SourceEvent};
pub use crate::subscription::{ConnectionState, PgChangeSubscription};
pub use crate::triggers::{install_triggers, installed_triggers};

pub use config::{AppConfig, SearchBackend};
pub use event_system::prelude::*;
pub use search_backend::SearchListener;
