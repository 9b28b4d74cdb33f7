//! Search sinks for the indexer
//!
//! Rows delivered by the dispatcher are turned into typed documents
//! ([`documents`]) and written to Elasticsearch or Meilisearch through a
//! [`SearchClient`]. [`SearchListener`] is the glue that plugs a client into
//! the listener registry.

pub mod client;
pub mod documents;
pub mod elasticsearch;
pub mod errors;
mod http;
pub mod listener;
pub mod meilisearch;
pub mod memory;
pub mod prelude;

use cache_system::VersionLedger;
use config::SearchBackend;
use std::sync::Arc;

pub use client::SearchClient;
pub use documents::{index_name, SearchDocument};
pub use elasticsearch::ElasticsearchClient;
pub use errors::SearchError;
pub use listener::SearchListener;
pub use meilisearch::MeilisearchClient;
pub use memory::MemoryIndex;

/// Client for the configured backend, or `None` when search is disabled
pub fn build_client(backend: &SearchBackend) -> Result<Option<Arc<dyn SearchClient>>, SearchError> {
    let client: Arc<dyn SearchClient> = match backend {
        SearchBackend::Elasticsearch(config) => Arc::new(ElasticsearchClient::new(config)?),
        SearchBackend::Meilisearch(config) => Arc::new(MeilisearchClient::new(config)?),
        SearchBackend::Disabled => return Ok(None),
    };
    Ok(Some(client))
}

/// Listener for the configured backend, or `None` when search is disabled
pub fn build_listener(
    backend: &SearchBackend,
    ledger: Arc<dyn VersionLedger>,
) -> Result<Option<SearchListener>, SearchError> {
    Ok(build_client(backend)?.map(|client| SearchListener::new(client, ledger)))
}
