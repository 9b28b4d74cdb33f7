//! Convenience re-exports for wiring search sinks

pub use crate::client::SearchClient;
pub use crate::documents::{all_indexes, index_name, SearchDocument};
pub use crate::errors::SearchError;
pub use crate::listener::SearchListener;
pub use crate::{build_client, build_listener};
pub use crate::{ElasticsearchClient, MeilisearchClient, MemoryIndex};
