//! Error types for search sinks

use cache_system::CacheError;
use thiserror::Error;

use crate::documents::DocumentError;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{backend} responded with {status}: {body}")]
    Status {
        backend: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{backend} holds a newer version of {index}/{id}")]
    VersionConflict {
        backend: &'static str,
        index: String,
        id: String,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("{backend} is unhealthy: {reason}")]
    Unhealthy {
        backend: &'static str,
        reason: String,
    },

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Version ledger error: {0}")]
    Ledger(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SearchError {
    /// Turn a non-success response into [`SearchError::Status`]
    pub(crate) async fn from_response(backend: &'static str, response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        SearchError::Status {
            backend,
            status,
            body,
        }
    }
}
