use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SearchError;

/// Minimal document API shared by every search backend
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Short backend name used in logs and listener names
    fn backend(&self) -> &'static str;

    async fn health(&self) -> Result<(), SearchError>;

    /// Create any of `indexes` that do not exist yet
    async fn ensure_indexes(&self, indexes: &[&str]) -> Result<(), SearchError>;

    /// Insert or fully replace the document `id` in `index`
    ///
    /// `version` is the row version; backends that can enforce ordering
    /// server-side reject an older write with [`SearchError::VersionConflict`].
    async fn upsert(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        version: Option<i64>,
    ) -> Result<(), SearchError>;

    /// Remove the document `id` from `index`; a missing document is not an error
    async fn delete(&self, index: &str, id: &str, version: Option<i64>) -> Result<(), SearchError>;
}
