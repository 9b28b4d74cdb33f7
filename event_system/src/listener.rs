//! The listener contract
//!
//! A listener is a sink that reacts to row changes. The dispatcher awaits each
//! call before moving to the next listener, so implementations own their own
//! timeout discipline and must never propagate errors back.

use async_trait::async_trait;

use crate::event::{RowSnapshot, TableName};

/// Sink for change events
///
/// `create` and `update` must behave as an upsert keyed by the row id and
/// `delete` as a delete keyed by the row id: the bulk sweep and the live stream
/// can deliver the same row more than once and in either order.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Name used in log fields
    fn name(&self) -> &str;

    /// The notification subscription was established or re-established
    async fn connected(&self) {}

    /// The indexer is shutting down
    async fn disposed(&self) {}

    async fn create(&self, table: TableName, payload: &RowSnapshot);

    async fn update(&self, table: TableName, payload: &RowSnapshot);

    async fn delete(&self, table: TableName, payload: &RowSnapshot);
}
