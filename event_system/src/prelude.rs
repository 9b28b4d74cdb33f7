//! Convenience re-exports for common event-system usage

pub use crate::event::{row_id, Action, ChangeEvent, Decoded, RowSnapshot, TableName};
pub use crate::listener::Listener;
pub use crate::log::LogListener;
pub use crate::queue::QueuedListener;
pub use crate::registry::ListenerRegistry;

// Common external dependencies
pub use async_trait::async_trait;
pub use serde_json;
