//! Change events and listener fan-out
//!
//! This crate holds the decoded form of a database change notification, the
//! [`Listener`] contract that sinks implement, and the [`ListenerRegistry`]
//! that delivers each event to every registered sink in order.

pub mod event;
pub mod listener;
pub mod log;
pub mod prelude;
pub mod queue;
pub mod recording;
pub mod registry;

pub use event::{row_id, Action, ChangeEvent, DecodeError, Decoded, RowSnapshot, TableName, UntrackedTable};
pub use listener::Listener;
pub use log::LogListener;
pub use queue::QueuedListener;
pub use registry::ListenerRegistry;
