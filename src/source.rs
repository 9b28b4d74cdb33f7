//! Notification sources feeding the dispatch loop
//!
//! [`NotificationSource`] is the seam between the dispatcher and the
//! transport. Production uses [`crate::subscription::PgChangeSubscription`];
//! [`ChannelSource`] replays events pushed from a test.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::errors::IndexerError;

/// What a source hands the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Raw channel payload and the PID of the notifying backend
    Notification { pid: u32, payload: String },
    /// The subscription is (re)established; `reconnect` is false the first time
    Connected { reconnect: bool },
}

#[async_trait]
pub trait NotificationSource: Send {
    /// Wait for the next event; reconnecting is the source's job
    async fn next_event(&mut self) -> Result<SourceEvent, IndexerError>;

    /// Liveness probe run after a quiet period
    async fn ping(&mut self) -> Result<(), IndexerError>;

    /// The last probe did not answer in time; drop the connection it ran on
    fn mark_unresponsive(&mut self) {}

    async fn close(&mut self);
}

/// Test handle that feeds a [`ChannelSource`]
#[derive(Debug, Clone)]
pub struct ChannelSender {
    events: mpsc::UnboundedSender<SourceEvent>,
    pings: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl ChannelSender {
    pub fn notify(&self, payload: impl Into<String>) {
        self.send(SourceEvent::Notification {
            pid: 0,
            payload: payload.into(),
        });
    }

    pub fn reconnected(&self) {
        self.send(SourceEvent::Connected { reconnect: true });
    }

    pub fn send(&self, event: SourceEvent) {
        // The receiving side only goes away once the loop has stopped
        let _ = self.events.send(event);
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// In-memory source; yields an initial `Connected` then whatever was sent
#[derive(Debug)]
pub struct ChannelSource {
    events: mpsc::UnboundedReceiver<SourceEvent>,
    pings: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

pub fn channel_source() -> (ChannelSender, ChannelSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = ChannelSender {
        events: tx,
        pings: Arc::new(AtomicU64::new(0)),
        closed: Arc::new(AtomicBool::new(false)),
    };
    sender.send(SourceEvent::Connected { reconnect: false });

    let source = ChannelSource {
        events: rx,
        pings: sender.pings.clone(),
        closed: sender.closed.clone(),
    };
    (sender, source)
}

#[async_trait]
impl NotificationSource for ChannelSource {
    async fn next_event(&mut self) -> Result<SourceEvent, IndexerError> {
        self.events.recv().await.ok_or(IndexerError::SourceClosed)
    }

    async fn ping(&mut self) -> Result<(), IndexerError> {
        self.pings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        self.events.close();
    }
}
