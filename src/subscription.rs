//! PostgreSQL LISTEN subscription
//!
//! Owns one dedicated listening connection. The first connect is bounded by
//! the configured timeout and is fatal on failure. Afterwards a lost
//! connection is rebuilt with exponential backoff, forever, and reported to
//! the dispatcher as a reconnect.

use async_trait::async_trait;
use config::{DatabaseConfig, ListenerConfig};
use rand::Rng;
use sqlx::postgres::PgListener;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::IndexerError;
use crate::source::{NotificationSource, SourceEvent};

/// Transport state of the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        })
    }
}

/// Doubling delay between `min` and `max`
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Up to 10% extra so that several indexers do not reconnect in lockstep
fn jittered(delay: Duration) -> Duration {
    let spread = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=spread))
}

async fn open_listener(url: &str, channel: &str) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect(url).await?;
    listener.listen(channel).await?;
    Ok(listener)
}

pub struct PgChangeSubscription {
    database_url: String,
    channel: String,
    connect_timeout: Duration,
    listener: Option<PgListener>,
    backoff: Backoff,
    /// Deadline of the reconnect attempt in progress; survives a dropped poll
    retry_at: Option<Instant>,
    pending: Option<SourceEvent>,
    state: watch::Sender<ConnectionState>,
}

impl fmt::Debug for PgChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgChangeSubscription")
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PgChangeSubscription {
    /// Open the listening connection and subscribe to the channel
    pub async fn connect(
        database: &DatabaseConfig,
        listener: &ListenerConfig,
    ) -> Result<Self, IndexerError> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let timeout = database.connect_timeout();

        let connection = tokio::time::timeout(timeout, open_listener(&database.url, &listener.channel))
            .await
            .map_err(|_| IndexerError::ConnectTimeout(timeout))??;

        state.send_replace(ConnectionState::Connected);
        info!(channel = %listener.channel, "established notification subscription");

        Ok(Self {
            database_url: database.url.clone(),
            channel: listener.channel.clone(),
            connect_timeout: timeout,
            listener: Some(connection),
            backoff: Backoff::new(
                listener.min_reconnect_interval(),
                listener.max_reconnect_interval(),
            ),
            retry_at: None,
            pending: Some(SourceEvent::Connected { reconnect: false }),
            state,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn connection_lost(&mut self, reason: &dyn fmt::Display) {
        self.listener = None;
        self.state.send_replace(ConnectionState::Reconnecting);
        warn!(channel = %self.channel, reason = %reason, "lost notification subscription, reconnecting");
    }

    /// Wait out the backoff and reopen the listener
    ///
    /// Cancel safe: the retry deadline is kept on `self`, so a poll that is
    /// dropped and restarted resumes the same attempt instead of backing off
    /// again.
    async fn reconnect(&mut self) -> SourceEvent {
        loop {
            let retry_at = match self.retry_at {
                Some(deadline) => deadline,
                None => {
                    let delay = jittered(self.backoff.next_delay());
                    debug!(channel = %self.channel, retry_in = ?delay, "waiting before reconnect attempt");
                    let deadline = Instant::now() + delay;
                    self.retry_at = Some(deadline);
                    deadline
                }
            };
            tokio::time::sleep_until(retry_at).await;

            let attempt = tokio::time::timeout(
                self.connect_timeout,
                open_listener(&self.database_url, &self.channel),
            )
            .await;
            self.retry_at = None;

            match attempt {
                Ok(Ok(connection)) => {
                    self.listener = Some(connection);
                    self.backoff.reset();
                    self.state.send_replace(ConnectionState::Connected);
                    info!(channel = %self.channel, "notification subscription reconnected");
                    return SourceEvent::Connected { reconnect: true };
                }
                Ok(Err(err)) => {
                    warn!(channel = %self.channel, error = %err, "reconnect attempt failed");
                }
                Err(_) => {
                    warn!(channel = %self.channel, timeout = ?self.connect_timeout, "reconnect attempt timed out");
                }
            }
        }
    }
}

#[async_trait]
impl NotificationSource for PgChangeSubscription {
    async fn next_event(&mut self) -> Result<SourceEvent, IndexerError> {
        if let Some(event) = self.pending.take() {
            return Ok(event);
        }

        loop {
            let Some(listener) = self.listener.as_mut() else {
                return Ok(self.reconnect().await);
            };

            match listener.try_recv().await {
                Ok(Some(notification)) => {
                    return Ok(SourceEvent::Notification {
                        pid: notification.process_id(),
                        payload: notification.payload().to_string(),
                    });
                }
                Ok(None) => self.connection_lost(&"connection closed"),
                Err(err) => self.connection_lost(&err),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), IndexerError> {
        let Some(listener) = self.listener.as_mut() else {
            // Already reconnecting
            return Ok(());
        };

        let probe = sqlx::query("SELECT 1").execute(&mut *listener).await;
        if let Err(err) = probe {
            self.connection_lost(&err);
            return Err(err.into());
        }
        Ok(())
    }

    fn mark_unresponsive(&mut self) {
        if self.listener.is_some() {
            self.connection_lost(&"keepalive probe timed out");
        }
    }

    async fn close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            if let Err(err) = listener.unlisten_all().await {
                debug!(error = %err, "failed to unlisten while closing subscription");
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!(channel = %self.channel, "closed notification subscription");
    }
}
