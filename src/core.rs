//! Indexer dispatcher
//!
//! [`Indexer`] owns the listener registry and drives the dispatch loop: it
//! decodes every notification, routes it to the listeners in registration
//! order, forwards connection lifecycle signals and probes the subscription
//! after a quiet period.

use config::{AppConfig, DatabaseConfig};
use event_system::{ChangeEvent, Decoded, Listener, ListenerRegistry};
use sqlx::PgPool;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::errors::IndexerError;
use crate::source::{NotificationSource, SourceEvent};
use crate::subscription::{ConnectionState, PgChangeSubscription};

/// Lifecycle of the dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Idle,
    Spawning,
    Running,
    Disposing,
    Stopped,
}

impl fmt::Display for IndexerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexerState::Idle => "idle",
            IndexerState::Spawning => "spawning",
            IndexerState::Running => "running",
            IndexerState::Disposing => "disposing",
            IndexerState::Stopped => "stopped",
        })
    }
}

/// Open the query pool used by `install` and the bulk sweep
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, IndexerError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(config.connect_timeout())
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

/// Main coordinator between the notification source and the listeners
pub struct Indexer {
    config: Arc<AppConfig>,
    registry: Arc<ListenerRegistry>,
    state: watch::Sender<IndexerState>,
    connection: Mutex<Option<watch::Receiver<ConnectionState>>>,
}

impl fmt::Debug for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("state", &self.state())
            .field("listeners", &self.registry.names())
            .finish()
    }
}

impl Indexer {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let (state, _) = watch::channel(IndexerState::Idle);
        Self {
            config,
            registry: Arc::new(ListenerRegistry::new()),
            state,
            connection: Mutex::new(None),
        }
    }

    /// Register a listener; allowed before and after the loop starts
    pub fn append_listener(&self, listener: Arc<dyn Listener>) {
        self.registry.append(listener);
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<IndexerState> {
        self.state.subscribe()
    }

    /// Transport state of the PostgreSQL subscription, once [`Indexer::spawn`] has connected
    pub fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition(&self, from: IndexerState, to: IndexerState) -> Result<(), IndexerError> {
        let mut actual = from;
        let moved = self.state.send_if_modified(|state| {
            actual = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });

        if moved {
            debug!(from = %from, to = %to, "indexer state changed");
            Ok(())
        } else {
            Err(IndexerError::InvalidState {
                expected: from,
                actual,
            })
        }
    }

    /// Subscribe to PostgreSQL and dispatch until `shutdown` resolves
    ///
    /// Fails if the initial connect fails; after that only a source error can
    /// end the loop early.
    pub async fn spawn<F>(&self, shutdown: F) -> Result<(), IndexerError>
    where
        F: Future<Output = ()> + Send,
    {
        self.transition(IndexerState::Idle, IndexerState::Spawning)?;
        info!(channel = %self.config.listener.channel, "starting long-running indexer");

        let source = match PgChangeSubscription::connect(&self.config.database, &self.config.listener).await {
            Ok(source) => source,
            Err(err) => {
                error!(error = %err, "unable to subscribe to database notifications");
                self.state.send_replace(IndexerState::Stopped);
                return Err(err);
            }
        };

        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(source.subscribe_state());
        self.run(source, shutdown).await
    }

    /// Same as [`Indexer::spawn`] with a caller-supplied source
    pub async fn spawn_with<S, F>(&self, source: S, shutdown: F) -> Result<(), IndexerError>
    where
        S: NotificationSource,
        F: Future<Output = ()> + Send,
    {
        self.transition(IndexerState::Idle, IndexerState::Spawning)?;
        self.run(source, shutdown).await
    }

    async fn run<S, F>(&self, mut source: S, shutdown: F) -> Result<(), IndexerError>
    where
        S: NotificationSource,
        F: Future<Output = ()> + Send,
    {
        self.transition(IndexerState::Spawning, IndexerState::Running)?;
        let keepalive = self.config.listener.keepalive_interval();
        let probe_timeout = self.config.database.connect_timeout();
        let mut shutdown = std::pin::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    warn!("shutdown requested, disposing listeners");
                    break Ok(());
                }

                event = source.next_event() => match event {
                    Ok(SourceEvent::Notification { pid, payload }) => {
                        self.handle_payload(pid, &payload).await;
                    }
                    Ok(SourceEvent::Connected { reconnect }) => {
                        if reconnect {
                            info!("notification subscription reconnected");
                        } else {
                            info!("notification subscription connected");
                        }
                        self.registry.notify_connected().await;
                    }
                    Err(err) => {
                        error!(error = %err, "notification source failed, stopping indexer");
                        break Err(err);
                    }
                },

                _ = tokio::time::sleep(keepalive) => {
                    debug!(idle = ?keepalive, "no notifications received, probing subscription");
                    let probe = tokio::select! {
                        biased;

                        _ = &mut shutdown => {
                            warn!("shutdown requested during probe, disposing listeners");
                            break Ok(());
                        }
                        probe = tokio::time::timeout(probe_timeout, source.ping()) => probe,
                    };
                    match probe {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(error = %err, "subscription probe failed"),
                        Err(_) => {
                            warn!(timeout = ?probe_timeout, "subscription probe timed out");
                            source.mark_unresponsive();
                        }
                    }
                }
            }
        };

        self.transition(IndexerState::Running, IndexerState::Disposing)?;
        self.registry.dispose_all().await;
        source.close().await;
        self.transition(IndexerState::Disposing, IndexerState::Stopped)?;
        info!("indexer stopped");

        outcome
    }

    /// Decode one raw payload and deliver it to every listener
    ///
    /// Undecodable payloads are logged and dropped; rows from untracked tables
    /// are dropped silently.
    pub async fn handle_payload(&self, pid: u32, payload: &str) {
        crate::trace_log!(pid, payload, "received notification");

        match ChangeEvent::decode(payload) {
            Ok(Decoded::Tracked(event)) => {
                crate::debug_log!(
                    pid,
                    table = %event.table,
                    action = %event.action,
                    "dispatching change event"
                );
                self.registry.dispatch(&event).await;
            }
            Ok(Decoded::Untracked(table)) => {
                debug!(pid, table = %table, "ignoring change on untracked table");
            }
            Err(err) => {
                warn!(pid, error = %err, "dropping undecodable notification");
            }
        }
    }
}
