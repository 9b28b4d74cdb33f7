//! Listener set for the `index` and `run` commands

use cache_system::{RedisLedger, VersionLedger};
use config::{AppConfig, SearchBackend};
use event_system::{Listener, LogListener, QueuedListener};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::IndexerError;

/// Version ledger for the configured cache, or an in-process one
pub async fn build_ledger(config: &AppConfig) -> Result<Arc<dyn VersionLedger>, IndexerError> {
    let Some(cache) = config.cache.clone() else {
        info!("no [cache] configured, row versions are tracked in memory");
        return Ok(Arc::new(cache_system::MemoryLedger::new()));
    };

    let ledger = RedisLedger::new(cache)?;
    match ledger.ping().await {
        Ok(_) => info!("connected to redis version ledger"),
        Err(err) => warn!(error = %err, "redis version ledger is unreachable, will retry per row"),
    }
    Ok(Arc::new(ledger))
}

/// Listeners in delivery order
///
/// With a search backend configured that is its sink (queued when
/// `[listener.queue]` is set); without one only the log listener runs.
/// Must be called inside a tokio runtime.
pub async fn build_listeners(config: &AppConfig) -> Result<Vec<Arc<dyn Listener>>, IndexerError> {
    let backend = config.search.backend()?;
    if let SearchBackend::Disabled = backend {
        info!("no search backend configured, changes are only logged");
        return Ok(vec![Arc::new(LogListener::new())]);
    }

    let ledger = build_ledger(config).await?;
    let Some(search) = search_backend::build_listener(&backend, ledger)? else {
        return Ok(vec![Arc::new(LogListener::new())]);
    };

    let search: Arc<dyn Listener> = Arc::new(search);
    let sink: Arc<dyn Listener> = match &config.listener.queue {
        Some(queue) => Arc::new(QueuedListener::new(search, queue)),
        None => search,
    };
    info!(listener = sink.name(), "registered search listener");
    Ok(vec![sink])
}
