//! Bounded per-listener queue
//!
//! [`QueuedListener`] decouples a slow sink from the dispatch loop. Calls are
//! pushed into a bounded FIFO and applied to the wrapped listener by a single
//! worker task, so per-listener ordering is preserved. When the queue is full
//! the configured [`OverflowPolicy`] decides between waiting for space and
//! evicting the oldest queued call.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use config::{OverflowPolicy, QueueConfig};

use crate::event::{RowSnapshot, TableName};
use crate::listener::Listener;

enum Job {
    Connected,
    Create(TableName, RowSnapshot),
    Update(TableName, RowSnapshot),
    Delete(TableName, RowSnapshot),
}

impl Job {
    async fn apply(self, listener: &dyn Listener) {
        match self {
            Job::Connected => listener.connected().await,
            Job::Create(table, payload) => listener.create(table, &payload).await,
            Job::Update(table, payload) => listener.update(table, &payload).await,
            Job::Delete(table, payload) => listener.delete(table, &payload).await,
        }
    }
}

struct QueueShared {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
    policy: OverflowPolicy,
    items: Notify,
    space: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl QueueShared {
    fn jobs(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Listener wrapper that applies calls from a bounded queue
pub struct QueuedListener {
    name: String,
    inner: Arc<dyn Listener>,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for QueuedListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedListener")
            .field("name", &self.name)
            .field("capacity", &self.shared.capacity)
            .field("policy", &self.shared.policy)
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl QueuedListener {
    /// Wrap `inner` and start its worker task. Must be called inside a tokio runtime.
    pub fn new(inner: Arc<dyn Listener>, config: &QueueConfig) -> Self {
        let shared = Arc::new(QueueShared {
            jobs: Mutex::new(VecDeque::with_capacity(config.capacity)),
            capacity: config.capacity.max(1),
            policy: config.overflow,
            items: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });

        let worker = tokio::spawn(run_worker(inner.clone(), shared.clone()));

        Self {
            name: format!("queued({})", inner.name()),
            inner,
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Calls waiting to be applied
    pub fn pending(&self) -> usize {
        self.shared.jobs().len()
    }

    /// Calls evicted under [`OverflowPolicy::DropOldest`]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn try_push(&self, job: Job) -> Result<(), Job> {
        let mut jobs = self.shared.jobs();
        if jobs.len() < self.shared.capacity {
            jobs.push_back(job);
            return Ok(());
        }

        match self.shared.policy {
            OverflowPolicy::DropOldest => {
                jobs.pop_front();
                jobs.push_back(job);
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    listener = %self.name,
                    dropped,
                    "listener queue is full, dropped the oldest call"
                );
                Ok(())
            }
            OverflowPolicy::Block => Err(job),
        }
    }

    async fn push(&self, mut job: Job) {
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                debug!(listener = %self.name, "listener queue closed, call discarded");
                return;
            }

            let space = self.shared.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(job) {
                Ok(()) => {
                    self.shared.items.notify_one();
                    return;
                }
                Err(returned) => {
                    job = returned;
                    space.await;
                }
            }
        }
    }
}

async fn run_worker(inner: Arc<dyn Listener>, shared: Arc<QueueShared>) {
    loop {
        let items = shared.items.notified();
        tokio::pin!(items);
        items.as_mut().enable();

        let next = shared.jobs().pop_front();
        match next {
            Some(job) => {
                shared.space.notify_one();
                job.apply(inner.as_ref()).await;
            }
            None if shared.closed.load(Ordering::Acquire) => break,
            None => items.await,
        }
    }
}

#[async_trait]
impl Listener for QueuedListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connected(&self) {
        self.push(Job::Connected).await;
    }

    /// Drain the queue, stop the worker, then dispose the wrapped listener
    async fn disposed(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.items.notify_one();
        self.shared.space.notify_waiters();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(listener = %self.name, error = %err, "listener queue worker failed");
            }
        }

        self.inner.disposed().await;
    }

    async fn create(&self, table: TableName, payload: &RowSnapshot) {
        self.push(Job::Create(table, payload.clone())).await;
    }

    async fn update(&self, table: TableName, payload: &RowSnapshot) {
        self.push(Job::Update(table, payload.clone())).await;
    }

    async fn delete(&self, table: TableName, payload: &RowSnapshot) {
        self.push(Job::Delete(table, payload.clone())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{CallKind, RecordingListener};
    use serde_json::json;

    fn row(id: &str) -> RowSnapshot {
        json!({ "id": id }).as_object().cloned().unwrap()
    }

    fn ids(listener: &RecordingListener) -> Vec<Option<String>> {
        listener
            .log()
            .calls()
            .into_iter()
            .filter(|call| call.kind == CallKind::Create)
            .map(|call| call.id)
            .collect()
    }

    #[tokio::test]
    async fn test_block_policy_keeps_every_call_in_order() {
        let inner = Arc::new(RecordingListener::new("sink"));
        let queued = QueuedListener::new(
            inner.clone(),
            &QueueConfig {
                capacity: 1,
                overflow: OverflowPolicy::Block,
            },
        );

        for id in ["a", "b", "c", "d"] {
            queued.create(TableName::Repositories, &row(id)).await;
        }
        queued.disposed().await;

        assert_eq!(
            ids(&inner),
            vec![
                Some("a".to_string()),
                Some("b".to_string()),
                Some("c".to_string()),
                Some("d".to_string())
            ]
        );
        assert_eq!(inner.kinds().last(), Some(&CallKind::Disposed));
        assert_eq!(queued.dropped(), 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_when_full() {
        let inner = Arc::new(RecordingListener::new("sink"));
        let queued = QueuedListener::new(
            inner.clone(),
            &QueueConfig {
                capacity: 2,
                overflow: OverflowPolicy::DropOldest,
            },
        );

        // The current-thread test runtime does not run the worker until we yield,
        // and pushing under DropOldest never yields.
        for id in ["a", "b", "c", "d", "e"] {
            queued.create(TableName::Users, &row(id)).await;
        }
        assert_eq!(queued.pending(), 2);
        assert_eq!(queued.dropped(), 3);

        queued.disposed().await;
        assert_eq!(ids(&inner), vec![Some("d".to_string()), Some("e".to_string())]);
    }

    #[tokio::test]
    async fn test_calls_after_dispose_are_discarded() {
        let inner = Arc::new(RecordingListener::new("sink"));
        let queued = QueuedListener::new(
            inner.clone(),
            &QueueConfig {
                capacity: 4,
                overflow: OverflowPolicy::Block,
            },
        );

        queued.disposed().await;
        queued.create(TableName::Users, &row("late")).await;

        assert_eq!(inner.kinds(), vec![CallKind::Disposed]);
        assert_eq!(queued.pending(), 0);
    }

    #[tokio::test]
    async fn test_name_wraps_inner() {
        let queued = QueuedListener::new(
            Arc::new(RecordingListener::new("meilisearch")),
            &QueueConfig {
                capacity: 1,
                overflow: OverflowPolicy::Block,
            },
        );
        assert_eq!(queued.name(), "queued(meilisearch)");
        queued.disposed().await;
    }
}
