use std::sync::{Arc, PoisonError, RwLock};

use crate::event::{Action, ChangeEvent, RowSnapshot, TableName};
use crate::listener::Listener;

/// Ordered set of listeners that receive every change event
///
/// Registration order is delivery order. Listeners may be appended while the
/// dispatch loop is running; each delivery works on a snapshot taken under the
/// read lock, so an append never races an iteration.
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.names())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener after every existing one
    pub fn append(&self, listener: Arc<dyn Listener>) {
        tracing::debug!(listener = listener.name(), "registered listener");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Current listeners in registration order
    pub fn snapshot(&self) -> Vec<Arc<dyn Listener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|listener| listener.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener, one after another
    pub async fn dispatch(&self, event: &ChangeEvent) {
        for listener in self.snapshot() {
            match event.action {
                Action::Insert => listener.create(event.table, &event.data).await,
                Action::Update => listener.update(event.table, &event.data).await,
                Action::Delete => listener.delete(event.table, &event.data).await,
            }
        }
    }

    /// Upsert a row into every listener (bulk sweep path)
    pub async fn create_all(&self, table: TableName, payload: &RowSnapshot) {
        for listener in self.snapshot() {
            listener.create(table, payload).await;
        }
    }

    pub async fn notify_connected(&self) {
        for listener in self.snapshot() {
            listener.connected().await;
        }
    }

    /// Dispose every listener in registration order
    pub async fn dispose_all(&self) {
        for listener in self.snapshot() {
            tracing::debug!(listener = listener.name(), "disposing listener");
            listener.disposed().await;
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{CallKind, CallLog, RecordingListener};
    use serde_json::json;

    fn event(action: Action, id: &str) -> ChangeEvent {
        let data = json!({ "id": id }).as_object().cloned().unwrap();
        ChangeEvent::new(TableName::Users, action, data)
    }

    #[test]
    fn test_poisoned_lock_still_reports_listeners() {
        let registry = Arc::new(ListenerRegistry::new());
        registry.append(Arc::new(RecordingListener::new("first")));

        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.listeners.write().unwrap();
            panic!("listener panicked during append");
        })
        .join();
        assert!(registry.listeners.is_poisoned());

        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
        assert_eq!(registry.names(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_follows_registration_order() {
        let log = CallLog::default();
        let registry = ListenerRegistry::new();
        registry.append(Arc::new(RecordingListener::with_log("first", log.clone())));
        registry.append(Arc::new(RecordingListener::with_log("second", log.clone())));

        registry.dispatch(&event(Action::Insert, "a")).await;
        registry.dispatch(&event(Action::Delete, "b")).await;

        let calls: Vec<_> = log
            .calls()
            .into_iter()
            .map(|call| (call.listener, call.kind, call.id))
            .collect();
        assert_eq!(
            calls,
            vec![
                ("first".to_string(), CallKind::Create, Some("a".to_string())),
                ("second".to_string(), CallKind::Create, Some("a".to_string())),
                ("first".to_string(), CallKind::Delete, Some("b".to_string())),
                ("second".to_string(), CallKind::Delete, Some("b".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_maps_to_update() {
        let listener = Arc::new(RecordingListener::new("only"));
        let registry = ListenerRegistry::new();
        registry.append(listener.clone());

        registry.dispatch(&event(Action::Update, "a")).await;
        assert_eq!(listener.kinds(), vec![CallKind::Update]);
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_reach_everyone() {
        let log = CallLog::default();
        let registry = ListenerRegistry::new();
        registry.append(Arc::new(RecordingListener::with_log("a", log.clone())));
        registry.append(Arc::new(RecordingListener::with_log("b", log.clone())));

        registry.notify_connected().await;
        registry.dispose_all().await;

        let kinds: Vec<_> = log
            .calls()
            .into_iter()
            .map(|call| (call.listener, call.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a".to_string(), CallKind::Connected),
                ("b".to_string(), CallKind::Connected),
                ("a".to_string(), CallKind::Disposed),
                ("b".to_string(), CallKind::Disposed),
            ]
        );
    }

    #[test]
    fn test_append_and_names() {
        let registry = ListenerRegistry::default();
        assert!(registry.is_empty());
        registry.append(Arc::new(RecordingListener::new("x")));
        registry.append(Arc::new(RecordingListener::new("x")));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["x", "x"]);
    }
}
