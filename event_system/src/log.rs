//! Diagnostic listener that only logs

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::event::{row_id, RowSnapshot, TableName};
use crate::listener::Listener;

/// Emits one structured log line per call and performs no I/O
///
/// Only the table, the operation and the row id are logged. Row contents
/// stay out of the logs since `users` rows carry password hashes and emails.
#[derive(Debug, Default)]
pub struct LogListener {
    events: AtomicU64,
}

impl LogListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of row calls seen so far
    pub fn events_seen(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    fn log(&self, operation: &'static str, table: TableName, payload: &RowSnapshot) {
        self.events.fetch_add(1, Ordering::Relaxed);
        info!(
            listener = "log",
            operation,
            table = %table,
            id = row_id(payload).as_deref().unwrap_or("<none>"),
            "{operation}({table})"
        );
    }
}

#[async_trait]
impl Listener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    async fn connected(&self) {
        info!(listener = "log", "notification subscription connected");
    }

    async fn disposed(&self) {
        info!(
            listener = "log",
            events = self.events_seen(),
            "log listener disposed"
        );
    }

    async fn create(&self, table: TableName, payload: &RowSnapshot) {
        self.log("create", table, payload);
    }

    async fn update(&self, table: TableName, payload: &RowSnapshot) {
        self.log("update", table, payload);
    }

    async fn delete(&self, table: TableName, payload: &RowSnapshot) {
        self.log("delete", table, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_counts_row_calls_only() {
        let listener = LogListener::new();
        let row = json!({ "id": "1", "username": "noel" })
            .as_object()
            .cloned()
            .unwrap();

        listener.connected().await;
        listener.create(TableName::Users, &row).await;
        listener.update(TableName::Users, &row).await;
        listener.delete(TableName::Users, &row).await;
        listener.disposed().await;

        assert_eq!(listener.events_seen(), 3);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_row_contents_stay_out_of_logs() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let listener = LogListener::new();
        let row = json!({
            "id": "u1",
            "username": "noel",
            "password": "$argon2id$v=19$secret-hash",
            "email": "noel@example.com"
        })
        .as_object()
        .cloned()
        .unwrap();
        tracing::subscriber::with_default(subscriber, || {
            listener.log("create", TableName::Users, &row);
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("u1"));
        assert!(output.contains("create(users)"));
        assert!(!output.contains("argon2id"));
        assert!(!output.contains("noel@example.com"));
    }
}
