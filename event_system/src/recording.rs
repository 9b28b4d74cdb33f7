//! Recording listener used as a test double
//!
//! Every call is appended to a [`CallLog`], which can be shared between several
//! listeners to observe cross-listener ordering.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

use crate::event::{row_id, RowSnapshot, TableName};
use crate::listener::Listener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Connected,
    Disposed,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub listener: String,
    pub kind: CallKind,
    pub table: Option<TableName>,
    pub id: Option<String>,
}

/// Shared, append-only record of listener calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct RecordingListener {
    name: String,
    log: CallLog,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingListener {
    pub fn new(name: &str) -> Self {
        Self::with_log(name, CallLog::default())
    }

    pub fn with_log(name: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            gate: None,
        }
    }

    /// Every row call waits for one permit of `gate` before being recorded
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn kinds(&self) -> Vec<CallKind> {
        self.log.calls().into_iter().map(|call| call.kind).collect()
    }

    async fn record(&self, kind: CallKind, table: TableName, payload: &RowSnapshot) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.log.push(Call {
            listener: self.name.clone(),
            kind,
            table: Some(table),
            id: row_id(payload),
        });
    }

    fn record_lifecycle(&self, kind: CallKind) {
        self.log.push(Call {
            listener: self.name.clone(),
            kind,
            table: None,
            id: None,
        });
    }
}

#[async_trait]
impl Listener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connected(&self) {
        self.record_lifecycle(CallKind::Connected);
    }

    async fn disposed(&self) {
        self.record_lifecycle(CallKind::Disposed);
    }

    async fn create(&self, table: TableName, payload: &RowSnapshot) {
        self.record(CallKind::Create, table, payload).await;
    }

    async fn update(&self, table: TableName, payload: &RowSnapshot) {
        self.record(CallKind::Update, table, payload).await;
    }

    async fn delete(&self, table: TableName, payload: &RowSnapshot) {
        self.record(CallKind::Delete, table, payload).await;
    }
}
