//! One-shot bulk sweep
//!
//! Walks every tracked table with keyset pagination on `id` and hands each row
//! to the listeners' `create`. Tables run as parallel tasks; a failing or
//! panicking table is reported without stopping the others.

use config::BulkConfig;
use event_system::{ListenerRegistry, TableName};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};


/// Outcome of sweeping one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: TableName,
    pub rows: u64,
    pub batches: u64,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl TableReport {
    fn failed(table: TableName, error: String) -> Self {
        Self {
            table,
            rows: 0,
            batches: 0,
            elapsed: Duration::ZERO,
            error: Some(error),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-table results of [`BulkIndexer::index_all`], in table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub tables: Vec<TableReport>,
}

impl BulkReport {
    pub fn table(&self, table: TableName) -> Option<&TableReport> {
        self.tables.iter().find(|report| report.table == table)
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|report| report.rows).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(|report| !report.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct BulkIndexer {
    pool: PgPool,
    registry: Arc<ListenerRegistry>,
    batch_size: u32,
}

impl std::fmt::Debug for BulkIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkIndexer")
            .field("batch_size", &self.batch_size)
            .field("listeners", &self.registry.names())
            .finish()
    }
}

pub(crate) fn page_sql(table: TableName) -> String {
    format!(
        "SELECT t.id::text, row_to_json(t)::jsonb FROM \"{table}\" t \
         WHERE ($1::text IS NULL OR t.id::text > $1) \
         ORDER BY t.id::text LIMIT $2"
    )
}

impl BulkIndexer {
    pub fn new(pool: PgPool, registry: Arc<ListenerRegistry>, config: &BulkConfig) -> Self {
        Self {
            pool,
            registry,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Sweep every tracked table in parallel and wait for all of them
    pub async fn index_all(&self) -> BulkReport {
        info!(
            tables = ?TableName::ALL.map(|table| table.as_str()),
            batch_size = self.batch_size,
            "starting bulk indexing"
        );

        let mut tasks = JoinSet::new();
        let mut task_tables = HashMap::new();
        for table in TableName::ALL {
            let pool = self.pool.clone();
            let registry = self.registry.clone();
            let batch_size = self.batch_size;
            let handle = tasks.spawn(async move { index_table(pool, registry, table, batch_size).await });
            task_tables.insert(handle.id(), table);
        }

        let mut reports = Vec::with_capacity(TableName::ALL.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, report)) => reports.push(report),
                Err(err) => {
                    let Some(table) = task_tables.get(&err.id()).copied() else {
                        error!(error = %err, "bulk indexing task for unknown table failed");
                        continue;
                    };
                    error!(table = %table, error = %err, "bulk indexing task panicked");
                    reports.push(TableReport::failed(table, err.to_string()));
                }
            }
        }

        reports.sort_by_key(|report| TableName::ALL.iter().position(|table| *table == report.table));
        let report = BulkReport { tables: reports };
        info!(
            rows = report.total_rows(),
            failed = report.failures().count(),
            "bulk indexing finished"
        );
        report
    }
}

async fn index_table(
    pool: PgPool,
    registry: Arc<ListenerRegistry>,
    table: TableName,
    batch_size: u32,
) -> TableReport {
    let start = Instant::now();
    let sql = page_sql(table);
    let mut cursor: Option<String> = None;
    let mut rows = 0u64;
    let mut batches = 0u64;

    loop {
        let page = sqlx::query_as::<_, (String, Json<Value>)>(&sql)
            .bind(cursor.as_deref())
            .bind(i64::from(batch_size))
            .fetch_all(&pool)
            .await;

        let page = match page {
            Ok(page) => page,
            Err(err) => {
                error!(table = %table, rows, error = %err, "unable to read rows for bulk indexing");
                return TableReport {
                    table,
                    rows,
                    batches,
                    elapsed: start.elapsed(),
                    error: Some(err.to_string()),
                };
            }
        };

        let fetched = page.len();
        batches += 1;
        for (id, Json(data)) in page {
            match data {
                Value::Object(row) => {
                    registry.create_all(table, &row).await;
                    rows += 1;
                }
                other => warn!(
                    table = %table,
                    id = %id,
                    kind = ?other,
                    "skipping row that is not a JSON object"
                ),
            }
            cursor = Some(id);
        }
        crate::debug_log!(table = %table, batch = batches, fetched, "indexed batch");

        if fetched < batch_size as usize {
            break;
        }
    }

    info!(table = %table, rows, batches, elapsed = ?start.elapsed(), "finished indexing table");
    TableReport {
        table,
        rows,
        batches,
        elapsed: start.elapsed(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(table: TableName, rows: u64, error: Option<&str>) -> TableReport {
        TableReport {
            table,
            rows,
            batches: 1,
            elapsed: Duration::ZERO,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_page_query_uses_text_keyset() {
        let sql = page_sql(TableName::RepositoryReleases);
        assert!(sql.contains("FROM \"repository_releases\" t"));
        assert!(sql.contains("t.id::text > $1"));
        assert!(sql.ends_with("ORDER BY t.id::text LIMIT $2"));
    }

    #[test]
    fn test_report_summaries() {
        let summary = BulkReport {
            tables: vec![
                report(TableName::Users, 0, None),
                report(TableName::Repositories, 1200, None),
                report(TableName::Organizations, 3, Some("relation does not exist")),
            ],
        };

        assert_eq!(summary.total_rows(), 1203);
        assert!(!summary.is_complete());
        assert_eq!(
            summary.failures().map(|r| r.table).collect::<Vec<_>>(),
            vec![TableName::Organizations]
        );
        assert!(summary.table(TableName::Repositories).unwrap().is_complete());
        assert!(summary.table(TableName::RepositoryReleases).is_none());
    }

    #[test]
    fn test_failed_report_has_no_rows() {
        let failed = TableReport::failed(TableName::Users, "task panicked".to_string());
        assert!(!failed.is_complete());
        assert_eq!(failed.rows, 0);
    }
}
