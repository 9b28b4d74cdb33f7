//! Trigger installation
//!
//! Installs the row-change notification function and one trigger per tracked
//! table. Everything runs in a single transaction, so a failure leaves the
//! previous installation untouched.

use event_system::TableName;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{debug, info};

use crate::errors::IndexerError;

/// Name of the plpgsql function every indexing trigger executes
pub const NOTIFY_FUNCTION: &str = "indexer_notify_event";

/// A trigger found in `pg_trigger`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstalledTrigger {
    pub table: String,
    pub trigger: String,
}

pub fn trigger_name(table: TableName) -> String {
    format!("{table}_indexing_event_trigger")
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn notify_function_sql(channel: &str) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {NOTIFY_FUNCTION}() RETURNS TRIGGER AS $$
DECLARE
    data json;
BEGIN
    IF (TG_OP = 'DELETE') THEN
        data = row_to_json(OLD);
    ELSE
        data = row_to_json(NEW);
    END IF;

    PERFORM pg_notify(
        {channel}::text,
        json_build_object('table', TG_TABLE_NAME, 'action', TG_OP, 'data', data)::text
    );
    RETURN NULL;
END
$$ LANGUAGE plpgsql"#,
        channel = quote_literal(channel),
    )
}

pub(crate) fn drop_trigger_sql(table: TableName) -> String {
    format!(
        "DROP TRIGGER IF EXISTS {} ON \"{table}\"",
        trigger_name(table)
    )
}

pub(crate) fn create_trigger_sql(table: TableName) -> String {
    format!(
        "CREATE TRIGGER {} AFTER INSERT OR UPDATE OR DELETE ON \"{table}\" \
         FOR EACH ROW EXECUTE FUNCTION {NOTIFY_FUNCTION}()",
        trigger_name(table)
    )
}

/// Install or refresh the notification function and every table trigger
///
/// Safe to run repeatedly; each run replaces the previous installation.
pub async fn install_triggers(pool: &PgPool, channel: &str) -> Result<(), IndexerError> {
    let start = Instant::now();
    let mut tx = pool.begin().await?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    sqlx::query(&notify_function_sql(channel))
        .execute(&mut *tx)
        .await?;
    debug!(function = NOTIFY_FUNCTION, channel, "installed notification function");

    for table in TableName::ALL {
        sqlx::query(&drop_trigger_sql(table)).execute(&mut *tx).await?;
        sqlx::query(&create_trigger_sql(table)).execute(&mut *tx).await?;
        info!(
            table = %table,
            elapsed = ?start.elapsed(),
            "installed or updated indexing trigger"
        );
    }

    tx.commit().await?;
    Ok(())
}

/// Indexing triggers currently present in the database, ordered by table
pub async fn installed_triggers(pool: &PgPool) -> Result<Vec<InstalledTrigger>, IndexerError> {
    let triggers = sqlx::query_as::<_, InstalledTrigger>(
        r#"
        SELECT c.relname::text AS "table", t.tgname::text AS "trigger"
        FROM pg_trigger t
        JOIN pg_class c ON c.oid = t.tgrelid
        WHERE NOT t.tgisinternal AND t.tgname LIKE '%\_indexing\_event\_trigger'
        ORDER BY c.relname, t.tgname
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(triggers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_names() {
        assert_eq!(
            trigger_name(TableName::RepositoryReleases),
            "repository_releases_indexing_event_trigger"
        );
        assert_eq!(
            drop_trigger_sql(TableName::Users),
            "DROP TRIGGER IF EXISTS users_indexing_event_trigger ON \"users\""
        );
    }

    #[test]
    fn test_create_trigger_fires_on_every_row_change() {
        let sql = create_trigger_sql(TableName::Organizations);
        assert!(sql.starts_with("CREATE TRIGGER organizations_indexing_event_trigger"));
        assert!(sql.contains("AFTER INSERT OR UPDATE OR DELETE ON \"organizations\""));
        assert!(sql.ends_with("FOR EACH ROW EXECUTE FUNCTION indexer_notify_event()"));
    }

    #[test]
    fn test_function_publishes_on_quoted_channel() {
        let sql = notify_function_sql("charted.indexing");
        assert!(sql.contains("pg_notify(\n        'charted.indexing'::text"));
        assert!(sql.contains("'table', TG_TABLE_NAME, 'action', TG_OP, 'data', data"));

        let hostile = notify_function_sql("x'; DROP TABLE users; --");
        assert!(hostile.contains("'x''; DROP TABLE users; --'::text"));
    }
}
