//! Shared setup for database-backed tests
//!
//! Every test returns early when `DATABASE_URL` is unset, so the suite runs
//! without PostgreSQL. The database must be a scratch database: the tracked
//! tables are created if missing and truncated between tests.

#![allow(dead_code)]

use event_system::recording::{Call, CallLog};
use search_indexer::AppConfig;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Tests in one binary share the tables and the trigger function
static DATABASE: Mutex<()> = Mutex::const_new(());

pub struct TestDatabase {
    pub url: String,
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

pub async fn setup() -> Option<TestDatabase> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set, skipping");
        return None;
    };

    let guard = DATABASE.lock().await;
    let pool = PgPool::connect(&url)
        .await
        .expect("Failed to connect to test database");

    for statement in [
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE TABLE IF NOT EXISTS repository_releases (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            tag TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "TRUNCATE users, repositories, organizations, repository_releases",
    ] {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .expect("Failed to prepare test tables");
    }

    Some(TestDatabase {
        url,
        pool,
        _guard: guard,
    })
}

pub fn config(url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = url.to_string();
    config.listener.min_reconnect_interval_ms = 100;
    config.listener.max_reconnect_interval_ms = 1_000;
    config
}

/// Poll `log` until a call matches, for at most ten seconds
pub async fn wait_for<F>(log: &CallLog, what: &str, matches: F) -> Call
where
    F: Fn(&Call) -> bool,
{
    for _ in 0..200 {
        if let Some(call) = log.calls().into_iter().find(|call| matches(call)) {
            return call;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}; calls so far: {:?}", log.calls());
}
