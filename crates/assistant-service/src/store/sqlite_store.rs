use super::KeyValueStore;
use async_trait::async_trait;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv(expires_at);
";

/// SQLite-backed store. Expiry is stored as unix milliseconds and enforced on
/// read; expired rows are deleted when their key is next written or by
/// `purge_expired`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening key-value store at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path).with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;
        {
            let conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        info!("Key-value store initialized successfully");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Private in-memory database. A single pooled connection, since every
    /// `:memory:` connection would otherwise be its own database.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        Ok(Self { pool: Arc::new(pool) })
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))?;
            f(&*conn)
        })
        .await?
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn incr_by(&self, key: &str, delta: i64) -> anyhow::Result<i64> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![key, now_millis()],
            )?;
            // The update is guarded so that a non-integer value yields no row
            // instead of being silently coerced to zero.
            let value: Option<String> = conn
                .query_row(
                    "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)
                     ON CONFLICT(key) DO UPDATE
                        SET value = CAST(CAST(value AS INTEGER) + CAST(excluded.value AS INTEGER) AS TEXT)
                        WHERE CAST(CAST(value AS INTEGER) AS TEXT) = value
                     RETURNING value",
                    params![key, delta.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let value = value.ok_or_else(|| anyhow::anyhow!("value at {} is not an integer", key))?;
            value
                .parse::<i64>()
                .map_err(|e| anyhow::anyhow!("value at {} is not an integer: {}", key, e))
        })
        .await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                    params![key, now_millis()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expiry_millis(ttl)],
            )?;
            Ok(())
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE kv SET expires_at = ?2
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?3)",
                params![key, expiry_millis(ttl), now_millis()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn purge_expired(&self) -> anyhow::Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now_millis()],
            )?;
            Ok(removed)
        })
        .await
    }
}
