//! SQLite Response Cache
//!
//! Persists cached responses across process restarts. Expiry is stored as an
//! absolute UTC timestamp in milliseconds; expired rows are ignored on read
//! and deleted opportunistically.

use crate::cache::CacheBackend;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub struct SqliteCache {
    db: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    /// Open (or create) a cache database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .map_err(|e| PipelineError::Cache(format!("Failed to open cache database: {}", e)))?;
        Self::with_connection(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        let cache = Self {
            db: Arc::new(Mutex::new(db)),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        let db = lock(&self.db)?;
        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS response_cache (
                cache_key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| PipelineError::Cache(format!("Failed to create cache table: {}", e)))?;
        Ok(())
    }

    /// Delete expired rows, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let db = lock(&self.db)?;
        let removed = db
            .execute(
                "DELETE FROM response_cache WHERE expires_at <= ?1",
                params![Utc::now().timestamp_millis()],
            )
            .map_err(|e| PipelineError::Cache(format!("Failed to purge cache: {}", e)))?;
        Ok(removed)
    }

    /// Run `op` against the connection on the blocking pool so a busy
    /// database never stalls the async worker.
    async fn with_db<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let db = lock(&db)?;
            op(&db)
        })
        .await
        .map_err(|e| PipelineError::Cache(format!("Cache task failed: {}", e)))?
    }
}

fn lock(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|_| PipelineError::Cache("Cache connection lock poisoned".to_string()))
}

/// Absolute expiry in epoch milliseconds, or an error if it does not fit
fn expiry_millis(now_ms: i64, ttl: Duration) -> Result<i64> {
    i64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ttl_ms| now_ms.checked_add(ttl_ms))
        .ok_or_else(|| {
            PipelineError::Cache(format!("cache TTL of {}s is out of range", ttl.as_secs()))
        })
}

#[async_trait]
impl CacheBackend for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_db(move |db| {
            let now = Utc::now().timestamp_millis();
            let row: Option<(String, i64)> = db
                .query_row(
                    "SELECT value, expires_at FROM response_cache WHERE cache_key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| PipelineError::Cache(format!("Cache lookup failed: {}", e)))?;

            match row {
                Some((value, expires_at)) if expires_at > now => Ok(Some(value)),
                Some(_) => {
                    db.execute(
                        "DELETE FROM response_cache WHERE cache_key = ?1",
                        params![key],
                    )
                    .map_err(|e| PipelineError::Cache(format!("Cache eviction failed: {}", e)))?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = expiry_millis(Utc::now().timestamp_millis(), ttl)?;
        let key = key.to_string();
        let value = value.to_string();
        self.with_db(move |db| {
            db.execute(
                r#"
                INSERT INTO response_cache (cache_key, value, expires_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(cache_key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                "#,
                params![key, value, expires_at],
            )
            .map_err(|e| PipelineError::Cache(format!("Cache write failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_db(|db| {
            db.execute("DELETE FROM response_cache", [])
                .map_err(|e| PipelineError::Cache(format!("Cache clear failed: {}", e)))?;
            Ok(())
        })
        .await
    }
}
