// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable tier backed by SQLite.
//!
//! Survives restarts and is capacity-bounded: a write that would push the
//! stored bytes (keys + values) past `max_bytes` fails with
//! [`TierError::CapacityExceeded`] instead of evicting anything.
//!
//! ```sql
//! CREATE TABLE progress_kv (
//!   key        TEXT PRIMARY KEY,
//!   value      TEXT NOT NULL,
//!   updated_at INTEGER NOT NULL
//! )
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::key::StorageKey;
use super::traits::{StorageTier, TierError, TierKind};
use crate::record::now_millis;
use crate::resilience::retry::{retry, RetryConfig};

pub struct DurableTier {
    pool: SqlitePool,
    max_bytes: u64,
    /// For display
    location: String,
}

impl DurableTier {
    /// Open (or create) the SQLite file at `path`.
    pub async fn open(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self, TierError> {
        let location = path.as_ref().to_string_lossy().to_string();
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        // Startup retry: fail fast if the path is unusable.
        let pool = retry("durable_connect", &RetryConfig::startup(), || async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.clone())
                .await
                .map_err(|e| TierError::Backend(e.to_string()))
        })
        .await?;

        let tier = Self { pool, max_bytes, location };
        tier.enable_wal_mode().await?;
        tier.init_schema().await?;
        info!(path = %tier.location, max_bytes, "Durable tier opened");
        Ok(tier)
    }

    /// In-memory SQLite database; lost when dropped.
    pub async fn in_memory(max_bytes: u64) -> Result<Self, TierError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| TierError::Backend(e.to_string()))?;

        // One connection that never idles out: each in-memory connection is
        // its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| TierError::Backend(e.to_string()))?;

        let tier = Self { pool, max_bytes, location: ":memory:".to_string() };
        tier.init_schema().await?;
        Ok(tier)
    }

    /// WAL journal: readers don't block the writer, one fsync per commit.
    async fn enable_wal_mode(&self) -> Result<(), TierError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| TierError::Backend(format!("Failed to enable WAL mode: {e}")))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| TierError::Backend(format!("Failed to set synchronous mode: {e}")))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), TierError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS progress_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TierError::Backend(format!("Failed to create schema: {e}")))?;
        Ok(())
    }

    /// Bytes currently stored (keys + values).
    pub async fn used_bytes(&self) -> Result<u64, TierError> {
        let row = sqlx::query("SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) AS used FROM progress_kv")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let used: i64 = row.try_get("used").map_err(backend)?;
        Ok(used.max(0) as u64)
    }

    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }
}

fn backend(e: sqlx::Error) -> TierError {
    TierError::Backend(e.to_string())
}

#[async_trait]
impl StorageTier for DurableTier {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<String>, TierError> {
        let row = sqlx::query("SELECT value FROM progress_kv WHERE key = ?")
            .bind(key.encode())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("value").map_err(backend)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &StorageKey, value: &str) -> Result<(), TierError> {
        let encoded = key.encode();
        let requested = (encoded.len() + value.len()) as u64;

        // Capacity check and write share one transaction.
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row = sqlx::query(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) AS used FROM progress_kv WHERE key <> ?",
        )
        .bind(&encoded)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        let used = row.try_get::<i64, _>("used").map_err(backend)?.max(0) as u64;

        if used + requested > self.max_bytes {
            return Err(TierError::CapacityExceeded { used, requested, max: self.max_bytes });
        }

        sqlx::query(
            "INSERT INTO progress_kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(&encoded)
        .bind(value)
        .bind(now_millis())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        debug!(key = %encoded, bytes = requested, "Durable write");
        Ok(())
    }

    async fn remove(&self, key: &StorageKey) -> Result<(), TierError> {
        sqlx::query("DELETE FROM progress_kv WHERE key = ?")
            .bind(key.encode())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<StorageKey>, TierError> {
        // instr() instead of LIKE: usernames may contain '_' or '%'.
        let rows = sqlx::query("SELECT key FROM progress_kv WHERE instr(key, ?) = 1 ORDER BY key")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("key").map_err(backend)?;
            if let Some(key) = StorageKey::parse(&raw) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
