//! # cm-kv-sqlite
//!
//! SQLite implementation of `KeyValueStore`: the device's persistent
//! key-value store and the durability boundary of the media index.

use async_trait::async_trait;
use cm_core::error::{MediaError, Result};
use cm_core::traits::KeyValueStore;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

pub struct SqliteKvStore {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> MediaError {
    MediaError::Persistence(format!("sqlite: {e}"))
}

impl SqliteKvStore {
    /// Opens (creating if needed) the store at `url`, e.g.
    /// `sqlite://./data/cardmedia.db?mode=rwc` or `sqlite::memory:`.
    ///
    /// # Developer Note
    /// An in-memory database lives and dies with its connection, so memory
    /// URLs get a single connection that is never recycled.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = options.connect(url).await.map_err(db_err)?;
        sqlx::query(SCHEMA).execute(&pool).await.map_err(db_err)?;
        debug!(url = %url, "kv_sqlite: connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|row| row.try_get::<String, _>("value"))
            .transpose()
            .map_err(db_err)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
