//! Conversion log: an append-only SQLite table of finished conversions.
//!
//! Each successful request inserts exactly one row, in its own auto-committed
//! statement, before the response is sent. Rows are never updated or deleted.

use crate::error::ConvertError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use tracing::{debug, info};

/// One persisted conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversionRecord {
    pub id: i64,
    /// Filename as supplied by the client.
    pub filename: String,
    /// Lower-cased extension of `filename`, without the dot.
    pub source_format: String,
    /// Normalised target token, e.g. `png` or `pdf`.
    pub target_format: String,
    /// Size of the converted file in bytes.
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversionRecord {
    pub filename: String,
    pub source_format: String,
    pub target_format: String,
    pub file_size: u64,
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversion_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    source_format TEXT NOT NULL,
    target_format TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_conversion_logs_id ON conversion_logs(id);
CREATE INDEX IF NOT EXISTS ix_conversion_logs_filename ON conversion_logs(filename);
"#;

/// Handle to the conversion log. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConversionStore {
    pool: SqlitePool,
}

impl ConversionStore {
    /// Open (creating if missing) the database at `database_url` and make
    /// sure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, ConvertError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool).await?;
        info!("Conversion log ready at {}", database_url);
        Ok(store)
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, ConvertError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append one record and return it as stored.
    pub async fn insert(&self, new: &NewConversionRecord) -> Result<ConversionRecord, ConvertError> {
        let created_at = Utc::now();
        let file_size = i64::try_from(new.file_size).map_err(|_| {
            ConvertError::Internal(format!("file size {} does not fit the log", new.file_size))
        })?;

        let id = sqlx::query(
            r#"
            INSERT INTO conversion_logs (filename, source_format, target_format, file_size, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.filename)
        .bind(&new.source_format)
        .bind(&new.target_format)
        .bind(file_size)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(
            "Logged conversion #{}: '{}' {} → {} ({} bytes)",
            id, new.filename, new.source_format, new.target_format, file_size
        );

        Ok(ConversionRecord {
            id,
            filename: new.filename.clone(),
            source_format: new.source_format.clone(),
            target_format: new.target_format.clone(),
            file_size,
            created_at,
        })
    }

    /// Most recent records first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<ConversionRecord>, ConvertError> {
        let records = sqlx::query_as::<_, ConversionRecord>(
            r#"
            SELECT id, filename, source_format, target_format, file_size, created_at
            FROM conversion_logs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self) -> Result<i64, ConvertError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversion_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Move everything written so far from the write-ahead log into the main
    /// database file.
    pub async fn flush(&self) -> Result<(), ConvertError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flush and close every pooled connection.
    pub async fn close(&self) {
        if let Err(e) = self.flush().await {
            tracing::warn!("Final conversion log checkpoint failed: {e}");
        }
        self.pool.close().await;
    }
}
