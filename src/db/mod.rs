//! Record store
//!
//! Durable sqlite-backed record table shared by the DNS resolver and the
//! REST control plane. The pool is capped at a single connection so all
//! backend access is serialized; callers treat every operation as blocking
//! and short.

mod models;
pub mod repository;

pub use models::*;
pub use repository::*;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::warn;

/// Store failure modes surfaced to the resolver and REST layers
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("not a known record kind: {0}")]
    InvalidKind(String),

    #[error("invalid record value: {0}")]
    InvalidValue(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Database handle owning the connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(1);

    /// Open (creating if absent) the record database at `path`.
    ///
    /// The file may be locked by another process; opening is retried a
    /// bounded number of times before giving up with `Unavailable`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        Self::open_url(&url).await
    }

    /// Open from a sqlite connection URL (used directly by tests)
    pub async fn open_url(url: &str) -> Result<Self, StoreError> {
        let mut last_error = None;

        for attempt in 1..=Self::MAX_RETRIES {
            match SqlitePoolOptions::new()
                .max_connections(1)
                .connect(url)
                .await
            {
                Ok(pool) => {
                    let db = Self { pool };
                    db.run_migrations().await?;
                    return Ok(db);
                }
                Err(e) => {
                    warn!("failed to open record database (attempt {attempt}): {e}");
                    last_error = Some(e);
                    if attempt < Self::MAX_RETRIES {
                        tokio::time::sleep(Self::RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(StoreError::Unavailable(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        ))
    }

    /// Get the records repository
    pub fn records(&self) -> RecordRepository {
        RecordRepository::new(self.pool.clone())
    }

    /// Create the schema on first open. Schema evolution is out of scope; an
    /// existing table is left in place untouched.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dns_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind VARCHAR(10) NOT NULL,
                fqdn VARCHAR(255) NOT NULL,
                alias VARCHAR(255),
                address VARCHAR(45),
                priority INTEGER,
                ttl INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_dns_records_fqdn_kind ON dns_records(fqdn, kind)"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_dns_records_alias ON dns_records(alias)"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_dns_records_address ON dns_records(address)"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.sqlite");

        let db = Database::open(&path).await.unwrap();
        assert!(db.records().list().await.unwrap().is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopen_preserves_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.sqlite");

        {
            let db = Database::open(&path).await.unwrap();
            db.records()
                .create_record(
                    &NewRecord::new(
                        crate::dns::message::RecordData::A("10.1.1.1".parse().unwrap()),
                        60,
                    ),
                    "persist.example.com",
                )
                .await
                .unwrap();
        }

        let db = Database::open(&path).await.unwrap();
        let records = db.records().list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fqdn, "persist.example.com");
    }

    #[tokio::test]
    async fn test_unopenable_path_is_unavailable() {
        // a directory path cannot be opened as a database file
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}?mode=ro", dir.path().join("missing.sqlite").display());

        let result = Database::open_url(&url).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
