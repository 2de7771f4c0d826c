// src/store.rs

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rusqlite::params;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;

use crate::models::DownloadJob;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no job with id {0}")]
    MissingJob(u64),
}

/// Persistence collaborator for job records. The engine receives one at
/// construction (plain dependency injection, no process-wide handle) and
/// calls it on creation and on every status-significant transition; a
/// store error is logged by the caller and never aborts the in-memory
/// transfer.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new record and returns the id it was assigned.
    async fn save_job(&self, job: &DownloadJob) -> Result<u64, StoreError>;
    /// Rewrites an existing record.
    async fn update_job(&self, job: &DownloadJob) -> Result<(), StoreError>;
    /// All known records, including terminal ones kept as history.
    async fn list_jobs(&self) -> Result<Vec<DownloadJob>, StoreError>;
}

/// SQLite-backed store: one `downloads` table with the record serialized
/// into a JSON column, ids assigned by the database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).await?;
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS downloads (
                    id       INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_data TEXT NOT NULL
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn save_job(&self, job: &DownloadJob) -> Result<u64, StoreError> {
        let mut record = job.clone();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute("INSERT INTO downloads (job_data) VALUES ('')", [])?;
                let id = conn.last_insert_rowid() as u64;
                record.id = id;
                let data = serde_json::to_string(&record)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                conn.execute(
                    "UPDATE downloads SET job_data = ?2 WHERE id = ?1",
                    params![id, data],
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    async fn update_job(&self, job: &DownloadJob) -> Result<(), StoreError> {
        let id = job.id;
        let data = serde_json::to_string(job)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO downloads (id, job_data) VALUES (?1, ?2)",
                    params![id, data],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<DownloadJob>, StoreError> {
        let jobs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT job_data FROM downloads ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    let data: String = row.get(0)?;
                    let job: DownloadJob = serde_json::from_str(&data).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(job)
                })?;
                let jobs: Result<Vec<DownloadJob>, rusqlite::Error> = rows.collect();
                Ok(jobs?)
            })
            .await?;
        Ok(jobs)
    }
}

/// In-process store for tests and front ends that do not need durability.
#[derive(Debug)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<u64, DownloadJob>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &DownloadJob) -> Result<u64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut record = job.clone();
        record.id = id;
        self.jobs.lock().await.insert(id, record);
        Ok(id)
    }

    async fn update_job(&self, job: &DownloadJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::MissingJob(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<DownloadJob>, StoreError> {
        let mut jobs: Vec<DownloadJob> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }
}
