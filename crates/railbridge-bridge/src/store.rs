//! Persistent storage for bridge jobs.
//!
//! One row per idempotency key. The store is the only owner of job records;
//! the worker and the admin surface mutate jobs exclusively through
//! [`BridgeJobStore::update`], which refuses to touch terminal jobs.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::Mutex;

use railbridge_types::chain::ChainId;
use railbridge_types::timestamp::UnixTimestamp;

use crate::job::{BridgeJob, BridgeJobStatus};

/// Errors raised by the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A job with this idempotency key already exists.
    #[error("bridge job with idempotency key {0} already exists")]
    DuplicateIdempotencyKey(String),
    #[error("bridge job {0} not found")]
    NotFound(String),
    /// The job is in a terminal state and rejects further updates.
    #[error("bridge job {0} is terminal and cannot be updated")]
    TerminalState(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("corrupt bridge job record: {0}")]
    Corrupt(String),
}

/// Durable storage interface for bridge jobs.
#[async_trait]
pub trait BridgeJobStore: Send + Sync {
    /// Persists a fresh job. Fails with
    /// [`StoreError::DuplicateIdempotencyKey`] when the key is taken.
    async fn create(&self, job: &BridgeJob) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<BridgeJob>, StoreError>;

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<BridgeJob>, StoreError>;

    /// Last-write-wins update of a non-terminal job. Terminal rows reject
    /// the write with [`StoreError::TerminalState`].
    async fn update(&self, job: &BridgeJob) -> Result<(), StoreError>;

    /// Jobs still in `pending` or `bridging` whose last update is at or
    /// before `older_than`. Drives the restart recovery scan.
    async fn list_unfinished(
        &self,
        older_than: UnixTimestamp,
    ) -> Result<Vec<BridgeJob>, StoreError>;
}

/// SQLite-backed job store.
///
/// A single `bridge_jobs` table with a unique index on `idempotency_key`
/// provides the durability and uniqueness the bridge subsystem relies on.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bridge_jobs (
    id                  TEXT PRIMARY KEY,
    idempotency_key     TEXT NOT NULL,
    source_network      TEXT NOT NULL,
    destination_network TEXT NOT NULL,
    source_tx_hash      TEXT NOT NULL,
    amount              TEXT NOT NULL,
    destination_asset   TEXT NOT NULL,
    destination_pay_to  TEXT NOT NULL,
    status              TEXT NOT NULL,
    attempts            INTEGER NOT NULL DEFAULT 0,
    last_error          TEXT,
    bridge_tx_hash      TEXT,
    destination_tx_hash TEXT,
    message_id          TEXT,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_bridge_jobs_idempotency_key
    ON bridge_jobs (idempotency_key);
CREATE INDEX IF NOT EXISTS idx_bridge_jobs_status ON bridge_jobs (status);
CREATE INDEX IF NOT EXISTS idx_bridge_jobs_source_tx ON bridge_jobs (source_tx_hash);
"#;

impl SqliteJobStore {
    /// Opens (and creates, if needed) the database at `path` and applies the
    /// schema.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(StoreError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database, used by tests.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::Database)?;
        // A memory database lives per-connection; the pool must not drop it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<BridgeJob, StoreError> {
        let status: String = row.get("status");
        let status = BridgeJobStatus::from_str(&status).map_err(StoreError::Corrupt)?;
        let source_network: String = row.get("source_network");
        let destination_network: String = row.get("destination_network");
        let attempts: i64 = row.get("attempts");
        let created_at: i64 = row.get("created_at");
        let updated_at: i64 = row.get("updated_at");
        Ok(BridgeJob {
            id: row.get("id"),
            idempotency_key: row.get("idempotency_key"),
            source_network: ChainId::from_str(&source_network)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            destination_network: ChainId::from_str(&destination_network)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            source_tx_hash: row.get("source_tx_hash"),
            amount: row.get("amount"),
            destination_asset: row.get("destination_asset"),
            destination_pay_to: row.get("destination_pay_to"),
            status,
            attempts: attempts as u32,
            last_error: row.get("last_error"),
            bridge_tx_hash: row.get("bridge_tx_hash"),
            destination_tx_hash: row.get("destination_tx_hash"),
            message_id: row.get("message_id"),
            created_at: UnixTimestamp::from_secs(created_at as u64),
            updated_at: UnixTimestamp::from_secs(updated_at as u64),
        })
    }
}

#[async_trait]
impl BridgeJobStore for SqliteJobStore {
    async fn create(&self, job: &BridgeJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO bridge_jobs (
                id, idempotency_key, source_network, destination_network,
                source_tx_hash, amount, destination_asset, destination_pay_to,
                status, attempts, last_error, bridge_tx_hash,
                destination_tx_hash, message_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&job.id)
        .bind(&job.idempotency_key)
        .bind(job.source_network.to_string())
        .bind(job.destination_network.to_string())
        .bind(&job.source_tx_hash)
        .bind(&job.amount)
        .bind(&job.destination_asset)
        .bind(&job.destination_pay_to)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(&job.last_error)
        .bind(&job.bridge_tx_hash)
        .bind(&job.destination_tx_hash)
        .bind(&job.message_id)
        .bind(job.created_at.as_secs() as i64)
        .bind(job.updated_at.as_secs() as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                StoreError::DuplicateIdempotencyKey(job.idempotency_key.clone()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<BridgeJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM bridge_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<BridgeJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM bridge_jobs WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update(&self, job: &BridgeJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE bridge_jobs SET
                status = ?, attempts = ?, last_error = ?, bridge_tx_hash = ?,
                destination_tx_hash = ?, message_id = ?, updated_at = ?
            WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')"#,
        )
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(&job.last_error)
        .bind(&job.bridge_tx_hash)
        .bind(&job.destination_tx_hash)
        .bind(&job.message_id)
        .bind(job.updated_at.as_secs() as i64)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(&job.id).await? {
                Some(_) => Err(StoreError::TerminalState(job.id.clone())),
                None => Err(StoreError::NotFound(job.id.clone())),
            };
        }
        Ok(())
    }

    async fn list_unfinished(
        &self,
        older_than: UnixTimestamp,
    ) -> Result<Vec<BridgeJob>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM bridge_jobs
            WHERE status IN ('pending', 'bridging') AND updated_at <= ?
            ORDER BY created_at ASC"#,
        )
        .bind(older_than.as_secs() as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }
}

/// In-memory job store used by worker and facilitator tests.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, BridgeJob>>,
}

#[async_trait]
impl BridgeJobStore for MemoryJobStore {
    async fn create(&self, job: &BridgeJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if jobs
            .values()
            .any(|existing| existing.idempotency_key == job.idempotency_key)
        {
            return Err(StoreError::DuplicateIdempotencyKey(
                job.idempotency_key.clone(),
            ));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<BridgeJob>, StoreError> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<BridgeJob>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .find(|job| job.idempotency_key == key)
            .cloned())
    }

    async fn update(&self, job: &BridgeJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get(&job.id) {
            None => Err(StoreError::NotFound(job.id.clone())),
            Some(existing) if existing.status.is_terminal() => {
                Err(StoreError::TerminalState(job.id.clone()))
            }
            Some(_) => {
                jobs.insert(job.id.clone(), job.clone());
                Ok(())
            }
        }
    }

    async fn list_unfinished(
        &self,
        older_than: UnixTimestamp,
    ) -> Result<Vec<BridgeJob>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| !job.status.is_terminal() && job.updated_at <= older_than)
            .cloned()
            .collect())
    }
}
