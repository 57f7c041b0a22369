use super::key::IdempotencyKey;
use super::record::IdempotencyRecord;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// Authoritative, durable home of idempotency records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    type Tx: IdempotencyTx;

    /// Returns the record for `key` unless it is missing or expired at `now`.
    async fn find_live(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Opens the transaction the record phase runs in.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Replaces the stored response of a live record.
    async fn update_response(
        &self,
        key: &IdempotencyKey,
        response_payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Deletes every record expired at `now`, returning how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Unit of work shared by the record insert and the protected operation.
///
/// Dropping a transaction without committing discards everything staged in it.
#[async_trait]
pub trait IdempotencyTx: Send {
    /// Looks up `key` regardless of expiry, locking the row where supported.
    async fn find_existing(&mut self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>>;

    async fn delete_expired(&mut self, key: &IdempotencyKey, now: DateTime<Utc>) -> Result<u64>;

    /// Fails with [`AppError::DuplicateKey`] when the key is already taken.
    async fn insert(&mut self, record: &IdempotencyRecord) -> Result<()>;

    async fn commit(self) -> Result<()>;
}

const RECORD_COLUMNS: &str =
    "id, idempotency_key, body_hash, response_payload, created_at, updated_at, expires_at";

/// Maps a unique violation on the key column to [`AppError::DuplicateKey`].
fn classify(err: sqlx::Error, key: &str) -> AppError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::DuplicateKey(key.to_string())
        }
        other => AppError::Database(other),
    }
}

/// PostgreSQL-based idempotency storage.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    type Tx = PgIdempotencyTx;

    async fn find_live(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            "SELECT {} FROM idempotency_records WHERE idempotency_key = $1 AND expires_at > $2",
            RECORD_COLUMNS
        ))
        .bind(key.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }

    async fn begin(&self) -> Result<PgIdempotencyTx> {
        let tx = self.pool.begin().await.map_err(AppError::Database)?;
        Ok(PgIdempotencyTx { tx })
    }

    async fn update_response(
        &self,
        key: &IdempotencyKey,
        response_payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            r#"
            UPDATE idempotency_records
            SET response_payload = $2, updated_at = $3
            WHERE idempotency_key = $1 AND expires_at > $3
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(key.as_str())
        .bind(response_payload)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

/// Open PostgreSQL transaction for one record phase.
pub struct PgIdempotencyTx {
    tx: Transaction<'static, Postgres>,
}

impl PgIdempotencyTx {
    /// Connection for business writes that must commit with the record.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl IdempotencyTx for PgIdempotencyTx {
    async fn find_existing(&mut self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            "SELECT {} FROM idempotency_records WHERE idempotency_key = $1 FOR UPDATE",
            RECORD_COLUMNS
        ))
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }

    async fn delete_expired(&mut self, key: &IdempotencyKey, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM idempotency_records WHERE idempotency_key = $1 AND expires_at <= $2",
        )
        .bind(key.as_str())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    async fn insert(&mut self, record: &IdempotencyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (id, idempotency_key, body_hash, response_payload, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.key)
        .bind(&record.body_hash)
        .bind(&record.response_payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, &record.key))?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(AppError::Database)
    }
}
