use crate::error::{AppError, Result};
use crate::models::Transaction;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str =
    "id, idempotency_key, type, amount, status, consumer_id, created_at, updated_at";

/// Repository for transaction records.
#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts on the given connection so the write joins the caller's transaction.
    pub async fn insert(conn: &mut PgConnection, transaction: &Transaction) -> Result<Transaction> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions (id, idempotency_key, type, amount, status, consumer_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction.id)
        .bind(&transaction.idempotency_key)
        .bind(transaction.transaction_type)
        .bind(transaction.amount)
        .bind(transaction.status)
        .bind(transaction.consumer_id)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {}
            FROM transactions
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row.0)
    }

    /// Transactions created under an idempotency key, newest first.
    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE idempotency_key = $1 ORDER BY created_at DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}
