use crate::error::{AppError, Result};
use crate::models::{Consumer, ConsumerStatus};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const CONSUMER_COLUMNS: &str =
    "id, fullname, username, email, phone, address, birth_date, status, created_at, updated_at";

/// Repository for consumer CRUD operations.
#[derive(Clone)]
pub struct ConsumerRepository {
    pool: PgPool,
}

impl ConsumerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, consumer: &Consumer) -> Result<Consumer> {
        let row = sqlx::query_as::<_, Consumer>(&format!(
            r#"
            INSERT INTO consumers (id, fullname, username, email, phone, address, birth_date, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            CONSUMER_COLUMNS
        ))
        .bind(consumer.id)
        .bind(&consumer.fullname)
        .bind(&consumer.username)
        .bind(&consumer.email)
        .bind(&consumer.phone)
        .bind(&consumer.address)
        .bind(consumer.birth_date)
        .bind(consumer.status)
        .bind(consumer.created_at)
        .bind(consumer.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::InvalidData("Username or email is already registered".to_string())
            }
            other => AppError::Database(other),
        })?;

        Ok(row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Consumer>> {
        let row = sqlx::query_as::<_, Consumer>(&format!(
            "SELECT {} FROM consumers WHERE id = $1",
            CONSUMER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Reads a consumer inside an open transaction, holding a share lock so
    /// its status cannot change before the transaction commits.
    pub async fn find_by_id_for_share(conn: &mut PgConnection, id: Uuid) -> Result<Option<Consumer>> {
        let row = sqlx::query_as::<_, Consumer>(&format!(
            "SELECT {} FROM consumers WHERE id = $1 FOR SHARE",
            CONSUMER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list(
        &self,
        status: Option<ConsumerStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Consumer>> {
        let rows = sqlx::query_as::<_, Consumer>(&format!(
            r#"
            SELECT {}
            FROM consumers
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            CONSUMER_COLUMNS
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn update_status(&self, id: Uuid, status: ConsumerStatus) -> Result<Option<Consumer>> {
        let row = sqlx::query_as::<_, Consumer>(&format!(
            r#"
            UPDATE consumers
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            CONSUMER_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
