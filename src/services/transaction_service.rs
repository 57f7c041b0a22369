use crate::api::responses::{TransactionResponse, TRANSACTION_CREATED};
use crate::error::{AppError, Result};
use crate::idempotency::{IdempotencyKey, PgIdempotencyTx, ProtectedOperation};
use crate::models::{Consumer, NewTransaction, Transaction};
use crate::observability::{get_metrics, mask_amount};
use crate::repositories::{ConsumerRepository, TransactionRepository};
use crate::services::consumer_service::Page;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Service for transaction booking and lookup.
pub struct TransactionService {
    pool: PgPool,
    transaction_repo: TransactionRepository,
}

impl TransactionService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            transaction_repo: TransactionRepository::new(pool.clone()),
            pool,
        }
    }

    /// Checks that the referenced consumer exists and may transact.
    pub fn ensure_consumer_can_transact(consumer: Option<Consumer>, consumer_id: Uuid) -> Result<Consumer> {
        let consumer = consumer.ok_or_else(|| {
            AppError::NotFound(format!("Consumer with id '{}' not found", consumer_id))
        })?;

        if !consumer.status.can_transact() {
            return Err(AppError::InvalidData(format!(
                "Consumer '{}' is {} and cannot create transactions",
                consumer_id, consumer.status
            )));
        }
        Ok(consumer)
    }

    /// Books a transaction on `conn`. Nothing is visible until the caller commits.
    pub async fn create_in(
        conn: &mut PgConnection,
        input: &NewTransaction,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction> {
        let consumer = ConsumerRepository::find_by_id_for_share(conn, input.consumer_id).await?;
        Self::ensure_consumer_can_transact(consumer, input.consumer_id)?;

        let transaction = Transaction::new(input, idempotency_key.map(str::to_string));
        let created = TransactionRepository::insert(conn, &transaction).await?;

        get_metrics().record_transaction_created(created.transaction_type.as_str());
        tracing::info!(
            transaction_id = %created.id,
            consumer_id = %created.consumer_id,
            amount = %mask_amount(&created.amount),
            "Transaction created"
        );
        Ok(created)
    }

    /// Creates a transaction outside idempotency enforcement.
    pub async fn create_transaction(&self, input: &NewTransaction) -> Result<Transaction> {
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;
        let created = Self::create_in(&mut tx, input, None).await?;
        tx.commit().await.map_err(AppError::Database)?;
        Ok(created)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Transaction> {
        self.transaction_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction with id '{}' not found", id)))
    }

    /// Lists transactions newest first. An empty page is reported as not found.
    pub async fn list_transactions(&self, page: Page) -> Result<(Vec<Transaction>, i64)> {
        let transactions = self.transaction_repo.list(page.limit, page.offset()).await?;
        if transactions.is_empty() {
            return Err(AppError::NotFound("No transactions found".to_string()));
        }
        let total = self.transaction_repo.count().await?;
        Ok((transactions, total))
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Vec<Transaction>> {
        self.transaction_repo.find_by_idempotency_key(key).await
    }
}

/// Transaction creation guarded by an idempotency key.
pub struct CreateTransactionOperation {
    input: NewTransaction,
}

impl CreateTransactionOperation {
    pub fn new(input: NewTransaction) -> Self {
        Self { input }
    }
}

#[async_trait]
impl ProtectedOperation<PgIdempotencyTx> for CreateTransactionOperation {
    type Output = TransactionResponse;

    fn success_message(&self) -> String {
        TRANSACTION_CREATED.to_string()
    }

    async fn execute(&self, tx: &mut PgIdempotencyTx, key: &IdempotencyKey) -> Result<TransactionResponse> {
        let created = TransactionService::create_in(tx.connection(), &self.input, Some(key.as_str())).await?;
        Ok(TransactionResponse::from(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConsumerStatus;
    use chrono::NaiveDate;

    fn consumer(status: ConsumerStatus) -> Consumer {
        let mut consumer = Consumer::new(
            "Grace Hopper".into(),
            "grace".into(),
            "grace@example.com".into(),
            "+15550100".into(),
            "Arlington".into(),
            NaiveDate::from_ymd_opt(1985, 12, 9).unwrap(),
        );
        consumer.status = status;
        consumer
    }

    #[test]
    fn test_missing_consumer_is_not_found() {
        let err = TransactionService::ensure_consumer_can_transact(None, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_inactive_consumer_is_invalid_data() {
        for status in [ConsumerStatus::Inactive, ConsumerStatus::Suspended] {
            let c = consumer(status);
            let id = c.id;
            let err = TransactionService::ensure_consumer_can_transact(Some(c), id).unwrap_err();
            assert!(matches!(err, AppError::InvalidData(_)));
        }
    }

    #[test]
    fn test_active_consumer_passes() {
        let c = consumer(ConsumerStatus::Active);
        let id = c.id;
        let checked = TransactionService::ensure_consumer_can_transact(Some(c), id).unwrap();
        assert_eq!(checked.id, id);
    }
}
