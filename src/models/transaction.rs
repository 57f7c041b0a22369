use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Consumer pays in.
    Payment,
    /// Consumer takes funds out.
    Withdrawal,
    /// Funds paid out to the consumer by the platform.
    Disbursement,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Disbursement => "disbursement",
        }
    }
}

/// Status of a transaction in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

/// A transaction booked against a consumer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    /// Key the transaction was created under; set once, absent when enforcement is off.
    pub idempotency_key: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub consumer_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for creating a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub consumer_id: Uuid,
}

impl Transaction {
    /// New transactions always start out pending.
    pub fn new(input: &NewTransaction, idempotency_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            transaction_type: input.transaction_type,
            amount: input.amount.round_dp(2),
            status: TransactionStatus::Pending,
            consumer_id: input.consumer_id,
            created_at: now,
            updated_at: now,
        }
    }
}
