use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Operational state of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConsumerStatus {
    Active,
    Inactive,
    Suspended,
}

impl ConsumerStatus {
    /// Only active consumers may originate transactions.
    pub fn can_transact(&self) -> bool {
        matches!(self, ConsumerStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerStatus::Active => "active",
            ConsumerStatus::Inactive => "inactive",
            ConsumerStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account holder that transactions are booked against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub id: Uuid,
    pub fullname: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub birth_date: NaiveDate,
    pub status: ConsumerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consumer {
    pub fn new(
        fullname: String,
        username: String,
        email: String,
        phone: String,
        address: String,
        birth_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            fullname,
            username,
            email,
            phone,
            address,
            birth_date,
            status: ConsumerStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_consumer_is_active() {
        let consumer = Consumer::new(
            "Ada Lovelace".into(),
            "ada".into(),
            "ada@example.com".into(),
            "+441234567".into(),
            "12 St James's Square".into(),
            NaiveDate::from_ymd_opt(1990, 12, 10).unwrap(),
        );
        assert_eq!(consumer.status, ConsumerStatus::Active);
        assert!(consumer.status.can_transact());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&ConsumerStatus::Suspended).unwrap(), "\"suspended\"");
        assert!(!ConsumerStatus::Inactive.can_transact());
        assert_eq!(ConsumerStatus::Inactive.to_string(), "inactive");
    }
}
