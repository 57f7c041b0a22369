use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{ConsumerStatus, NewTransaction, TransactionType};
use crate::services::CreateConsumer;

/// Request to register a consumer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsumerRequest {
    #[validate(length(min = 1, max = 100, message = "fullname must be between 1 and 100 characters"))]
    pub fullname: String,
    #[validate(length(min = 3, max = 50, message = "username must be between 3 and 50 characters"))]
    pub username: String,
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 6, max = 20, message = "phone must be between 6 and 20 characters"))]
    pub phone: String,
    #[validate(length(min = 1, max = 255, message = "address must be between 1 and 255 characters"))]
    pub address: String,
    #[validate(custom = "validate_birth_date")]
    pub birth_date: NaiveDate,
}

impl From<CreateConsumerRequest> for CreateConsumer {
    fn from(request: CreateConsumerRequest) -> Self {
        Self {
            fullname: request.fullname,
            username: request.username,
            email: request.email,
            phone: request.phone,
            address: request.address,
            birth_date: request.birth_date,
        }
    }
}

/// Request to change a consumer's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConsumerStatusRequest {
    pub status: ConsumerStatus,
}

/// Request to create a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[validate(custom = "validate_amount")]
    pub amount: Decimal,
    pub consumer_id: Uuid,
}

impl From<CreateTransactionRequest> for NewTransaction {
    fn from(request: CreateTransactionRequest) -> Self {
        Self {
            transaction_type: request.transaction_type,
            amount: request.amount,
            consumer_id: request.consumer_id,
        }
    }
}

/// Query parameters for paginated listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() || amount.is_zero() {
        let mut err = ValidationError::new("positive");
        err.message = Some("amount must be positive".into());
        return Err(err);
    }
    if amount.normalize().scale() > 2 {
        let mut err = ValidationError::new("precision");
        err.message = Some("amount must have at most two decimal places".into());
        return Err(err);
    }
    Ok(())
}

fn validate_birth_date(date: &NaiveDate) -> Result<(), ValidationError> {
    if *date > Utc::now().date_naive() {
        let mut err = ValidationError::new("future_date");
        err.message = Some("birthDate cannot be in the future".into());
        return Err(err);
    }
    Ok(())
}

/// Flattens field errors into one line, fields in name order.
pub fn describe_validation_errors(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by_key(|(field, _)| *field);

    fields
        .into_iter()
        .filter_map(|(field, errs)| {
            errs.first().map(|e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transaction(amount: Decimal) -> CreateTransactionRequest {
        CreateTransactionRequest {
            transaction_type: TransactionType::Payment,
            amount,
            consumer_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_transaction_request_deserializes_wire_shape() {
        let id = Uuid::new_v4();
        let body = format!(r#"{{"type":"payment","amount":150000,"consumerId":"{}"}}"#, id);
        let request: CreateTransactionRequest = serde_json::from_str(&body).unwrap();

        assert_eq!(request.transaction_type, TransactionType::Payment);
        assert_eq!(request.amount, dec!(150000));
        assert_eq!(request.consumer_id, id);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_amount_rules() {
        assert!(transaction(dec!(10.25)).validate().is_ok());

        let errors = transaction(dec!(0)).validate().unwrap_err();
        assert_eq!(describe_validation_errors(&errors), "amount must be positive");

        let errors = transaction(dec!(-5)).validate().unwrap_err();
        assert_eq!(describe_validation_errors(&errors), "amount must be positive");

        let errors = transaction(dec!(1.001)).validate().unwrap_err();
        assert_eq!(
            describe_validation_errors(&errors),
            "amount must have at most two decimal places"
        );

        assert!(transaction(dec!(1.100)).validate().is_ok());
    }

    #[test]
    fn test_consumer_request_errors_are_sorted() {
        let request = CreateConsumerRequest {
            fullname: "Ada Lovelace".into(),
            username: "al".into(),
            email: "not-an-email".into(),
            phone: "+15550100".into(),
            address: "London".into(),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        };

        let errors = request.validate().unwrap_err();
        assert_eq!(
            describe_validation_errors(&errors),
            "email must be a valid address; username must be between 3 and 50 characters"
        );
    }

    #[test]
    fn test_future_birth_date_rejected() {
        let request = CreateConsumerRequest {
            fullname: "Ada Lovelace".into(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            phone: "+15550100".into(),
            address: "London".into(),
            birth_date: Utc::now().date_naive() + chrono::Duration::days(2),
        };

        let errors = request.validate().unwrap_err();
        assert_eq!(describe_validation_errors(&errors), "birthDate cannot be in the future");
    }
}
