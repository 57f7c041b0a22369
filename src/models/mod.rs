pub mod consumer;
pub mod transaction;

pub use consumer::{Consumer, ConsumerStatus};
pub use transaction::{NewTransaction, Transaction, TransactionStatus, TransactionType};
