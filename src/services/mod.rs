pub mod consumer_service;
pub mod transaction_service;

pub use consumer_service::{ConsumerService, CreateConsumer, Page};
pub use transaction_service::{CreateTransactionOperation, TransactionService};
