pub mod consumer_repository;
pub mod transaction_repository;

pub use consumer_repository::ConsumerRepository;
pub use transaction_repository::TransactionRepository;

use sqlx::PgPool;

/// Database connection pool type alias.
pub type DbPool = PgPool;
