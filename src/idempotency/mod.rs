pub mod cache;
pub mod coordinator;
pub mod fingerprint;
pub mod interceptor;
pub mod key;
pub mod memory;
pub mod record;
pub mod storage;

pub use cache::{IdempotencyCache, RedisIdempotencyCache};
pub use coordinator::{
    CoordinatorConfig, CoordinatorStats, Decision, IdempotencyCleanupJob, IdempotencyContext,
    IdempotencyCoordinator, Outcome, ProtectedOperation, Replay, StatsSnapshot,
};
pub use fingerprint::{fingerprint, BodyHash};
pub use interceptor::{enforce, Interceptor};
pub use key::{IdempotencyKey, KeyCheck, KeyValidator};
pub use memory::{MemoryIdempotencyCache, MemoryIdempotencyStore, MemoryIdempotencyTx};
pub use record::{IdempotencyRecord, ResponseSnapshot};
pub use storage::{IdempotencyStore, IdempotencyTx, PgIdempotencyTx, PostgresIdempotencyStore};
