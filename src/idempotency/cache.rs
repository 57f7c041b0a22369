use super::key::IdempotencyKey;
use super::record::IdempotencyRecord;
use crate::error::{AppError, Result};
use crate::observability::metrics::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use std::time::Duration;

/// Fast lookup tier in front of the durable store.
///
/// Entries are advisory: the durable store stays authoritative, and a cache
/// entry never outlives the durable record it mirrors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>>;

    /// Stores the record until its own expiry. Expired records are skipped.
    async fn put(&self, record: &IdempotencyRecord) -> Result<()>;

    async fn remove(&self, key: &IdempotencyKey) -> Result<()>;

    /// Takes the claim lock for `key` if free. Returns false when held.
    async fn try_lock(&self, key: &IdempotencyKey, token: &str, lease: Duration) -> Result<bool>;

    /// Releases the claim lock only if it is still held by `token`.
    async fn release_lock(&self, key: &IdempotencyKey, token: &str) -> Result<()>;
}

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed cache. Records live at `{prefix}{key}`, locks at `{prefix}lock:{key}`.
pub struct RedisIdempotencyCache {
    client: redis::Client,
    key_prefix: String,
    release_script: redis::Script,
}

impl RedisIdempotencyCache {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            release_script: redis::Script::new(RELEASE_LOCK_SCRIPT),
        }
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }

    fn observe<T>(operation: &str, timer: LatencyTimer, result: &Result<T>) {
        get_metrics().record_redis_operation(operation, timer.elapsed_ms(), result.is_ok());
    }

    async fn get_inner(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self.connection().await?;
        let cache_key = key.cache_key(&self.key_prefix);
        let cached: Option<String> = conn.get(&cache_key).await.map_err(AppError::Redis)?;

        let Some(json) = cached else {
            return Ok(None);
        };

        match serde_json::from_str::<IdempotencyRecord>(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // Unreadable entries are dropped so the durable store answers instead.
                tracing::warn!(error = %e, "Discarding unreadable idempotency cache entry");
                let _: i64 = conn.del(&cache_key).await.map_err(AppError::Redis)?;
                Ok(None)
            }
        }
    }

    async fn put_inner(&self, record: &IdempotencyRecord) -> Result<()> {
        let Some(ttl) = record.remaining_ttl(Utc::now()) else {
            return Ok(());
        };
        // Round down so the entry can never outlive the durable record.
        let seconds = ttl.as_secs();
        if seconds == 0 {
            return Ok(());
        }

        let json = serde_json::to_string(record)?;
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(self.make_key(&record.key), json, seconds)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        let timer = LatencyTimer::new();
        let result = self.get_inner(key).await;
        Self::observe("idempotency_get", timer, &result);
        result
    }

    async fn put(&self, record: &IdempotencyRecord) -> Result<()> {
        let timer = LatencyTimer::new();
        let result = self.put_inner(record).await;
        Self::observe("idempotency_put", timer, &result);
        result
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .del(key.cache_key(&self.key_prefix))
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }

    async fn try_lock(&self, key: &IdempotencyKey, token: &str, lease: Duration) -> Result<bool> {
        let timer = LatencyTimer::new();
        let lease_ms = lease.as_millis().max(1) as u64;

        let result = async {
            let mut conn = self.connection().await?;
            // SET NX PX answers OK when taken and nil when already held.
            let acquired: Option<String> = redis::cmd("SET")
                .arg(key.lock_key(&self.key_prefix))
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async(&mut conn)
                .await
                .map_err(AppError::Redis)?;
            Ok::<bool, AppError>(acquired.is_some())
        }
        .await;

        Self::observe("idempotency_lock", timer, &result);
        result
    }

    async fn release_lock(&self, key: &IdempotencyKey, token: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = self
            .release_script
            .key(key.lock_key(&self.key_prefix))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }
}
