use super::cache::IdempotencyCache;
use super::fingerprint::BodyHash;
use super::key::IdempotencyKey;
use super::record::{IdempotencyRecord, ResponseSnapshot};
use super::storage::{IdempotencyStore, IdempotencyTx};
use crate::config::{CacheFailurePolicy, IdempotencySettings, MAX_TTL_HOURS};
use crate::error::{AppError, Result};
use crate::observability::logging::mask_key;
use crate::observability::metrics::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const LOCK_BACKOFF_START: Duration = Duration::from_millis(10);
const LOCK_BACKOFF_MAX: Duration = Duration::from_millis(250);

/// Counters for idempotency handling, exposed on the stats endpoint.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub lookups: AtomicU64,
    pub proceeds: AtomicU64,
    pub replays: AtomicU64,
    pub conflicts: AtomicU64,
    pub executed: AtomicU64,
    pub reconciled: AtomicU64,
    pub divergences: AtomicU64,
    pub cache_errors: AtomicU64,
    pub cache_write_failures: AtomicU64,
    pub lock_contention: AtomicU64,
    pub purged: AtomicU64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_rate(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            0.0
        } else {
            self.replays.load(Ordering::Relaxed) as f64 / lookups as f64
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            proceeds: self.proceeds.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            divergences: self.divergences.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
            lock_contention: self.lock_contention.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            replay_rate: self.replay_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub proceeds: u64,
    pub replays: u64,
    pub conflicts: u64,
    pub executed: u64,
    pub reconciled: u64,
    pub divergences: u64,
    pub cache_errors: u64,
    pub cache_write_failures: u64,
    pub lock_contention: u64,
    pub purged: u64,
    pub replay_rate: f64,
}

/// Key and fingerprint of a request cleared to run its operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyContext {
    pub key: IdempotencyKey,
    pub body_hash: BodyHash,
}

/// Stored response for a request that was already processed.
#[derive(Debug, Clone)]
pub struct Replay {
    pub data: Box<RawValue>,
    pub original_status: u16,
    pub recorded_at: DateTime<Utc>,
}

/// Verdict of the lookup phase.
#[derive(Debug, Clone)]
pub enum Decision {
    Proceed(IdempotencyContext),
    Replay(Replay),
}

/// Result of the record phase.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The operation ran and its response was recorded.
    Executed(ResponseSnapshot),
    /// Another execution already recorded the key.
    Replayed(Replay),
}

/// Business work that must commit atomically with its idempotency record.
#[async_trait]
pub trait ProtectedOperation<Tx: Send>: Send + Sync {
    type Output: Serialize + Send;

    /// Status reported to the caller on first execution.
    fn success_status(&self) -> u16 {
        201
    }

    fn success_message(&self) -> String;

    /// Runs inside the record transaction. Errors roll back everything.
    async fn execute(&self, tx: &mut Tx, key: &IdempotencyKey) -> Result<Self::Output>;
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub ttl: chrono::Duration,
    pub cache_failure_policy: CacheFailurePolicy,
    pub lock_enabled: bool,
    pub lock_lease: Duration,
    /// Longest a contended request polls for the lock. Capped by the lease.
    pub lock_wait: Duration,
}

impl From<&IdempotencySettings> for CoordinatorConfig {
    fn from(settings: &IdempotencySettings) -> Self {
        Self {
            ttl: chrono::Duration::hours(settings.ttl_hours.clamp(1, MAX_TTL_HOURS)),
            cache_failure_policy: settings.cache_failure_policy,
            lock_enabled: settings.lock_enabled,
            lock_lease: Duration::from_secs(settings.lock_lease_secs),
            lock_wait: Duration::from_millis(settings.lock_wait_ms),
        }
    }
}

/// Lock held for the record phase. `waited` is set when another execution held it first.
struct LockClaim {
    token: Option<String>,
    waited: bool,
}

/// Decides replay, conflict or proceed, and records executions exactly once.
pub struct IdempotencyCoordinator<S: IdempotencyStore> {
    store: S,
    cache: Arc<dyn IdempotencyCache>,
    config: CoordinatorConfig,
    stats: Arc<CoordinatorStats>,
}

impl<S: IdempotencyStore> IdempotencyCoordinator<S> {
    pub fn new(store: S, cache: Arc<dyn IdempotencyCache>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            cache,
            config,
            stats: Arc::new(CoordinatorStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<CoordinatorStats> {
        Arc::clone(&self.stats)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Lookup phase. A fingerprint mismatch is returned as [`AppError::Conflict`].
    pub async fn lookup(&self, key: &IdempotencyKey, body_hash: &BodyHash) -> Result<Decision> {
        CoordinatorStats::bump(&self.stats.lookups);
        let now = Utc::now();

        let existing = match self.cache.get(key).await {
            Ok(Some(record)) if !record.is_expired_at(now) => Some(record),
            Ok(_) => self.read_through(key, now).await?,
            Err(e) => {
                self.note_cache_error("lookup");
                match self.config.cache_failure_policy {
                    CacheFailurePolicy::FailClosed => {
                        tracing::error!(key = %mask_key(key.as_str()), error = %e, "Idempotency cache lookup failed");
                        return Err(AppError::StoreUnavailable(format!(
                            "idempotency cache lookup failed: {}",
                            e
                        )));
                    }
                    CacheFailurePolicy::FailOpen => {
                        tracing::warn!(key = %mask_key(key.as_str()), error = %e, "Idempotency cache unavailable, using durable store");
                        self.store.find_live(key, now).await?
                    }
                }
            }
        };

        match existing {
            Some(record) => self.resolve_existing(&record, body_hash).map(Decision::Replay),
            None => {
                CoordinatorStats::bump(&self.stats.proceeds);
                get_metrics().record_idempotency_lookup("proceed");
                Ok(Decision::Proceed(IdempotencyContext {
                    key: key.clone(),
                    body_hash: body_hash.clone(),
                }))
            }
        }
    }

    /// Record phase: runs `op` and stores its response in one transaction.
    pub async fn execute<Op>(&self, ctx: &IdempotencyContext, op: &Op) -> Result<Outcome>
    where
        Op: ProtectedOperation<S::Tx> + ?Sized,
    {
        let timer = LatencyTimer::new();
        let claim = self.acquire_lock(&ctx.key).await?;

        let result = if claim.waited {
            self.recheck_after_wait(ctx, op).await
        } else {
            self.record(ctx, op).await
        };

        if let Some(token) = claim.token {
            if let Err(e) = self.cache.release_lock(&ctx.key, &token).await {
                // The lease expires on its own.
                tracing::warn!(key = %mask_key(ctx.key.as_str()), error = %e, "Failed to release idempotency lock");
            }
        }

        get_metrics().record_idempotency_execute_latency(timer.elapsed_ms());
        result
    }

    /// Live record for `key`, straight from the durable store.
    pub async fn find_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        self.store.find_live(key, Utc::now()).await
    }

    /// Overwrites the stored response of a live record and refreshes the cache.
    pub async fn correct_response<T: Serialize + ?Sized + Sync>(
        &self,
        key: &IdempotencyKey,
        status: u16,
        message: &str,
        data: &T,
    ) -> Result<IdempotencyRecord> {
        let payload = ResponseSnapshot::capture(status, message, data)?.encode()?;
        let updated = self
            .store
            .update_response(key, &payload, Utc::now())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No live idempotency record for key '{}'", key))
            })?;

        if let Err(e) = self.cache.put(&updated).await {
            self.note_cache_write_failure(key.as_str(), &e);
            // A stale entry would keep replaying the old response.
            if let Err(e) = self.cache.remove(key).await {
                tracing::error!(key = %mask_key(key.as_str()), error = %e, "Stale idempotency cache entry could not be removed");
            }
        }

        tracing::info!(key = %mask_key(key.as_str()), "Idempotency response corrected");
        Ok(updated)
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        self.stats.purged.fetch_add(purged, Ordering::Relaxed);
        get_metrics().record_idempotency_purged(purged);
        Ok(purged)
    }

    async fn read_through(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>> {
        let record = self.store.find_live(key, now).await?;
        if let Some(ref found) = record {
            self.populate_cache(found).await;
        }
        Ok(record)
    }

    fn resolve_existing(&self, record: &IdempotencyRecord, body_hash: &BodyHash) -> Result<Replay> {
        if !record.matches(body_hash) {
            CoordinatorStats::bump(&self.stats.conflicts);
            get_metrics().record_idempotency_lookup("conflict");
            return Err(AppError::Conflict(
                "Request with the same Idempotency-Key but different body has already been processed"
                    .to_string(),
            ));
        }

        let snapshot = record.snapshot()?;
        CoordinatorStats::bump(&self.stats.replays);
        get_metrics().record_idempotency_lookup("replay");

        Ok(Replay {
            data: snapshot.data,
            original_status: snapshot.status,
            recorded_at: record.created_at,
        })
    }

    /// Takes the per-key lock, polling with capped exponential backoff while
    /// another execution holds it. Gives up once the wait bound has passed.
    async fn acquire_lock(&self, key: &IdempotencyKey) -> Result<LockClaim> {
        if !self.config.lock_enabled {
            return Ok(LockClaim { token: None, waited: false });
        }

        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.config.lock_wait.min(self.config.lock_lease);
        let mut backoff = LOCK_BACKOFF_START;
        let mut waited = false;

        loop {
            match self.cache.try_lock(key, &token, self.config.lock_lease).await {
                Ok(true) => return Ok(LockClaim { token: Some(token), waited }),
                Ok(false) => {
                    if !waited {
                        waited = true;
                        CoordinatorStats::bump(&self.stats.lock_contention);
                        get_metrics().record_idempotency_lock_contention();
                        tracing::debug!(key = %mask_key(key.as_str()), "Idempotency key in flight, waiting for lock");
                    }

                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AppError::RequestInFlight(
                            "A request with this Idempotency-Key is already being processed, retry later"
                                .to_string(),
                        ));
                    }
                    tokio::time::sleep(backoff.min(deadline - now)).await;
                    backoff = (backoff * 2).min(LOCK_BACKOFF_MAX);
                }
                Err(e) => {
                    self.note_cache_error("lock");
                    return match self.config.cache_failure_policy {
                        CacheFailurePolicy::FailClosed => Err(AppError::StoreUnavailable(format!(
                            "idempotency lock unavailable: {}",
                            e
                        ))),
                        CacheFailurePolicy::FailOpen => {
                            tracing::warn!(key = %mask_key(key.as_str()), error = %e, "Proceeding without idempotency lock");
                            Ok(LockClaim { token: None, waited })
                        }
                    };
                }
            }
        }
    }

    /// Repeats the lookup once the previous holder let go of the lock. The
    /// holder usually committed, so this normally replays or conflicts.
    async fn recheck_after_wait<Op>(&self, ctx: &IdempotencyContext, op: &Op) -> Result<Outcome>
    where
        Op: ProtectedOperation<S::Tx> + ?Sized,
    {
        match self.store.find_live(&ctx.key, Utc::now()).await? {
            Some(winner) => {
                let replay = self.resolve_existing(&winner, &ctx.body_hash)?;
                self.populate_cache(&winner).await;
                Ok(Outcome::Replayed(replay))
            }
            // The holder failed or its lease ran out without a commit.
            None => self.record(ctx, op).await,
        }
    }

    async fn record<Op>(&self, ctx: &IdempotencyContext, op: &Op) -> Result<Outcome>
    where
        Op: ProtectedOperation<S::Tx> + ?Sized,
    {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        if let Some(existing) = tx.find_existing(&ctx.key).await? {
            if existing.is_expired_at(now) {
                tx.delete_expired(&ctx.key, now).await?;
                tracing::debug!(key = %mask_key(ctx.key.as_str()), "Reclaiming expired idempotency key");
            } else {
                drop(tx);
                CoordinatorStats::bump(&self.stats.divergences);
                get_metrics().record_idempotency_divergence();
                tracing::warn!(
                    key = %mask_key(ctx.key.as_str()),
                    "Idempotency key already recorded in durable store after lookup missed it"
                );
                let replay = self.resolve_existing(&existing, &ctx.body_hash)?;
                self.populate_cache(&existing).await;
                return Ok(Outcome::Replayed(replay));
            }
        }

        let output = op.execute(&mut tx, &ctx.key).await?;
        let snapshot =
            ResponseSnapshot::capture(op.success_status(), op.success_message(), &output)?;
        let record = IdempotencyRecord::new(&ctx.key, &ctx.body_hash, snapshot.encode()?, self.config.ttl);

        // The store connection goes back to the pool before reconciling, which
        // needs a fresh one.
        let inserted = tx.insert(&record).await;
        let committed = match inserted {
            Ok(()) => tx.commit().await,
            Err(e) => {
                drop(tx);
                Err(e)
            }
        };

        match committed {
            Ok(()) => {}
            Err(AppError::DuplicateKey(_)) => return self.reconcile_lost_claim(ctx).await,
            Err(e) => return Err(e),
        }

        CoordinatorStats::bump(&self.stats.executed);
        get_metrics().record_idempotency_record_created();
        tracing::info!(key = %mask_key(ctx.key.as_str()), record_id = %record.id, "Idempotency record committed");

        self.populate_cache(&record).await;
        Ok(Outcome::Executed(snapshot))
    }

    /// Resolves a uniqueness violation against whichever execution won.
    async fn reconcile_lost_claim(&self, ctx: &IdempotencyContext) -> Result<Outcome> {
        CoordinatorStats::bump(&self.stats.reconciled);

        match self.store.find_live(&ctx.key, Utc::now()).await? {
            Some(winner) => {
                tracing::info!(key = %mask_key(ctx.key.as_str()), "Lost idempotency claim race, reconciling with committed record");
                get_metrics().record_idempotency_reconciled("resolved");
                let replay = self.resolve_existing(&winner, &ctx.body_hash)?;
                self.populate_cache(&winner).await;
                Ok(Outcome::Replayed(replay))
            }
            None => {
                get_metrics().record_idempotency_reconciled("missing");
                tracing::error!(key = %mask_key(ctx.key.as_str()), "Uniqueness violation without a visible idempotency record");
                Err(AppError::InvariantViolation(format!(
                    "duplicate idempotency key {} has no live record",
                    mask_key(ctx.key.as_str())
                )))
            }
        }
    }

    /// Best-effort cache write. Failures never undo a durable commit.
    async fn populate_cache(&self, record: &IdempotencyRecord) {
        if let Err(e) = self.cache.put(record).await {
            self.note_cache_write_failure(&record.key, &e);
        }
    }

    fn note_cache_error(&self, stage: &str) {
        CoordinatorStats::bump(&self.stats.cache_errors);
        get_metrics().record_idempotency_cache_error(stage);
    }

    fn note_cache_write_failure(&self, key: &str, err: &AppError) {
        CoordinatorStats::bump(&self.stats.cache_write_failures);
        get_metrics().record_idempotency_cache_error("write");
        tracing::warn!(key = %mask_key(key), error = %err, "Failed to write idempotency cache entry");
    }
}

/// Background cleanup job for expired idempotency records.
pub struct IdempotencyCleanupJob<S: IdempotencyStore> {
    coordinator: Arc<IdempotencyCoordinator<S>>,
    interval_seconds: u64,
}

impl<S: IdempotencyStore> IdempotencyCleanupJob<S> {
    pub fn new(coordinator: Arc<IdempotencyCoordinator<S>>, interval_seconds: u64) -> Self {
        Self {
            coordinator,
            interval_seconds,
        }
    }

    pub async fn run_once(&self) -> Result<u64> {
        self.coordinator.cleanup_expired().await
    }

    /// Spawns the purge loop. The first pass runs one interval after start.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "Purged expired idempotency records"),
                    Err(e) => tracing::error!(error = %e, "Idempotency purge failed"),
                }
            }
        })
    }
}
