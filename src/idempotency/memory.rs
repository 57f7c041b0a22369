//! In-process store and cache.
//!
//! Used by tests and local runs without PostgreSQL or Redis. Semantics match
//! the durable implementations: uniqueness is enforced at commit, and entries
//! disappear at their expiry instant.

use super::cache::IdempotencyCache;
use super::key::IdempotencyKey;
use super::record::IdempotencyRecord;
use super::storage::{IdempotencyStore, IdempotencyTx};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, IdempotencyRecord>,
    entities: Vec<Value>,
}

/// Durable store held in memory.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly, bypassing the record phase.
    pub async fn put_record(&self, record: IdempotencyRecord) {
        self.state.lock().await.records.insert(record.key.clone(), record);
    }

    pub async fn record(&self, key: &str) -> Option<IdempotencyRecord> {
        self.state.lock().await.records.get(key).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Business entities committed alongside records, in commit order.
    pub async fn entities(&self) -> Vec<Value> {
        self.state.lock().await.entities.clone()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    type Tx = MemoryIdempotencyTx;

    async fn find_live(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(key.as_str())
            .filter(|r| !r.is_expired_at(now))
            .cloned())
    }

    async fn begin(&self) -> Result<MemoryIdempotencyTx> {
        Ok(MemoryIdempotencyTx {
            state: Arc::clone(&self.state),
            deletes: Vec::new(),
            inserts: Vec::new(),
            entities: Vec::new(),
        })
    }

    async fn update_response(
        &self,
        key: &IdempotencyKey,
        response_payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(key.as_str()) {
            Some(record) if !record.is_expired_at(now) => {
                record.response_payload = response_payload.to_string();
                record.updated_at = now;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state.records.retain(|_, r| !r.is_expired_at(now));
        Ok((before - state.records.len()) as u64)
    }
}

/// Staged writes applied atomically on commit.
pub struct MemoryIdempotencyTx {
    state: Arc<Mutex<StoreState>>,
    deletes: Vec<String>,
    inserts: Vec<IdempotencyRecord>,
    entities: Vec<Value>,
}

impl MemoryIdempotencyTx {
    /// Stages a business entity so it commits or rolls back with the record.
    pub fn stage_entity(&mut self, entity: Value) {
        self.entities.push(entity);
    }
}

#[async_trait]
impl IdempotencyTx for MemoryIdempotencyTx {
    async fn find_existing(&mut self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        if let Some(staged) = self.inserts.iter().find(|r| r.key == key.as_str()) {
            return Ok(Some(staged.clone()));
        }
        if self.deletes.iter().any(|k| k == key.as_str()) {
            return Ok(None);
        }
        Ok(self.state.lock().await.records.get(key.as_str()).cloned())
    }

    async fn delete_expired(&mut self, key: &IdempotencyKey, now: DateTime<Utc>) -> Result<u64> {
        let state = self.state.lock().await;
        match state.records.get(key.as_str()) {
            Some(record) if record.is_expired_at(now) => {
                self.deletes.push(key.as_str().to_string());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn insert(&mut self, record: &IdempotencyRecord) -> Result<()> {
        if self.inserts.iter().any(|r| r.key == record.key) {
            return Err(AppError::DuplicateKey(record.key.clone()));
        }
        self.inserts.push(record.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.state.lock().await;

        // Another transaction may have committed the same key since this one
        // looked; reject before applying anything.
        for record in &self.inserts {
            let reclaimed = self.deletes.iter().any(|k| *k == record.key)
                && state
                    .records
                    .get(&record.key)
                    .map(|existing| existing.is_expired())
                    .unwrap_or(true);
            if state.records.contains_key(&record.key) && !reclaimed {
                return Err(AppError::DuplicateKey(record.key.clone()));
            }
        }

        for key in &self.deletes {
            state.records.remove(key);
        }
        for record in self.inserts {
            state.records.insert(record.key.clone(), record);
        }
        state.entities.extend(self.entities);
        Ok(())
    }
}

/// Fast cache held in memory, with an outage switch for failure-path tests.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyCache {
    entries: Arc<Mutex<HashMap<String, IdempotencyRecord>>>,
    locks: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    key_prefix: String,
    offline: Arc<AtomicBool>,
}

impl MemoryIdempotencyCache {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ..Self::default()
        }
    }

    /// While offline every call fails with [`AppError::StoreUnavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn contains(&self, cache_key: &str) -> bool {
        self.entries.lock().await.contains_key(cache_key)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("memory cache is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyCache for MemoryIdempotencyCache {
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        self.ensure_online()?;
        let cache_key = key.cache_key(&self.key_prefix);
        let mut entries = self.entries.lock().await;
        match entries.get(&cache_key) {
            Some(record) if record.is_expired() => {
                entries.remove(&cache_key);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn put(&self, record: &IdempotencyRecord) -> Result<()> {
        self.ensure_online()?;
        if record.is_expired() {
            return Ok(());
        }
        self.entries
            .lock()
            .await
            .insert(format!("{}{}", self.key_prefix, record.key), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<()> {
        self.ensure_online()?;
        self.entries.lock().await.remove(&key.cache_key(&self.key_prefix));
        Ok(())
    }

    async fn try_lock(&self, key: &IdempotencyKey, token: &str, lease: Duration) -> Result<bool> {
        self.ensure_online()?;
        let lock_key = key.lock_key(&self.key_prefix);
        let now = Instant::now();
        let mut locks = self.locks.lock().await;

        if let Some((_, deadline)) = locks.get(&lock_key) {
            if *deadline > now {
                return Ok(false);
            }
        }
        locks.insert(lock_key, (token.to_string(), now + lease));
        Ok(true)
    }

    async fn release_lock(&self, key: &IdempotencyKey, token: &str) -> Result<()> {
        self.ensure_online()?;
        let lock_key = key.lock_key(&self.key_prefix);
        let mut locks = self.locks.lock().await;
        if locks.get(&lock_key).map(|(owner, _)| owner == token).unwrap_or(false) {
            locks.remove(&lock_key);
        }
        Ok(())
    }
}
