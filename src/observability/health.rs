use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::future::Future;
use std::time::{Duration, Instant};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DATABASE: &str = "database";
const CACHE: &str = "redis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Outcome of checking one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DependencyHealth {
    /// Healthy when the check answered within `slow_ms`, degraded when it answered late.
    fn answered(name: &str, latency_ms: f64, slow_ms: f64) -> Self {
        let slow = latency_ms > slow_ms;
        Self {
            name: name.to_string(),
            status: if slow { HealthStatus::Degraded } else { HealthStatus::Healthy },
            latency_ms: Some(latency_ms),
            message: slow.then(|| format!("latency above {}ms", slow_ms)),
        }
    }

    fn failed(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Snapshot returned by `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl HealthReport {
    fn new(uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        // Worst dependency wins.
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds,
            dependencies,
        }
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyHealth> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// The durable store must be fully healthy. The cache only gates readiness when
    /// idempotent writes fail closed without it.
    pub fn is_ready(&self, cache_required: bool) -> bool {
        let db_ok = self
            .dependency(DATABASE)
            .is_some_and(|d| d.status == HealthStatus::Healthy);
        let cache_ok = !cache_required
            || self
                .dependency(CACHE)
                .is_some_and(|d| d.status != HealthStatus::Unhealthy);
        db_ok && cache_ok
    }
}

/// Checks Postgres and Redis.
pub struct HealthChecker {
    pool: PgPool,
    redis_client: redis::Client,
    cache_required: bool,
    started: Instant,
}

impl HealthChecker {
    pub fn new(pool: PgPool, redis_client: redis::Client, cache_required: bool) -> Self {
        Self {
            pool,
            redis_client,
            cache_required,
            started: Instant::now(),
        }
    }

    pub async fn report(&self) -> HealthReport {
        let (db, cache) = tokio::join!(self.check_database(), self.check_cache());
        HealthReport::new(self.started.elapsed().as_secs(), vec![db, cache])
    }

    pub async fn is_ready(&self) -> bool {
        self.report().await.is_ready(self.cache_required)
    }

    async fn check_database(&self) -> DependencyHealth {
        let query = sqlx::query("SELECT 1").fetch_one(&self.pool);
        timed(DATABASE, 100.0, query).await
    }

    async fn check_cache(&self) -> DependencyHealth {
        let client = self.redis_client.clone();
        let ping = async move {
            let mut conn = client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<_, ()>(&mut conn).await
        };
        timed(CACHE, 50.0, ping).await
    }
}

async fn timed<F, T, E>(name: &str, slow_ms: f64, check: F) -> DependencyHealth
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match tokio::time::timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(_)) => DependencyHealth::answered(name, start.elapsed().as_secs_f64() * 1000.0, slow_ms),
        Ok(Err(e)) => DependencyHealth::failed(name, e.to_string()),
        Err(_) => DependencyHealth::failed(name, format!("no answer within {:?}", CHECK_TIMEOUT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(db: HealthStatus, cache: HealthStatus) -> HealthReport {
        let dep = |name: &str, status| DependencyHealth {
            name: name.to_string(),
            status,
            latency_ms: None,
            message: None,
        };
        HealthReport::new(10, vec![dep(DATABASE, db), dep(CACHE, cache)])
    }

    #[test]
    fn test_slow_answer_is_degraded() {
        let fast = DependencyHealth::answered(CACHE, 3.0, 50.0);
        assert_eq!(fast.status, HealthStatus::Healthy);
        assert!(fast.message.is_none());

        let slow = DependencyHealth::answered(CACHE, 80.0, 50.0);
        assert_eq!(slow.status, HealthStatus::Degraded);
        assert_eq!(slow.latency_ms, Some(80.0));
    }

    #[test]
    fn test_report_takes_worst_status() {
        use HealthStatus::*;
        assert_eq!(report(Healthy, Healthy).status, Healthy);
        assert_eq!(report(Healthy, Degraded).status, Degraded);
        assert_eq!(report(Degraded, Unhealthy).status, Unhealthy);
    }

    #[test]
    fn test_readiness_follows_cache_policy() {
        use HealthStatus::*;
        assert!(!report(Healthy, Unhealthy).is_ready(true));
        assert!(report(Healthy, Unhealthy).is_ready(false));
        assert!(report(Healthy, Degraded).is_ready(true));
        assert!(!report(Degraded, Healthy).is_ready(false));
    }

    #[tokio::test]
    async fn test_failed_check_is_unhealthy() {
        let health = timed(DATABASE, 100.0, async { Err::<(), _>("connection refused") }).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.message.as_deref(), Some("connection refused"));
    }
}
