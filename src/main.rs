use idempotent_payments::api::{create_router, AppState};
use idempotent_payments::config::{CacheFailurePolicy, Settings};
use idempotent_payments::idempotency::{
    CoordinatorConfig, IdempotencyCleanupJob, IdempotencyCoordinator, Interceptor, KeyValidator,
    PostgresIdempotencyStore, RedisIdempotencyCache,
};
use idempotent_payments::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    init_logging(&LogConfig::from(&settings.application))?;
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;

    // Connect to PostgreSQL
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    // Connect to Redis
    info!("Connecting to Redis...");
    let redis_client = redis::Client::open(settings.redis.url.as_str())?;
    let mut con = redis_client.get_multiplexed_async_connection().await?;
    let _: () = redis::cmd("PING").query_async(&mut con).await?;
    info!("Redis connection established");

    let idempotency = &settings.idempotency;
    let cache = Arc::new(RedisIdempotencyCache::new(
        redis_client.clone(),
        idempotency.key_prefix.clone(),
    ));
    let coordinator = Arc::new(IdempotencyCoordinator::new(
        PostgresIdempotencyStore::new(pool.clone()),
        cache,
        CoordinatorConfig::from(idempotency),
    ));

    let _cleanup = IdempotencyCleanupJob::new(Arc::clone(&coordinator), idempotency.cleanup_interval_secs).start();

    let interceptor = Interceptor::new(
        KeyValidator::new(idempotency)?,
        Arc::clone(&coordinator),
        settings.application.body_limit_bytes,
    );
    let health_checker = Arc::new(HealthChecker::new(
        pool.clone(),
        redis_client,
        idempotency.cache_failure_policy == CacheFailurePolicy::FailClosed,
    ));

    let state = AppState::new(pool, interceptor, health_checker, idempotency.require_uuid_keys)
        .with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        address = %addr,
        idempotency_enabled = idempotency.enabled,
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
