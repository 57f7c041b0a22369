use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Named recording points. Calls are no-ops until a recorder is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    /// `outcome` is one of `proceed`, `replay`, `conflict`.
    pub fn record_idempotency_lookup(&self, outcome: &str) {
        counter!("idempotency_lookups_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_idempotency_record_created(&self) {
        counter!("idempotency_records_created_total").increment(1);
    }

    pub fn record_idempotency_reconciled(&self, outcome: &str) {
        counter!("idempotency_reconciliations_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_idempotency_divergence(&self) {
        counter!("idempotency_divergences_total").increment(1);
    }

    pub fn record_idempotency_cache_error(&self, stage: &str) {
        counter!("idempotency_cache_errors_total", "stage" => stage.to_string()).increment(1);
    }

    pub fn record_idempotency_lock_contention(&self) {
        counter!("idempotency_lock_contention_total").increment(1);
    }

    pub fn record_idempotency_purged(&self, count: u64) {
        counter!("idempotency_records_purged_total").increment(count);
    }

    pub fn record_idempotency_execute_latency(&self, duration_ms: f64) {
        histogram!("idempotency_execute_duration_ms").record(duration_ms);
    }

    pub fn record_transaction_created(&self, transaction_type: &str) {
        counter!("payments_transactions_created_total", "type" => transaction_type.to_string()).increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }

    pub fn record_redis_operation(&self, operation: &str, duration_ms: f64, success: bool) {
        counter!("redis_operations_total", "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("redis_operation_duration_ms", "operation" => operation.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("idempotency_lookups_total", Unit::Count, "Idempotency lookups by outcome");
    describe_counter!("idempotency_records_created_total", Unit::Count, "Idempotency records committed");
    describe_counter!("idempotency_reconciliations_total", Unit::Count, "Lost claim races resolved against the winning record");
    describe_counter!("idempotency_divergences_total", Unit::Count, "Keys found in the durable store after a cache miss during the record phase");
    describe_counter!("idempotency_cache_errors_total", Unit::Count, "Fast cache failures by stage");
    describe_counter!("idempotency_lock_contention_total", Unit::Count, "Requests rejected because the key was in flight");
    describe_counter!("idempotency_records_purged_total", Unit::Count, "Expired idempotency records removed");
    describe_histogram!("idempotency_execute_duration_ms", Unit::Milliseconds, "Record phase latency in milliseconds");

    describe_counter!("payments_transactions_created_total", Unit::Count, "Transactions created");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");

    describe_counter!("redis_operations_total", Unit::Count, "Total Redis operations");
    describe_histogram!("redis_operation_duration_ms", Unit::Milliseconds, "Redis operation latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
