pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{DependencyHealth, HealthChecker, HealthReport, HealthStatus};
pub use logging::{init_logging, mask_amount, mask_key, mask_sensitive, LogConfig, LogFormat};
pub use metrics::{get_metrics, init_metrics, LatencyTimer, Metrics, METRICS};
