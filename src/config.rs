use serde::Deserialize;

/// One year. Longer horizons overflow `chrono::Duration`.
pub const MAX_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub application: ApplicationSettings,
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

/// What the Coordinator does when the fast cache cannot be reached during lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFailurePolicy {
    /// Fail the request with a store-unavailable error.
    FailClosed,
    /// Skip the cache and consult the durable store only.
    FailOpen,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    pub enabled: bool,
    pub key_header: String,
    pub key_prefix: String,
    /// Expiry horizon shared by the durable record and the cache entry.
    pub ttl_hours: i64,
    #[serde(default = "default_true")]
    pub require_uuid_keys: bool,
    #[serde(default = "default_cache_failure_policy")]
    pub cache_failure_policy: CacheFailurePolicy,
    #[serde(default = "default_true")]
    pub lock_enabled: bool,
    #[serde(default = "default_lock_lease")]
    pub lock_lease_secs: u64,
    /// How long a duplicate waits on a held lock before reporting the key in flight.
    #[serde(default = "default_lock_wait")]
    pub lock_wait_ms: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key_header: "Idempotency-Key".to_string(),
            key_prefix: "idempotency:".to_string(),
            ttl_hours: 24,
            require_uuid_keys: true,
            cache_failure_policy: CacheFailurePolicy::FailClosed,
            lock_enabled: true,
            lock_lease_secs: default_lock_lease(),
            lock_wait_ms: default_lock_wait(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl IdempotencySettings {
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.key_header.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "idempotency.key_header must not be empty".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(config::ConfigError::Message(
                "idempotency.key_prefix must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_TTL_HOURS).contains(&self.ttl_hours) {
            return Err(config::ConfigError::Message(format!(
                "idempotency.ttl_hours must be between 1 and {}",
                MAX_TTL_HOURS
            )));
        }
        if self.lock_enabled && self.lock_lease_secs == 0 {
            return Err(config::ConfigError::Message(
                "idempotency.lock_lease_secs must be positive when locking is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_body_limit() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_cache_failure_policy() -> CacheFailurePolicy {
    CacheFailurePolicy::FailClosed
}

fn default_lock_lease() -> u64 {
    30
}

fn default_lock_wait() -> u64 {
    default_lock_lease() * 1000
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.idempotency.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_idempotency_settings_are_valid() {
        let settings = IdempotencySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cache_failure_policy, CacheFailurePolicy::FailClosed);
    }

    #[test]
    fn test_rejects_non_positive_ttl() {
        let settings = IdempotencySettings {
            ttl_hours: 0,
            ..IdempotencySettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_ttl_beyond_one_year() {
        let settings = IdempotencySettings {
            ttl_hours: i64::MAX,
            ..IdempotencySettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = IdempotencySettings {
            ttl_hours: MAX_TTL_HOURS,
            ..IdempotencySettings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_blank_header() {
        let settings = IdempotencySettings {
            key_header: "  ".to_string(),
            ..IdempotencySettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cache_failure_policy_from_toml() {
        let raw = r#"
            enabled = true
            key_header = "Idempotency-Key"
            key_prefix = "idem:"
            ttl_hours = 12
            cache_failure_policy = "fail_open"
        "#;
        let settings: IdempotencySettings = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.cache_failure_policy, CacheFailurePolicy::FailOpen);
        assert_eq!(settings.ttl_hours, 12);
        assert!(settings.lock_enabled);
        assert_eq!(settings.lock_wait_ms, 30_000);
        assert!(settings.require_uuid_keys);
    }
}
