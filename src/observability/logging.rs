use crate::config::ApplicationSettings;
use rust_decimal::Decimal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Subscriber settings derived from `[application]`.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Emit source file and line with every event.
    pub with_source: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_source: false,
        }
    }
}

impl From<&ApplicationSettings> for LogConfig {
    fn from(settings: &ApplicationSettings) -> Self {
        Self {
            level: settings.log_level.clone(),
            format: settings.log_format.as_str().into(),
            with_source: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else if s.eq_ignore_ascii_case("compact") {
            LogFormat::Compact
        } else {
            LogFormat::Pretty
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer(config: &LogConfig) -> BoxedLayer {
    let base = fmt::layer()
        .with_file(config.with_source)
        .with_line_number(config.with_source);

    match config.format {
        LogFormat::Json => base.json().flatten_event(true).boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(format_layer(config))
        .with(filter)
        .try_init()?;

    tracing::info!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}

/// Replaces everything except `keep` characters at each end with `*`.
pub fn mask_sensitive(value: &str, keep: usize) -> String {
    let len = value.chars().count();
    if len <= keep * 2 {
        return "*".repeat(len);
    }

    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < keep || i >= len - keep { c } else { '*' })
        .collect()
}

/// Idempotency keys act as client secrets; logs only carry their ends.
pub fn mask_key(key: &str) -> String {
    mask_sensitive(key, 4)
}

/// Order of magnitude only.
pub fn mask_amount(amount: &Decimal) -> String {
    let abs = amount.abs();
    let bucket = if abs >= Decimal::from(1_000_000) {
        "M+"
    } else if abs >= Decimal::from(1_000) {
        "K+"
    } else {
        ""
    };
    format!("***{}", bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_short_values_are_fully_masked() {
        assert_eq!(mask_sensitive("abc", 2), "***");
        assert_eq!(mask_sensitive("", 4), "");
    }

    #[test]
    fn test_long_values_keep_both_ends() {
        assert_eq!(mask_sensitive("1234567890", 2), "12******90");
    }

    #[test]
    fn test_mask_key_hides_middle_groups() {
        let masked = mask_key("550e8400-e29b-41d4-a716-446655440000");
        assert!(masked.starts_with("550e"));
        assert!(masked.ends_with("0000"));
        assert_eq!(masked.len(), 36);
        assert!(!masked.contains("e29b"));
    }

    #[test]
    fn test_mask_amount_buckets() {
        assert_eq!(mask_amount(&dec!(500)), "***");
        assert_eq!(mask_amount(&dec!(150000.00)), "***K+");
        assert_eq!(mask_amount(&dec!(-5000000)), "***M+");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::from("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::from("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn test_config_from_application_settings() {
        let settings = ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "debug".to_string(),
            log_format: "json".to_string(),
            body_limit_bytes: 1024,
        };
        let config = LogConfig::from(&settings);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "debug");
    }
}
