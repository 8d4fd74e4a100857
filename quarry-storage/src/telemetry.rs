//! Logging setup
//!
//! Quarry only emits `tracing` events; binaries that host it install a
//! subscriber once at startup with [`init_tracing`].

use quarry_core::{ConfigError, QuarryError, QuarryResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `QUARRY_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "quarry_storage=info,warn";

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives
    pub filter: String,
    /// Emit one JSON object per event instead of plain text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: std::env::var("QUARRY_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            json: std::env::var("QUARRY_LOG_FORMAT")
                .map(|s| s.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}

/// Install the global subscriber.
pub fn init_tracing(config: &TelemetryConfig) -> QuarryResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "QUARRY_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| QuarryError::invariant(format!("Failed to init subscriber: {}", e)))?;

    tracing::debug!(filter = %config.filter, json = config.json, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = TelemetryConfig {
            filter: "quarry_storage=loud".to_string(),
            json: false,
        };
        let err = init_tracing(&config).unwrap_err();
        assert_eq!(err.kind(), quarry_core::ErrorKind::Config);
    }
}
