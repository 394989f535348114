//! Tracing subscriber initialization.
//!
//! `RUST_LOG` wins over the configured level when set. Audit events are
//! emitted on the `adsgate::audit` target and can be routed with a filter
//! directive such as `adsgate::audit=info`.

use adsgate_core::{AdsResult, ClassifiedError, LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` if present, else the configured directive.
pub fn env_filter(config: &LoggingConfig) -> AdsResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ClassifiedError::validation(format!("invalid log level '{}': {}", config.level, e))
                .with_field_path("logging.level")
        }),
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &LoggingConfig) -> AdsResult<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed
        .map_err(|e| ClassifiedError::fatal(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(level = %config.level, format = ?config.format, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directive_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "adsgate=[[".to_string(),
            ..Default::default()
        };
        assert!(env_filter(&config).is_err());
        assert!(env_filter(&LoggingConfig::default()).is_ok());
    }
}
