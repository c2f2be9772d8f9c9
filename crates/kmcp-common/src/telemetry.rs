//! Tracing initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a text or
//! JSON formatting layer. `RUST_LOG` takes precedence over the configured
//! level.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter directive is invalid
    #[error("invalid log filter '{directive}': {message}")]
    Filter {
        /// Directive that failed to parse
        directive: String,
        /// Parser message
        message: String,
    },

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub default_directive: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: "info,kube=info,tower=warn,hyper=warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Build the env filter, preferring `RUST_LOG`
fn build_filter(default_directive: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| TelemetryError::Filter {
            directive: default_directive.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Initialize the global tracing subscriber
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(&config.default_directive)?;

    let (json_layer, text_layer) = match config.format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            ),
            None,
        ),
        LogFormat::Text => (None, Some(fmt::layer().with_target(true))),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert!(config.default_directive.starts_with("info"));
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_build_filter_accepts_plain_level() {
        assert!(build_filter("debug").is_ok());
    }
}
