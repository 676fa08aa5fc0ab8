//! Logging setup for sockrpc processes.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: String,
    /// Per-module level overrides (e.g. "sockrpc_server::engine" => "debug").
    pub module_levels: Vec<(String, String)>,
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
    /// Include the event target (module path) in each line.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            module_levels: Vec::new(),
            json: false,
            with_target: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level {0:?}")]
    InvalidLevel(String),
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

impl TelemetryConfig {
    /// Build the filter directive string, e.g. `info,sockrpc_server=debug`.
    pub fn filter_directives(&self) -> Result<String, TelemetryError> {
        let mut filter_str = parse_level(&self.log_level)?.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            let level = parse_level(level)?;
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        Ok(filter_str)
    }
}

fn parse_level(level: &str) -> Result<Level, TelemetryError> {
    level
        .parse::<Level>()
        .map_err(|_| TelemetryError::InvalidLevel(level.to_owned()))
}

/// Initialize the global subscriber. Call once at startup.
///
/// A second call returns `TelemetryError::Init` and leaves the first
/// subscriber in place.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter_str = config.filter_directives()?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_info() {
        let cfg = TelemetryConfig::default();
        assert_eq!(cfg.filter_directives().unwrap(), "info");
    }

    #[test]
    fn module_overrides_are_appended() {
        let cfg = TelemetryConfig {
            log_level: "WARN".into(),
            module_levels: vec![
                ("sockrpc_server".into(), "debug".into()),
                ("tower_http".into(), "error".into()),
            ],
            ..Default::default()
        };
        assert_eq!(
            cfg.filter_directives().unwrap(),
            "warn,sockrpc_server=debug,tower_http=error"
        );
    }

    #[test]
    fn invalid_level_is_rejected() {
        let cfg = TelemetryConfig {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            cfg.filter_directives(),
            Err(TelemetryError::InvalidLevel(l)) if l == "loud"
        ));
    }

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        let cfg = TelemetryConfig::default();
        let first = init_telemetry(&cfg);
        let second = init_telemetry(&cfg);
        // Another test may have installed a subscriber first; either way the
        // second call must fail cleanly.
        let _ = first;
        assert!(matches!(second, Err(TelemetryError::Init(_))));
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: TelemetryConfig = serde_json::from_str(r#"{"json":true}"#).unwrap();
        assert!(cfg.json);
        assert_eq!(cfg.log_level, "info");
    }
}
