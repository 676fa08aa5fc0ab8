//! Engine and server configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Tuning for one [`Engine`](crate::engine::Engine) instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a send-with-callback waits before its timeout response.
    pub call_timeout_ms: u64,
    /// Period of the pending-call deadline sweep.
    pub call_sweep_interval_ms: u64,
    /// Period of the idle-channel sweep.
    pub liveness_sweep_interval_ms: u64,
    /// Idle time after which a channel is closed (heartbeat enabled only).
    pub idle_timeout_ms: u64,
    /// Outbound queue capacity per channel.
    pub max_send_queue: usize,
    /// Concurrent dispatches allowed per channel before the reader waits.
    pub max_inflight_per_channel: usize,
    /// Grace period for background tasks on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
            call_sweep_interval_ms: 60_000,
            liveness_sweep_interval_ms: 60_000,
            idle_timeout_ms: 60_000,
            max_send_queue: 256,
            max_inflight_per_channel: 64,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn call_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.call_sweep_interval_ms)
    }

    pub fn liveness_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_sweep_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Replace every zero that `validate` would reject with its default.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        for (value, default) in [
            (&mut self.call_timeout_ms, defaults.call_timeout_ms),
            (&mut self.call_sweep_interval_ms, defaults.call_sweep_interval_ms),
            (&mut self.liveness_sweep_interval_ms, defaults.liveness_sweep_interval_ms),
            (&mut self.idle_timeout_ms, defaults.idle_timeout_ms),
        ] {
            if *value == 0 {
                *value = default;
            }
        }
        if self.max_send_queue == 0 {
            self.max_send_queue = defaults.max_send_queue;
        }
        if self.max_inflight_per_channel == 0 {
            self.max_inflight_per_channel = defaults.max_inflight_per_channel;
        }
        self
    }

    /// Reject values that would stall a sweeper or a channel.
    pub fn validate(&self) -> Result<(), EngineError> {
        let checks = [
            ("call_timeout_ms", self.call_timeout_ms == 0),
            ("call_sweep_interval_ms", self.call_sweep_interval_ms == 0),
            ("liveness_sweep_interval_ms", self.liveness_sweep_interval_ms == 0),
            ("idle_timeout_ms", self.idle_timeout_ms == 0),
            ("max_send_queue", self.max_send_queue == 0),
            ("max_inflight_per_channel", self.max_inflight_per_channel == 0),
        ];
        match checks.iter().find(|(_, bad)| *bad) {
            Some((name, _)) => Err(EngineError::Config(format!("{name} must be greater than zero"))),
            None => Ok(()),
        }
    }
}

/// Configuration for the HTTP/WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Route that accepts WebSocket upgrades.
    pub path: String,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            path: "/websocket/http".into(),
            max_message_size: 16 * 1024 * 1024, // 16 MB
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.path.starts_with('/') {
            return Err(EngineError::Config(format!(
                "path must start with '/': {:?}",
                self.path
            )));
        }
        self.engine.validate()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_match_sweep_cadence() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.call_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.call_sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.liveness_sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(60));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_values_rejected() {
        let cfg = EngineConfig {
            max_send_queue: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_send_queue"));

        let cfg = EngineConfig {
            idle_timeout_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sanitized_replaces_only_zeros() {
        let cfg = EngineConfig {
            call_sweep_interval_ms: 0,
            max_send_queue: 0,
            max_inflight_per_channel: 0,
            call_timeout_ms: 250,
            ..Default::default()
        }
        .sanitized();
        let defaults = EngineConfig::default();
        assert_eq!(cfg.call_sweep_interval_ms, defaults.call_sweep_interval_ms);
        assert_eq!(cfg.max_send_queue, defaults.max_send_queue);
        assert_eq!(cfg.max_inflight_per_channel, defaults.max_inflight_per_channel);
        assert_eq!(cfg.call_timeout_ms, 250);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn server_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.path, "/websocket/http");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn path_must_be_absolute() {
        let cfg = ServerConfig {
            path: "ws".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let cfg: ServerConfig =
            serde_json::from_str(r#"{"port":9000,"engine":{"idle_timeout_ms":5000}}"#).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.engine.idle_timeout_ms, 5000);
        assert_eq!(cfg.engine.call_timeout_ms, 60_000);
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "sockrpc-config-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"host":"0.0.0.0","port":0}"#).unwrap();
        let cfg = ServerConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = ServerConfig::from_json_file(Path::new("/nonexistent/sockrpc.json")).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
