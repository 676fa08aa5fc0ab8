use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sockrpc_core::Request;
use sockrpc_server::server::OnReady;
use sockrpc_server::{listen, Channel, Engine, ServerConfig};
use sockrpc_telemetry::{init_telemetry, TelemetryConfig};

/// Demo chat server: whatever a client sends to `Chat.Room` is re-sent to
/// every connected client.
#[derive(Parser, Debug)]
#[command(name = "sockrpc", about = "Bidirectional WebSocket RPC demo server")]
struct Cli {
    /// Host to bind (overrides the config file).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// WebSocket route (overrides the config file).
    #[arg(long)]
    path: Option<String>,

    /// JSON server config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default log level; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// One JSON object per log line.
    #[arg(long)]
    json_logs: bool,

    /// Disable the `Health.Index` handler and idle sweeping.
    #[arg(long)]
    no_heartbeat: bool,
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn build_engine(config: &ServerConfig, heartbeat: bool) -> Engine {
    let engine = Engine::new(config.engine.clone());

    // `?name=` picks the identity; without one the channel id stands in so
    // every client still receives broadcasts
    engine.register_name_builder(|hs, channel| {
        hs.query_param("name")
            .filter(|name| !name.is_empty())
            .map_or_else(|| channel.id().to_string(), str::to_owned)
    });

    engine.register_fn("Chat", "Room", |ctx| {
        let Some(engine) = ctx.engine() else {
            return;
        };
        let from = ctx.channel.name().unwrap_or_default().to_owned();
        let template = Request::new("Chat", "Room")
            .with_body(ctx.request.body.clone())
            .with_scheme(ctx.request.transfer_scheme.clone())
            .with_header("from", from);
        let targets = engine.broadcast(&template, |channel, resp| {
            if !resp.is_success() {
                tracing::debug!(
                    channel_id = %channel.id(),
                    status = resp.status_code,
                    message = %resp.message,
                    "broadcast not acknowledged"
                );
            }
        });
        ctx.response.message = "success".into();
        ctx.response.body = targets.to_string();
    });

    if heartbeat {
        engine.enable_heartbeat(false);
    }
    engine
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level.clone(),
        json: cli.json_logs,
        ..Default::default()
    })?;

    let config = cli.server_config()?;
    let engine = build_engine(&config, !cli.no_heartbeat);
    let on_ready: OnReady =
        Arc::new(|channel: &Arc<Channel>| channel.name().unwrap_or_default().to_owned());

    let handle = listen(engine.clone(), &config, on_ready)
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.local_addr(), path = %config.path, "sockrpc ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    let _ = engine.shutdown().await;
    handle.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
