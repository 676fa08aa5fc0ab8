//! Axum hosting: WebSocket upgrade route, health endpoint, listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::{EngineError, UPGRADE_ERROR, VERIFY_ERROR};
use crate::handshake::HandshakeRequest;
use crate::transport::axum_ws::AxumTransport;

/// Called once a channel is active; its return value is logged as the
/// handshake body.
pub type OnReady = Arc<dyn Fn(&Arc<Channel>) -> String + Send + Sync>;

#[derive(Clone)]
struct AppState {
    engine: Engine,
    on_ready: OnReady,
    max_message_size: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub pending_calls: usize,
}

/// Router with the WebSocket route at `config.path` and `GET /health`.
pub fn router(engine: Engine, config: &ServerConfig, on_ready: OnReady) -> Router {
    let state = AppState {
        engine,
        on_ready,
        max_message_size: config.max_message_size,
    };
    Router::new()
        .route(&config.path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Handle returned by [`listen`].
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the server task to finish (after engine shutdown).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "server task ended abnormally");
        }
    }
}

/// Validate `config`, start the engine's sweepers, bind, and serve until
/// the engine shuts down.
pub async fn listen(
    engine: Engine,
    config: &ServerConfig,
    on_ready: OnReady,
) -> Result<ServerHandle, EngineError> {
    config.validate()?;
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    engine.start();
    let token = engine.shutdown_token();
    let app = router(engine, config, on_ready);

    let task = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await });
        if let Err(e) = serve.await {
            error!(error = %e, "server error");
        }
    });

    info!(%addr, path = %config.path, "sockrpc server listening");
    Ok(ServerHandle { addr, task })
}

async fn ws_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    extensions: Extensions,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let remote = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let handshake = HandshakeRequest::from_http(&uri, &headers, remote);

    // verify runs before the upgrade so a refusal is a plain HTTP answer
    if state.engine.admit(&handshake).is_err() {
        return (StatusCode::FORBIDDEN, VERIFY_ERROR).into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(uri = %uri, error = %rejection, "websocket upgrade failed");
            return (StatusCode::BAD_REQUEST, UPGRADE_ERROR).into_response();
        }
    };

    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let on_ready = Arc::clone(&state.on_ready);
            match state
                .engine
                .attach(AxumTransport::new(socket), handshake, |ch| on_ready(ch))
            {
                Ok(connected) => {
                    debug!(channel_id = %connected.channel.id(), body = %connected.body, "on_ready");
                }
                Err(e) => warn!(error = %e, "failed to attach channel"),
            }
        })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.engine.is_shutting_down() {
            "shutting_down"
        } else {
            "ok"
        },
        connections: state.engine.connection_count(),
        pending_calls: state.engine.pending_calls(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_router(engine: Engine) -> Router {
        router(
            engine,
            &ServerConfig::default(),
            Arc::new(|_: &Arc<Channel>| String::new()),
        )
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let app = make_router(Engine::new(EngineConfig::default()));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["pending_calls"], 0);
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_upgrade_error() {
        let app = make_router(Engine::new(EngineConfig::default()));
        let req = Request::builder()
            .uri("/websocket/http")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 1_000).await.unwrap();
        assert_eq!(&body[..], UPGRADE_ERROR.as_bytes());
    }

    #[tokio::test]
    async fn verify_runs_before_upgrade() {
        let engine = Engine::new(EngineConfig::default());
        engine.register_conn_verify(|_| false);
        let app = make_router(engine);
        let req = Request::builder()
            .uri("/websocket/http")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(resp.into_body(), 1_000).await.unwrap();
        assert_eq!(&body[..], VERIFY_ERROR.as_bytes());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_router(Engine::new(EngineConfig::default()));
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_rejects_invalid_config() {
        let config = ServerConfig {
            path: "no-slash".into(),
            ..Default::default()
        };
        let result = listen(
            Engine::new(EngineConfig::default()),
            &config,
            Arc::new(|_: &Arc<Channel>| String::new()),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
