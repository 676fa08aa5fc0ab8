//! The engine: wires transports into channels and routes envelopes.
//!
//! Each attached channel gets one reader task and one writer task. The reader
//! classifies frames by type (text = request, binary = response) and hands
//! each one to its own dispatch task, bounded per channel. The writer is the
//! only task that touches the transport's write half, so frames leave in
//! enqueue order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;
use sockrpc_core::envelope::{STATUS_FILTERED, STATUS_MALFORMED};
use sockrpc_core::frame::{CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};
use sockrpc_core::{codec, Frame, MessageId, ProtocolFault, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::channel::{Channel, Outbound};
use crate::config::EngineConfig;
use crate::correlation::{self, CorrelationRegistry};
use crate::error::{EngineError, VERIFY_ERROR};
use crate::filter::{FilterAction, FilterPipelines};
use crate::handler::{CallContext, HandlerRegistry, MethodHandler, ObjectHandler};
use crate::handshake::HandshakeRequest;
use crate::liveness::{self, IDLE_CLOSE_REASON};
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{FrameReceiver, FrameSender, Transport};

/// Decides whether a connection may proceed.
pub type VerifyHook = Arc<dyn Fn(&HandshakeRequest) -> bool + Send + Sync>;
/// Produces a channel's identity; an empty string leaves it anonymous.
pub type NameBuilder = Arc<dyn Fn(&HandshakeRequest, &Channel) -> String + Send + Sync>;

/// Close reason for a channel displaced by a newer one with the same name.
pub const DUPLICATE_CLOSE_REASON: &str = "repetition_conn";

/// Upper bound on delivering the close frame once the writer is done.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) struct EngineInner {
    config: EngineConfig,
    registry: ConnectionRegistry,
    calls: Arc<CorrelationRegistry>,
    handlers: HandlerRegistry,
    filters: FilterPipelines,
    verify: RwLock<Option<VerifyHook>>,
    name_builder: RwLock<Option<NameBuilder>>,
    heartbeat: AtomicBool,
    started: AtomicBool,
    shutdown: ShutdownCoordinator,
}

/// Result of a successful attach.
#[derive(Debug)]
pub struct Connected {
    pub channel: Arc<Channel>,
    /// Whatever the on-ready callback returned.
    pub body: String,
}

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Build an engine, replacing zero intervals and capacities with their
    /// defaults. Use [`Engine::try_new`] to reject them instead.
    pub fn new(config: EngineConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "invalid engine config, falling back to defaults for zero values");
        }
        Self::with_config(config.sanitized())
    }

    pub fn try_new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: ConnectionRegistry::new(),
                calls: Arc::new(CorrelationRegistry::new()),
                handlers: HandlerRegistry::new(),
                filters: FilterPipelines::default(),
                verify: RwLock::new(None),
                name_builder: RwLock::new(None),
                heartbeat: AtomicBool::new(false),
                started: AtomicBool::new(false),
                shutdown: ShutdownCoordinator::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Hooks ────────────────────────────────────────────────────────

    pub fn register_conn_verify(
        &self,
        verify: impl Fn(&HandshakeRequest) -> bool + Send + Sync + 'static,
    ) {
        *self.inner.verify.write() = Some(Arc::new(verify));
    }

    pub fn register_name_builder(
        &self,
        builder: impl Fn(&HandshakeRequest, &Channel) -> String + Send + Sync + 'static,
    ) {
        *self.inner.name_builder.write() = Some(Arc::new(builder));
    }

    pub fn register_fn(
        &self,
        handler: &str,
        method: &str,
        f: impl Fn(&mut CallContext) + Send + Sync + 'static,
    ) {
        self.inner.handlers.register_fn(handler, method, f);
    }

    pub fn register_handler(&self, handler: &str, method: &str, h: impl MethodHandler + 'static) {
        self.inner.handlers.register(handler, method, h);
    }

    pub fn register_object(&self, object: impl ObjectHandler + 'static) {
        self.inner.handlers.register_object(object);
    }

    pub fn add_client_request_filter(
        &self,
        filter: impl Fn(&mut Request, &Channel) -> FilterAction + Send + Sync + 'static,
    ) {
        self.inner.filters.client_request.add(filter);
    }

    pub fn add_client_response_filter(
        &self,
        filter: impl Fn(&mut Response, &Channel) -> FilterAction + Send + Sync + 'static,
    ) {
        self.inner.filters.client_response.add(filter);
    }

    pub fn add_server_request_filter(
        &self,
        filter: impl Fn(&mut Request, &Channel) -> FilterAction + Send + Sync + 'static,
    ) {
        self.inner.filters.server_request.add(filter);
    }

    pub fn add_server_response_filter(
        &self,
        filter: impl Fn(&mut Response, &Channel) -> FilterAction + Send + Sync + 'static,
    ) {
        self.inner.filters.server_response.add(filter);
    }

    /// Install the `Health`/`Index` handler and turn on idle sweeping.
    pub fn enable_heartbeat(&self, show_logs: bool) {
        liveness::install_heartbeat(&self.inner.handlers, show_logs);
        self.inner.heartbeat.store(true, Ordering::Release);
    }

    pub fn heartbeat_enabled(&self) -> bool {
        self.inner.heartbeat.load(Ordering::Acquire)
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Run the verify hook against a handshake.
    pub fn admit(&self, handshake: &HandshakeRequest) -> Result<(), EngineError> {
        let verify = self.inner.verify.read().clone();
        if let Some(verify) = verify {
            if !verify(handshake) {
                let fault = ProtocolFault::HandshakeRejected(VERIFY_ERROR.into());
                counter!("sockrpc_handshakes_rejected_total").increment(1);
                warn!(uri = %handshake.uri, kind = fault.error_kind(), "connection refused by verify hook");
                return Err(EngineError::HandshakeRejected {
                    sentinel: VERIFY_ERROR,
                });
            }
        }
        Ok(())
    }

    /// Turn an already-admitted transport into an active channel.
    pub fn attach<T: Transport>(
        &self,
        transport: T,
        handshake: HandshakeRequest,
        on_ready: impl FnOnce(&Arc<Channel>) -> String,
    ) -> Result<Connected, EngineError> {
        let inner = &self.inner;
        if inner.shutdown.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }

        let (tx, rx) = mpsc::channel(inner.config.max_send_queue);
        let channel = Arc::new(Channel::new(
            handshake,
            tx,
            Arc::downgrade(inner),
            inner.config.max_inflight_per_channel,
            inner.shutdown.token().child_token(),
        ));

        let builder = inner.name_builder.read().clone();
        if let Some(builder) = builder {
            let name = builder(channel.handshake(), &channel);
            if channel.assign_name(name.clone()) {
                if let Some(old) = inner.registry.insert(&name, Arc::clone(&channel)) {
                    info!(
                        name = %name,
                        old_channel = %old.id(),
                        new_channel = %channel.id(),
                        "replacing channel with the same identity"
                    );
                    self.close_channel(&old, CLOSE_NORMAL, DUPLICATE_CLOSE_REASON);
                }
            }
        }

        let (sender, receiver) = transport.split();
        channel.activate();
        let _ = inner
            .shutdown
            .spawn(write_loop(self.clone(), Arc::clone(&channel), rx, sender));
        let _ = inner
            .shutdown
            .spawn(read_loop(self.clone(), Arc::clone(&channel), receiver));

        counter!("sockrpc_channels_opened_total").increment(1);
        info!(
            channel_id = %channel.id(),
            name = channel.name().unwrap_or_default(),
            remote = ?channel.handshake().remote_addr,
            "channel attached"
        );

        let body = on_ready(&channel);
        Ok(Connected { channel, body })
    }

    /// `admit` then `attach`.
    pub fn connect<T: Transport>(
        &self,
        transport: T,
        handshake: HandshakeRequest,
        on_ready: impl FnOnce(&Arc<Channel>) -> String,
    ) -> Result<Connected, EngineError> {
        self.admit(&handshake)?;
        self.attach(transport, handshake, on_ready)
    }

    /// Close `channel` now, dropping anything still queued. Idempotent.
    pub fn close_channel(&self, channel: &Channel, code: u16, reason: &str) {
        if !channel.begin_closing(code, reason) {
            return;
        }
        if let Some(name) = channel.name() {
            let _ = self.inner.registry.remove_if_same(name, channel.id());
        }
        channel.cancel_token().cancel();
        counter!("sockrpc_channels_closed_total").increment(1);
        info!(
            channel_id = %channel.id(),
            name = channel.name().unwrap_or_default(),
            code,
            reason,
            "channel closed"
        );
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.inner.registry.get(name)
    }

    /// Every named channel.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.inner.registry.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.calls.len()
    }

    // ── Outbound calls ───────────────────────────────────────────────

    /// Send `request` on `channel`. `callback` fires exactly once with the
    /// peer's response, a timeout (-1), a send failure (-3) or, if a
    /// server-request filter stopped it, a filtered notice (-5).
    pub fn send(
        &self,
        channel: &Channel,
        mut request: Request,
        callback: impl FnOnce(Response) + Send + 'static,
    ) -> MessageId {
        if request.id.is_empty() {
            request.id = MessageId::new();
        }
        if self.inner.filters.server_request.run(&mut request, channel) == FilterAction::Stop {
            debug!(channel_id = %channel.id(), msg_id = %request.id, "outbound request filtered");
            callback(Response::failure(request.id.clone(), STATUS_FILTERED, "filtered"));
            return request.id;
        }

        let id = request.id.clone();
        let frame = match codec::encode_request(&request) {
            Ok(text) => Frame::Text(text),
            Err(e) => {
                warn!(msg_id = %id, error = %e, "failed to encode outbound request");
                callback(Response::send_failed(id.clone()));
                return id;
            }
        };

        // registered first so a fast response always finds its entry
        self.inner
            .calls
            .register(id.clone(), Box::new(callback), self.inner.config.call_timeout());
        if let Err(e) = channel.enqueue(frame) {
            warn!(channel_id = %channel.id(), msg_id = %id, error = %e, "failed_to_send");
            if let Some(callback) = self.inner.calls.remove(&id) {
                callback(Response::send_failed(id.clone()));
            }
        }
        id
    }

    /// Send and wait for the outcome.
    pub async fn call(&self, channel: &Channel, request: Request) -> Response {
        let (tx, rx) = oneshot::channel();
        let id = self.send(channel, request, move |resp| {
            let _ = tx.send(resp);
        });
        rx.await.unwrap_or_else(|_| Response::send_failed(id))
    }

    /// Send a copy of `template`, each under a fresh id, to every named
    /// channel. Returns how many channels were targeted.
    pub fn broadcast(
        &self,
        template: &Request,
        on_response: impl Fn(Arc<Channel>, Response) + Send + Sync + 'static,
    ) -> usize {
        let on_response = Arc::new(on_response);
        let targets = self.channels();
        for channel in &targets {
            let on_response = Arc::clone(&on_response);
            let target = Arc::clone(channel);
            let _ = self.send(channel, template.reissue(), move |resp| on_response(target, resp));
        }
        targets.len()
    }

    // ── Sweeps & lifecycle ───────────────────────────────────────────

    /// Expire pending calls whose deadline has passed.
    pub fn sweep_calls(&self, now: Instant) -> usize {
        self.inner.calls.sweep(now)
    }

    /// Close channels idle past the threshold. No-op unless heartbeat is
    /// enabled.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        if !self.heartbeat_enabled() {
            return 0;
        }
        let idle = liveness::idle_channels(&self.inner.registry, self.inner.config.idle_timeout(), now);
        for channel in &idle {
            debug!(
                channel_id = %channel.id(),
                idle_ms = channel.idle_for(now).as_millis() as u64,
                "closing idle channel"
            );
            self.close_channel(channel, CLOSE_NORMAL, IDLE_CLOSE_REASON);
        }
        idle.len()
    }

    /// Start the correlation and liveness sweepers. Calling it again is a
    /// no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let config = &self.inner.config;
        let token = self.inner.shutdown.token();

        self.inner.shutdown.register(correlation::start_sweeper(
            Arc::clone(&self.inner.calls),
            config.call_sweep_interval(),
            token.clone(),
        ));

        let engine = self.clone();
        let interval = config.liveness_sweep_interval();
        self.inner.shutdown.register(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let closed = engine.sweep_idle(Instant::now());
                        if closed > 0 {
                            info!(closed, "liveness sweep closed idle channels");
                        }
                    }
                    () = token.cancelled() => break,
                }
            }
        }));
        info!(
            call_sweep_ms = config.call_sweep_interval_ms,
            liveness_sweep_ms = config.liveness_sweep_interval_ms,
            heartbeat = self.heartbeat_enabled(),
            "engine started"
        );
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_shutting_down()
    }

    /// Token cancelled when the engine shuts down.
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.inner.shutdown.token()
    }

    /// Close every channel, stop the sweepers, time out what is still
    /// pending, and wait for tasks up to the configured timeout.
    pub async fn shutdown(&self) -> bool {
        for channel in self.channels() {
            self.close_channel(&channel, CLOSE_GOING_AWAY, "shutdown");
        }
        let clean = self
            .inner
            .shutdown
            .graceful_shutdown(self.inner.config.shutdown_timeout())
            .await;
        let expired = self.inner.calls.expire_all();
        info!(clean, expired, "engine stopped");
        clean
    }

    // ── Inbound paths ────────────────────────────────────────────────

    #[instrument(skip_all, fields(channel_id = %channel.id()))]
    async fn handle_request(&self, channel: &Arc<Channel>, text: &str) {
        let mut request = match codec::decode_request(text) {
            Ok(request) => request,
            Err(e) => {
                let message = format!("malformed request: {e}");
                let fault = ProtocolFault::Decode(e);
                warn!(kind = fault.error_kind(), error = %fault, "malformed request frame");
                let notice = Response::failure(MessageId::empty(), STATUS_MALFORMED, message);
                self.reply(channel, &notice);
                return;
            }
        };

        if self.inner.filters.client_request.run(&mut request, channel) == FilterAction::Stop {
            debug!(msg_id = %request.id, "inbound request filtered");
            return;
        }

        let mut ctx = CallContext::new(Arc::clone(channel), request);
        if !ctx.request.handler.is_empty() && !ctx.request.method.is_empty() {
            let _ = self.inner.handlers.dispatch(&mut ctx).await;
        }

        let mut response = ctx.response;
        if self.inner.filters.client_response.run(&mut response, channel) == FilterAction::Stop {
            debug!(msg_id = %response.id, "outbound response filtered");
            return;
        }
        self.reply(channel, &response);
    }

    fn handle_response(&self, channel: &Channel, bytes: &[u8]) {
        let mut response = match codec::decode_response(bytes) {
            Ok(response) => response,
            Err(e) => {
                let fault = ProtocolFault::Decode(e);
                warn!(channel_id = %channel.id(), kind = fault.error_kind(), error = %fault, "dropping malformed response frame");
                return;
            }
        };
        if self.inner.filters.server_response.run(&mut response, channel) == FilterAction::Stop {
            debug!(channel_id = %channel.id(), msg_id = %response.id, "inbound response filtered");
            return;
        }
        let _ = self.inner.calls.resolve(response);
    }

    fn reply(&self, channel: &Channel, response: &Response) {
        let frame = match codec::encode_response(response) {
            Ok(bytes) => Frame::Binary(bytes),
            Err(e) => {
                warn!(channel_id = %channel.id(), msg_id = %response.id, error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = channel.enqueue(frame) {
            warn!(channel_id = %channel.id(), msg_id = %response.id, error = %e, "failed to queue response");
        }
    }
}

async fn read_loop<R: FrameReceiver>(engine: Engine, channel: Arc<Channel>, mut receiver: R) {
    let cancel = channel.cancel_token();
    let inflight = channel.inflight();
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = receiver.recv() => next,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(channel_id = %channel.id(), error = %e, "read failed");
                engine.close_channel(&channel, CLOSE_NORMAL, "error");
                break;
            }
            None => {
                engine.close_channel(&channel, CLOSE_NORMAL, "error");
                break;
            }
        };
        counter!("sockrpc_frames_received_total", "kind" => frame.kind()).increment(1);

        if let Frame::Close { code, reason } = frame {
            debug!(channel_id = %channel.id(), code, reason = %reason, "peer closed");
            engine.close_channel(&channel, code, &reason);
            break;
        }

        let permit = tokio::select! {
            () = cancel.cancelled() => break,
            permit = Arc::clone(&inflight).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let task_engine = engine.clone();
        let task_channel = Arc::clone(&channel);
        let _ = engine.inner.shutdown.spawn(async move {
            let _permit = permit;
            match frame {
                Frame::Text(text) => task_engine.handle_request(&task_channel, &text).await,
                Frame::Binary(bytes) => task_engine.handle_response(&task_channel, &bytes),
                Frame::Close { .. } => {}
            }
        });
    }
    debug!(channel_id = %channel.id(), "reader stopped");
}

async fn write_loop<S: FrameSender>(
    engine: Engine,
    channel: Arc<Channel>,
    mut rx: mpsc::Receiver<Outbound>,
    mut sender: S,
) {
    let cancel = channel.cancel_token();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => next,
        };
        match next {
            Some(Outbound::Frame(frame)) => {
                // a peer that stops reading must not pin the writer past close
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = sender.send(frame) => sent,
                };
                if let Err(e) = sent {
                    let fault = ProtocolFault::SendFailure(e.to_string());
                    warn!(channel_id = %channel.id(), kind = fault.error_kind(), error = %e, "write failed");
                    engine.close_channel(&channel, CLOSE_INTERNAL_ERROR, "send_failed");
                    break;
                }
            }
            Some(Outbound::Close { code, reason }) => {
                engine.close_channel(&channel, code, &reason);
                break;
            }
            None => break,
        }
    }

    if engine.is_shutting_down() {
        engine.close_channel(&channel, CLOSE_GOING_AWAY, "shutdown");
    } else {
        engine.close_channel(&channel, CLOSE_NORMAL, "close_action");
    }
    let (code, reason) = channel
        .close_reason()
        .unwrap_or((CLOSE_NORMAL, String::new()));
    match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sender.close(code, &reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(channel_id = %channel.id(), error = %e, "close frame not delivered"),
        Err(_) => debug!(channel_id = %channel.id(), "close frame timed out"),
    }
    channel.mark_closed();
    debug!(channel_id = %channel.id(), "writer stopped");
}
