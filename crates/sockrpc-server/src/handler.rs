//! Handler registry and dispatch.
//!
//! Function handlers are keyed by `handler@method` and always win. Object
//! handlers are keyed by their declared name and resolve the method
//! themselves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use serde_json::Value;
use sockrpc_core::envelope::handler_key;
use sockrpc_core::{ProtocolFault, Request, Response};
use tracing::warn;

use crate::channel::Channel;
use crate::engine::Engine;

/// State owned by a single dispatch.
pub struct CallContext {
    pub channel: Arc<Channel>,
    pub request: Request,
    /// Response under construction; sent back once dispatch returns.
    pub response: Response,
    /// Scratch space shared between filters' callers and handlers.
    pub extra: HashMap<String, Value>,
}

impl CallContext {
    pub fn new(channel: Arc<Channel>, request: Request) -> Self {
        let response = Response::for_request(request.id.clone());
        Self {
            channel,
            request,
            response,
            extra: HashMap::new(),
        }
    }

    /// Engine owning the channel, for handlers that call back out.
    pub fn engine(&self) -> Option<Engine> {
        self.channel.engine()
    }
}

/// A single `(handler, method)` implementation.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, ctx: &mut CallContext);
}

/// A handler object serving many methods under one name.
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    /// Name requests address this object by.
    fn name(&self) -> &str;

    /// Run `method`. Returns `false` if the object has no such method.
    async fn dispatch(&self, method: &str, ctx: &mut CallContext) -> bool;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(&mut CallContext) + Send + Sync,
{
    async fn handle(&self, ctx: &mut CallContext) {
        (self.0)(ctx);
    }
}

/// Which table served a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Function,
    Object,
    Miss,
}

#[derive(Default)]
pub struct HandlerRegistry {
    functions: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
    objects: RwLock<HashMap<String, Arc<dyn ObjectHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: &str, method: &str, h: impl MethodHandler + 'static) {
        let _ = self
            .functions
            .write()
            .insert(handler_key(handler, method), Arc::new(h));
    }

    /// Register a synchronous closure.
    pub fn register_fn(
        &self,
        handler: &str,
        method: &str,
        f: impl Fn(&mut CallContext) + Send + Sync + 'static,
    ) {
        self.register(handler, method, FnHandler(f));
    }

    pub fn register_object(&self, object: impl ObjectHandler + 'static) {
        let name = object.name().to_owned();
        let _ = self.objects.write().insert(name, Arc::new(object));
    }

    pub fn has_function(&self, handler: &str, method: &str) -> bool {
        self.functions
            .read()
            .contains_key(&handler_key(handler, method))
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.objects.read().contains_key(name)
    }

    /// Registered function keys (sorted).
    pub fn function_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.functions.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Route `ctx.request` to its handler. On a miss the response is left
    /// untouched.
    pub async fn dispatch(&self, ctx: &mut CallContext) -> DispatchOutcome {
        let function = self.functions.read().get(&ctx.request.handler_key()).cloned();
        if let Some(function) = function {
            function.handle(ctx).await;
            return DispatchOutcome::Function;
        }

        let object = self.objects.read().get(&ctx.request.handler).cloned();
        if let Some(object) = object {
            let method = ctx.request.method.clone();
            if object.dispatch(&method, ctx).await {
                return DispatchOutcome::Object;
            }
        }

        let fault = ProtocolFault::DispatchMiss {
            handler: ctx.request.handler.clone(),
            method: ctx.request.method.clone(),
        };
        counter!("sockrpc_dispatch_miss_total").increment(1);
        warn!(
            channel_id = %ctx.channel.id(),
            msg_id = %ctx.request.id,
            kind = fault.error_kind(),
            "{fault}"
        );
        DispatchOutcome::Miss
    }
}
