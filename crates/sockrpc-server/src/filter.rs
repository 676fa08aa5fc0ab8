//! Ordered filter chains gating the four envelope paths.

use std::sync::Arc;

use parking_lot::RwLock;
use sockrpc_core::{Request, Response};

use crate::channel::Channel;

/// What a filter wants done with the envelope it saw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterAction {
    Continue,
    /// Abort all further processing of this envelope.
    Stop,
}

pub type Filter<T> = Arc<dyn Fn(&mut T, &Channel) -> FilterAction + Send + Sync>;

/// Filters run in registration order; the first `Stop` wins.
pub struct FilterChain<T> {
    filters: RwLock<Vec<Filter<T>>>,
}

impl<T> Default for FilterChain<T> {
    fn default() -> Self {
        Self {
            filters: RwLock::new(Vec::new()),
        }
    }
}

impl<T> FilterChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, filter: impl Fn(&mut T, &Channel) -> FilterAction + Send + Sync + 'static) {
        self.filters.write().push(Arc::new(filter));
    }

    pub fn run(&self, envelope: &mut T, channel: &Channel) -> FilterAction {
        // snapshot so a filter may register another filter without deadlocking
        let filters = self.filters.read().clone();
        for filter in &filters {
            if filter(envelope, channel) == FilterAction::Stop {
                return FilterAction::Stop;
            }
        }
        FilterAction::Continue
    }

    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }
}

/// The four gating points.
#[derive(Default)]
pub struct FilterPipelines {
    /// Inbound request, before dispatch.
    pub client_request: FilterChain<Request>,
    /// Response produced by dispatch, before it is sent back.
    pub client_response: FilterChain<Response>,
    /// Outbound request, before it is sent.
    pub server_request: FilterChain<Request>,
    /// Inbound response, before correlation.
    pub server_response: FilterChain<Response>,
}
