use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::{Connection, FrameKind};
use super::hub::Hub;

/// Everything a handler gets for one routed envelope.
#[derive(Clone)]
pub struct ChannelContext {
    pub hub: Hub,
    pub connection: Arc<Connection>,
    pub frame_kind: FrameKind,
    /// Caller correlation token, passed through untouched.
    pub request_id: String,
    pub message: Map<String, Value>,
}

pub type Handler = Arc<dyn Fn(ChannelContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Channel name to handler table. Matching is exact and case-sensitive.
#[derive(Default)]
pub struct ChannelRouter {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `channel`. A later registration for the same
    /// name replaces the earlier one.
    pub async fn on<F, Fut>(&self, channel: impl Into<String>, handler: F)
    where
        F: Fn(ChannelContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let channel = channel.into();
        let handler: Handler = Arc::new(move |ctx| handler(ctx).boxed());
        if self.handlers.write().await.insert(channel.clone(), handler).is_some() {
            warn!("Handler for channel {} replaced", channel);
        } else {
            debug!("Registered handler for channel {}", channel);
        }
    }

    pub async fn resolve(&self, channel: &str) -> Option<Handler> {
        self.handlers.read().await.get(channel).cloned()
    }

    pub async fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
