use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::connection::{Connection, FrameSink};
use super::dispatch::{Dispatcher, RoutedEnvelope};
use super::registry::ConnectionRegistry;
use super::router::{ChannelContext, ChannelRouter};
use crate::config::DispatchConfig;

pub(crate) struct HubInner {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) router: ChannelRouter,
    pub(crate) handoff: mpsc::Sender<RoutedEnvelope>,
}

/// Shared handle to the connection registry, the channel router and the
/// handoff queue feeding the [`Dispatcher`]. Cloning is cheap; every clone
/// refers to the same state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Builds a hub and the dispatcher that drains its handoff queue. The
    /// dispatcher must be spawned for routed handlers to run; it exits once
    /// every `Hub` clone is gone.
    pub fn new(config: &DispatchConfig) -> (Self, Dispatcher) {
        let (handoff, rx) = mpsc::channel(config.handoff_capacity.max(1));
        let inner = Arc::new(HubInner {
            registry: ConnectionRegistry::new(),
            router: ChannelRouter::new(),
            handoff,
        });
        let dispatcher = Dispatcher::new(rx, Arc::downgrade(&inner), config.max_in_flight_handlers.max(1));
        (Self { inner }, dispatcher)
    }

    pub(crate) fn from_inner(inner: Arc<HubInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn handoff(&self) -> &mpsc::Sender<RoutedEnvelope> {
        &self.inner.handoff
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.inner.router
    }

    pub async fn on<F, Fut>(&self, channel: impl Into<String>, handler: F)
    where
        F: Fn(ChannelContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.router.on(channel, handler).await;
    }

    pub async fn connect(&self, sink: Box<dyn FrameSink>) -> Arc<Connection> {
        self.inner.registry.register(sink).await
    }

    /// Deregisters `id` and closes its transport. Safe to call twice.
    pub async fn disconnect(&self, id: &str) {
        if let Some(connection) = self.inner.registry.deregister(id).await {
            connection.close().await;
            info!(
                "Connection {} disconnected after {}s",
                id,
                (chrono::Utc::now() - connection.connected_at()).num_seconds()
            );
        }
    }

    pub async fn join_group(&self, connection: &Connection, group: &str) {
        connection.join(group).await;
    }

    pub async fn leave_group(&self, connection: &Connection, group: &str) {
        connection.leave(group).await;
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let (hub, _dispatcher) = Hub::new(&DispatchConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel::<Message>();

        let conn = hub.connect(Box::new(tx)).await;
        assert_eq!(hub.connection_count().await, 1);
        assert!(hub.registry().lookup(conn.id()).await.is_some());

        hub.disconnect(conn.id()).await;
        hub.disconnect(conn.id()).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_group_wrappers() {
        let (hub, _dispatcher) = Hub::new(&DispatchConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel::<Message>();
        let conn = hub.connect(Box::new(tx)).await;

        hub.join_group(&conn, "room1").await;
        hub.join_group(&conn, "room1").await;
        assert_eq!(conn.groups().await, vec!["room1".to_string()]);

        hub.leave_group(&conn, "room1").await;
        assert!(!conn.is_member("room1").await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (hub, _dispatcher) = Hub::new(&DispatchConfig::default());
        let other = hub.clone();
        let (tx, _rx) = mpsc::unbounded_channel::<Message>();

        let conn = hub.connect(Box::new(tx)).await;
        assert!(other.registry().contains(conn.id()).await);

        other.on("chat", |_ctx| async {}).await;
        assert!(hub.router().resolve("chat").await.is_some());
    }
}
