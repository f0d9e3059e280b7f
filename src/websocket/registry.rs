use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::connection::{Connection, FrameSink};

/// Live connections keyed by identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `sink` in a new connection with a fresh v4 identity and stores it.
    pub async fn register(&self, sink: Box<dyn FrameSink>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(Uuid::new_v4().to_string(), sink));
        self.connections
            .write()
            .await
            .insert(connection.id().to_string(), connection.clone());
        info!("Added connection {} to registry", connection.id());
        connection
    }

    /// Removing an unknown identity is a no-op.
    pub async fn deregister(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.write().await.remove(id);
        if removed.is_some() {
            info!("Removed connection {} from registry", id);
        }
        removed
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Connections registered at call time. Later registrations or removals do
    /// not affect the returned vector.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
