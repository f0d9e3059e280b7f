use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt};
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::WebSocketError;

/// Framing of a websocket data frame. Replies are written with the same kind
/// the caller passes in, usually the kind the request arrived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Text,
    Binary,
}

impl FrameKind {
    pub fn into_message(self, payload: Vec<u8>) -> Result<Message, WebSocketError> {
        match self {
            FrameKind::Text => String::from_utf8(payload)
                .map(Message::Text)
                .map_err(|e| WebSocketError::EncodeError(format!("text frame is not utf-8: {}", e))),
            FrameKind::Binary => Ok(Message::Binary(payload)),
        }
    }
}

/// Write half of a connection's transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, kind: FrameKind, payload: Vec<u8>) -> Result<(), WebSocketError>;

    async fn close(&mut self) -> Result<(), WebSocketError>;
}

#[async_trait]
impl<S> FrameSink for futures::stream::SplitSink<S, Message>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send,
{
    async fn write_frame(&mut self, kind: FrameKind, payload: Vec<u8>) -> Result<(), WebSocketError> {
        let message = kind.into_message(payload)?;
        self.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WebSocketError> {
        SinkExt::close(self).await?;
        Ok(())
    }
}

/// Channel-backed sink that lets tests read back what a connection was sent.
#[cfg(test)]
#[async_trait]
impl FrameSink for tokio::sync::mpsc::UnboundedSender<Message> {
    async fn write_frame(&mut self, kind: FrameKind, payload: Vec<u8>) -> Result<(), WebSocketError> {
        let message = kind.into_message(payload)?;
        self.send(message)
            .map_err(|e| WebSocketError::SendError(format!("Failed to send message: {}", e)))
    }

    async fn close(&mut self) -> Result<(), WebSocketError> {
        Ok(())
    }
}

/// One live client session.
///
/// The identity is fixed at construction. Group membership and the transport
/// are each behind their own lock, so handlers running concurrently for the
/// same connection never race on either.
pub struct Connection {
    id: String,
    connected_at: DateTime<Utc>,
    groups: RwLock<Vec<String>>,
    sink: Mutex<Box<dyn FrameSink>>,
}

impl Connection {
    pub(crate) fn new(id: String, sink: Box<dyn FrameSink>) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            groups: RwLock::new(Vec::new()),
            sink: Mutex::new(sink),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Adds `group` unless already present.
    pub async fn join(&self, group: &str) {
        let mut groups = self.groups.write().await;
        if groups.iter().any(|g| g == group) {
            return;
        }
        groups.push(group.to_string());
        debug!("Connection {} joined group {}", self.id, group);
    }

    /// Removes every entry equal to `group`.
    pub async fn leave(&self, group: &str) {
        let mut groups = self.groups.write().await;
        let before = groups.len();
        groups.retain(|g| g != group);
        if groups.len() != before {
            debug!("Connection {} left group {}", self.id, group);
        }
    }

    pub async fn is_member(&self, group: &str) -> bool {
        self.groups.read().await.iter().any(|g| g == group)
    }

    /// Snapshot of joined groups in join order.
    pub async fn groups(&self) -> Vec<String> {
        self.groups.read().await.clone()
    }

    pub async fn write_frame(&self, kind: FrameKind, payload: Vec<u8>) -> Result<(), WebSocketError> {
        self.sink.lock().await.write_frame(kind, payload).await
    }

    pub(crate) async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            warn!("Error closing connection {}: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
