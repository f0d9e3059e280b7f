//! Outbound delivery. Every call encodes one `{channel, message}` envelope and
//! writes it to its recipients; failures are logged per recipient and never
//! returned to the caller.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::connection::{Connection, FrameKind};
use super::envelope::OutboundEnvelope;
use super::hub::Hub;

impl Hub {
    /// Writes directly to `connection`.
    pub async fn emit<T>(&self, connection: &Arc<Connection>, frame_kind: FrameKind, channel: &str, message: &T)
    where
        T: Serialize + ?Sized,
    {
        if let Some(payload) = encode(channel, message) {
            self.deliver(std::slice::from_ref(connection), frame_kind, payload, channel)
                .await;
        }
    }

    /// Writes to every registered connection except `exclude`.
    pub async fn broadcast<T>(
        &self,
        exclude: Option<&Connection>,
        frame_kind: FrameKind,
        channel: &str,
        message: &T,
    ) where
        T: Serialize + ?Sized,
    {
        let Some(payload) = encode(channel, message) else {
            return;
        };
        let excluded = exclude.map(|c| c.id());
        let recipients: Vec<_> = self
            .registry()
            .snapshot()
            .await
            .into_iter()
            .filter(|c| Some(c.id()) != excluded)
            .collect();
        self.deliver(&recipients, frame_kind, payload, channel).await;
    }

    /// Writes to the connection registered under `id`, if any.
    ///
    /// Scans every registered connection rather than stopping at the first
    /// match.
    pub async fn emit_to_client<T>(&self, id: &str, channel: &str, frame_kind: FrameKind, message: &T)
    where
        T: Serialize + ?Sized,
    {
        let Some(payload) = encode(channel, message) else {
            return;
        };
        let recipients: Vec<_> = self
            .registry()
            .snapshot()
            .await
            .into_iter()
            .filter(|c| c.id() == id)
            .collect();
        if recipients.is_empty() {
            debug!("No connection {} registered for channel {}", id, channel);
        }
        self.deliver(&recipients, frame_kind, payload, channel).await;
    }

    /// Writes to every registered connection that is a member of `group`.
    pub async fn emit_to_group<T>(&self, group: &str, frame_kind: FrameKind, channel: &str, message: &T)
    where
        T: Serialize + ?Sized,
    {
        let Some(payload) = encode(channel, message) else {
            return;
        };
        let mut recipients = Vec::new();
        for connection in self.registry().snapshot().await {
            if connection.is_member(group).await {
                recipients.push(connection);
            }
        }
        self.deliver(&recipients, frame_kind, payload, channel).await;
    }

    /// Writes `payload` to each recipient still registered at write time.
    async fn deliver(&self, recipients: &[Arc<Connection>], frame_kind: FrameKind, payload: Vec<u8>, channel: &str) {
        let writes = recipients.iter().map(|connection| {
            let payload = payload.clone();
            async move {
                if !self.registry().contains(connection.id()).await {
                    debug!("Skipping connection {}, no longer registered", connection.id());
                    return false;
                }
                match connection.write_frame(frame_kind, payload).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to deliver channel {} to connection {}: {}", channel, connection.id(), e);
                        false
                    }
                }
            }
        });

        let delivered = join_all(writes).await.into_iter().filter(|ok| *ok).count();
        debug!(
            "Delivered channel {} to {}/{} connections",
            channel,
            delivered,
            recipients.len()
        );
    }
}

fn encode<T: Serialize + ?Sized>(channel: &str, message: &T) -> Option<Vec<u8>> {
    match OutboundEnvelope::new(channel, message).encode() {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("Failed to encode message for channel {}: {}", channel, e);
            None
        }
    }
}
