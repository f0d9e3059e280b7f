//! Inbound half of the hub: frames are decoded on the connection's read loop,
//! queued on the shared handoff channel, and run by the [`Dispatcher`] as
//! independent tasks.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use super::connection::{Connection, FrameKind};
use super::envelope::InboundEnvelope;
use super::hub::{Hub, HubInner};
use super::router::ChannelContext;

/// A decoded envelope annotated with where it came from.
pub struct RoutedEnvelope {
    pub connection: Arc<Connection>,
    pub frame_kind: FrameKind,
    pub envelope: InboundEnvelope,
}

impl Hub {
    /// Decodes one inbound frame and hands it to the dispatcher.
    ///
    /// Malformed frames are logged and dropped. Waits while the handoff queue
    /// is full, which stalls the calling read loop.
    pub async fn submit_frame(&self, connection: &Arc<Connection>, frame_kind: FrameKind, payload: &[u8]) {
        let envelope = match InboundEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping frame from connection {}: {}", connection.id(), e);
                return;
            }
        };

        let routed = RoutedEnvelope {
            connection: connection.clone(),
            frame_kind,
            envelope,
        };

        if let Err(e) = self.handoff().send(routed).await {
            error!(
                "Dispatcher is not running, dropping envelope on channel {}",
                e.0.envelope.channel
            );
        }
    }
}

/// Drains the handoff queue in FIFO order and runs the matching handler for
/// each envelope in its own task, with at most `max_in_flight` handlers
/// running at once.
pub struct Dispatcher {
    rx: mpsc::Receiver<RoutedEnvelope>,
    hub: Weak<HubInner>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub(crate) fn new(rx: mpsc::Receiver<RoutedEnvelope>, hub: Weak<HubInner>, max_in_flight: usize) -> Self {
        Self {
            rx,
            hub,
            permits: Arc::new(Semaphore::new(max_in_flight.min(Semaphore::MAX_PERMITS))),
        }
    }

    pub async fn run(mut self) {
        info!("Dispatcher started");

        while let Some(routed) = self.rx.recv().await {
            let Some(inner) = self.hub.upgrade() else {
                break;
            };
            let hub = Hub::from_inner(inner);
            let RoutedEnvelope {
                connection,
                frame_kind,
                envelope,
            } = routed;

            let Some(handler) = hub.router().resolve(&envelope.channel).await else {
                warn!(
                    "No handler for channel {:?} from connection {}, dropping",
                    envelope.channel,
                    connection.id()
                );
                continue;
            };

            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let channel = envelope.channel;
            let ctx = ChannelContext {
                hub,
                connection,
                frame_kind,
                request_id: envelope.request_id,
                message: envelope.message,
            };

            debug!("Dispatching channel {} for connection {}", channel, ctx.connection.id());
            tokio::spawn(async move {
                let _permit = permit;
                let invocation = async move { handler(ctx).await };
                if let Err(panic) = AssertUnwindSafe(invocation).catch_unwind().await {
                    error!("Handler for channel {} panicked: {}", channel, panic_message(&*panic));
                }
            });
        }

        info!("Dispatcher stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
