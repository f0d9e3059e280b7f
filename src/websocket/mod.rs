//! WebSocket module for the channel hub
//!
//! Connections are kept in a registry, inbound envelopes are routed by channel
//! name to registered handlers, and handlers reply through the delivery
//! primitives on [`Hub`].

mod channels;
mod connection;
mod delivery;
mod dispatch;
mod envelope;
mod hub;
mod registry;
mod router;
mod server;

pub use channels::register_default_channels;
pub use connection::{Connection, FrameKind, FrameSink};
pub use dispatch::{Dispatcher, RoutedEnvelope};
pub use envelope::{InboundEnvelope, OutboundEnvelope};
pub use hub::Hub;
pub use registry::ConnectionRegistry;
pub use router::{ChannelContext, ChannelRouter, Handler};
pub use server::WebSocketServer;
