pub mod config;
pub mod error;
pub mod websocket;

pub use error::{AppError, WebSocketError};
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use websocket::{
    register_default_channels, ChannelContext, Connection, Dispatcher, FrameKind, Hub, WebSocketServer,
};

/// Builds the hub from `config`, installs the stock channels, binds the
/// listener and spawns the dispatcher and accept loop. Returns the hub and the
/// bound address.
pub async fn start(config: &Settings) -> Result<(Hub, std::net::SocketAddr)> {
    let (hub, dispatcher) = Hub::new(&config.dispatch);
    register_default_channels(&hub).await;

    let server = WebSocketServer::bind(hub.clone(), &config.server).await?;
    let addr = server.local_addr()?;

    tokio::spawn(dispatcher.run());
    tokio::spawn(server.run());
    Ok((hub, addr))
}
