use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::connection::FrameKind;
use super::hub::Hub;
use crate::config::ServerConfig;
use crate::error::WebSocketError;

/// Accepts TCP connections, upgrades them on the configured endpoint and
/// feeds every data frame into the hub.
pub struct WebSocketServer {
    hub: Hub,
    endpoint: Arc<str>,
    listener: TcpListener,
}

impl WebSocketServer {
    pub async fn bind(hub: Hub, config: &ServerConfig) -> crate::Result<Self> {
        let listener = TcpListener::bind(config.address()).await?;
        Ok(Self::from_listener(hub, &config.endpoint, listener))
    }

    pub fn from_listener(hub: Hub, endpoint: &str, listener: TcpListener) -> Self {
        Self {
            hub,
            endpoint: Arc::from(endpoint),
            listener,
        }
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; runs until the task is dropped.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Serving websocket hub at ws://{}{}", addr, self.endpoint),
            Err(e) => warn!("Serving websocket hub at unknown address: {}", e),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let hub = self.hub.clone();
                    let endpoint = self.endpoint.clone();
                    tokio::spawn(async move {
                        handle_connection(hub, endpoint, stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(hub: Hub, endpoint: Arc<str>, raw_stream: TcpStream, addr: SocketAddr) {
    info!("New WebSocket connection from: {}", addr);

    let ws_stream = match upgrade(raw_stream, &endpoint).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during WebSocket handshake with {}: {}", addr, e);
            return;
        }
    };

    let (ws_sink, mut ws_stream) = ws_stream.split();
    let connection = hub.connect(Box::new(ws_sink)).await;
    info!("Connection {} established with {}", connection.id(), addr);

    while let Some(message) = ws_stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                hub.submit_frame(&connection, FrameKind::Text, text.as_bytes()).await;
            }
            Ok(Message::Binary(bytes)) => {
                hub.submit_frame(&connection, FrameKind::Binary, &bytes).await;
            }
            Ok(Message::Close(reason)) => {
                info!("Connection {} closed by client: {:?}", connection.id(), reason);
                break;
            }
            Ok(_) => {
                debug!("Control frame on connection {}", connection.id());
            }
            Err(e) => {
                let e = WebSocketError::ReadError(e.to_string());
                error!("Error receiving on connection {}: {}", connection.id(), e);
                break;
            }
        }
    }

    hub.disconnect(connection.id()).await;
}

async fn upgrade(
    raw_stream: TcpStream,
    endpoint: &str,
) -> Result<tokio_tungstenite::WebSocketStream<TcpStream>, WebSocketError> {
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == endpoint {
            return Ok(response);
        }
        let mut rejection = ErrorResponse::new(Some(format!("no websocket endpoint at {}", request.uri().path())));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    };

    tokio_tungstenite::accept_hdr_async(raw_stream, check_path)
        .await
        .map_err(|e| WebSocketError::HandshakeFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use futures::SinkExt;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::connect_async;

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    async fn start() -> (Hub, SocketAddr) {
        let (hub, dispatcher) = Hub::new(&DispatchConfig::default());
        tokio::spawn(dispatcher.run());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = WebSocketServer::from_listener(hub.clone(), "/ws", listener);
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (hub, addr)
    }

    async fn wait_for_count(hub: &Hub, expected: usize) {
        for _ in 0..40 {
            if hub.connection_count().await == expected {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("connection count never reached {}", expected);
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let (hub, addr) = start().await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        wait_for_count(&hub, 1).await;

        ws.close(None).await.unwrap();
        wait_for_count(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_wrong_path_is_rejected() {
        let (hub, addr) = start().await;

        let result = timeout(Duration::from_secs(2), connect_async(format!("ws://{}/other", addr)))
            .await
            .unwrap();
        assert!(result.is_err());
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_reply_over_socket() {
        let (hub, addr) = start().await;
        hub.on("ping", |ctx: crate::ChannelContext| async move {
            ctx.hub
                .emit(&ctx.connection, ctx.frame_kind, "pong", &serde_json::json!({}))
                .await;
        })
        .await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        ws.send(Message::Text(r#"{"Channel":"ping","RequestId":"1","Message":{}}"#.to_string()))
            .await
            .unwrap();

        let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"channel": "pong", "message": {}}));
    }
}
