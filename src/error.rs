use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] WebSocketError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

/// Failures local to a single connection or frame. None of these travel back
/// to the remote peer; they are logged where they happen.
#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Message encoding failed: {0}")]
    EncodeError(String),

    #[error("Message sending failed: {0}")]
    SendError(String),

    #[error("Read failed: {0}")]
    ReadError(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for WebSocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        WebSocketError::SendError(err.to_string())
    }
}
