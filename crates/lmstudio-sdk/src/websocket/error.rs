use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[allow(clippy::enum_variant_names)]
pub enum WebSocketError {
    #[error("Failed to connect WebSocket: {0}")]
    ConnectionError(String),
    #[error("WebSocket send error: {0}")]
    SendError(String),
    #[error("WebSocket read error: {0}")]
    ReadError(String),
    #[error("WebSocket is not connected")]
    NotConnected,
    #[error("WebSocket was closed by the peer")]
    Closed,
}
