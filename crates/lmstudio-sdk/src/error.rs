use lmstudio_protocol::ProtocolError;
use thiserror::Error;

use crate::websocket::WebSocketError;

/// Every failure surfaced by the SDK. Cloneable so one terminal error can be
/// observed by several consumers of the same stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LmStudioError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("Could not find an LM Studio server: {0}. Is LM Studio running?")]
    Discovery(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Port is not connected")]
    NotConnected,
    #[error("RPC error on '{endpoint}': {title}")]
    Rpc { endpoint: String, title: String },
    #[error("Channel error: {title}")]
    Channel { title: String },
    #[error("Channel closed before a result was received")]
    ChannelClosed,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Blocking call to '{0}' issued from the port's receive thread")]
    ReentrantCall(String),
    #[error("Operation was cancelled")]
    Cancelled,
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LmStudioError {
    pub fn invalid_base_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        LmStudioError::InvalidBaseUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by the underlying socket going away.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            LmStudioError::ConnectionClosed | LmStudioError::Connection(_)
        )
    }
}

impl From<ProtocolError> for LmStudioError {
    fn from(error: ProtocolError) -> Self {
        LmStudioError::Protocol(error.to_string())
    }
}

impl From<WebSocketError> for LmStudioError {
    fn from(error: WebSocketError) -> Self {
        match error {
            WebSocketError::Closed => LmStudioError::ConnectionClosed,
            WebSocketError::NotConnected => LmStudioError::NotConnected,
            other => LmStudioError::Connection(other.to_string()),
        }
    }
}

pub type Result<T, E = LmStudioError> = std::result::Result<T, E>;
