mod client;
mod error;

pub(crate) use client::WebSocketClient;
pub use error::WebSocketError;
