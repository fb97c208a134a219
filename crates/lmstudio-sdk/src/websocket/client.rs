use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use tungstenite::{Message, WebSocket, client::IntoClientRequest, connect, stream::MaybeTlsStream};

use super::WebSocketError;

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Blocking WebSocket connection exchanging JSON text frames.
///
/// Reads time out after `read_timeout` so the owning thread can interleave
/// writes with polling for inbound frames.
#[derive(Debug)]
pub(crate) struct WebSocketClient {
    state: Option<Socket>,
}

impl WebSocketClient {
    pub fn new() -> WebSocketClient {
        WebSocketClient { state: None }
    }

    pub fn connect(&mut self, url: &str, read_timeout: Duration) -> Result<(), WebSocketError> {
        let req = url
            .into_client_request()
            .map_err(|e| WebSocketError::ConnectionError(e.to_string()))?;
        let (socket, _) = connect(req).map_err(|e| WebSocketError::ConnectionError(e.to_string()))?;

        let stream = match socket.get_ref() {
            MaybeTlsStream::Plain(stream) => Some(stream),
            MaybeTlsStream::NativeTls(stream) => Some(stream.get_ref()),
            _ => None,
        };
        if let Some(stream) = stream {
            stream
                .set_read_timeout(Some(read_timeout))
                .map_err(|e| WebSocketError::ConnectionError(e.to_string()))?;
        }

        self.state = Some(socket);

        Ok(())
    }

    pub fn send_text(&mut self, text: String) -> Result<(), WebSocketError> {
        let socket = self.state.as_mut().ok_or(WebSocketError::NotConnected)?;
        socket
            .send(Message::Text(text.into()))
            .map_err(|e| WebSocketError::SendError(e.to_string()))
    }

    /// Returns `Ok(None)` when no complete text frame arrived before the read timeout.
    pub fn read_text(&mut self) -> Result<Option<String>, WebSocketError> {
        let socket = self.state.as_mut().ok_or(WebSocketError::NotConnected)?;
        match socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text.as_str().to_owned())),
            Ok(Message::Close(_)) => Err(WebSocketError::Closed),
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Err(WebSocketError::Closed)
            }
            Err(e) => Err(WebSocketError::ReadError(e.to_string())),
        }
    }

    pub fn close(&mut self) -> Result<(), WebSocketError> {
        if let Some(mut socket) = self.state.take() {
            match socket.close(None) {
                Ok(()) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {}
                Err(e) => return Err(WebSocketError::SendError(e.to_string())),
            }
            // Best effort flush of the close frame; the peer may already be gone.
            let _ = socket.flush();
        }

        Ok(())
    }
}
