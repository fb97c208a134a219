use std::sync::{Arc, PoisonError};

use crossbeam::channel::{Receiver, select};
use derive_new::new;
use lmstudio_protocol::ServerFrame;
use serde_json::Value;

use super::registry::PortRegistry;
use super::{ChannelEvent, Outbound, PortEndpoint, SharedHandler};
use crate::error::LmStudioError;
use crate::websocket::WebSocketClient;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ThreadError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Unexpected panic in port thread")]
    Panic,
}

/// Owns the socket of one port. Every write and every inbound dispatch for the
/// port happens on this thread.
#[derive(new)]
pub(super) struct PortThread {
    endpoint: PortEndpoint,
    ws_client: WebSocketClient,
    outbound: Receiver<Outbound>,
    abort_signal: Receiver<()>,
    registry: Arc<PortRegistry>,
}

impl PortThread {
    pub fn run(mut self) -> Result<(), ThreadError> {
        let res = self.thread_loop();
        if let Err(e) = &res {
            log::warn!("Port '{}' stopped: {e}", self.endpoint);
        }
        self.cleanup();
        res
    }

    fn thread_loop(&mut self) -> Result<(), ThreadError> {
        loop {
            select! {
                recv(self.abort_signal) -> _ => {
                    return Ok(());
                }
                recv(self.outbound) -> msg => {
                    match msg {
                        Ok(outbound) => self.handle_outbound(outbound)?,
                        // Every handle to the port is gone.
                        Err(_) => return Ok(()),
                    }
                }
                default => {
                    self.poll_socket()?;
                }
            }
        }
    }

    fn handle_outbound(&mut self, outbound: Outbound) -> Result<(), ThreadError> {
        log::trace!("[{}] -> {}", self.endpoint, outbound.text);
        let result = self.ws_client.send_text(outbound.text);
        if let Some(flushed) = outbound.flushed {
            let _ = flushed.send(result.clone().map_err(LmStudioError::from));
        }
        result.map_err(|e| ThreadError::WebSocket(e.to_string()))
    }

    fn poll_socket(&mut self) -> Result<(), ThreadError> {
        match self.ws_client.read_text() {
            Ok(Some(text)) => {
                log::trace!("[{}] <- {text}", self.endpoint);
                self.dispatch(&text);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(ThreadError::WebSocket(e.to_string())),
        }
    }

    fn dispatch(&self, text: &str) {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("[{}] Dropping undecodable frame: {e}", self.endpoint);
                self.fail_undecodable(text, LmStudioError::from(e));
                return;
            }
        };

        match frame {
            ServerFrame::ChannelSend {
                channel_id,
                message,
            } => match self.registry.channels.get(channel_id) {
                Some(handler) => {
                    deliver(&handler, ChannelEvent::Message(unwrap_log_payload(message)))
                }
                None => log::debug!(
                    "[{}] Message for unknown channel {channel_id}",
                    self.endpoint
                ),
            },
            ServerFrame::ChannelClose { channel_id } => {
                if let Some(handler) = self.registry.channels.remove(channel_id) {
                    log::debug!("[{}] Channel {channel_id} closed", self.endpoint);
                    deliver(&handler, ChannelEvent::Closed);
                }
            }
            ServerFrame::ChannelError { channel_id, error } => {
                if let Some(handler) = self.registry.channels.remove(channel_id) {
                    log::debug!("[{}] Channel {channel_id} failed: {error}", self.endpoint);
                    deliver(
                        &handler,
                        ChannelEvent::Error(LmStudioError::Channel { title: error.title }),
                    );
                }
            }
            ServerFrame::RpcResult { call_id, result } => match self.registry.rpcs.remove(call_id) {
                Some(call) => {
                    let _ = call.sink.send(Ok(result));
                }
                None => log::debug!("[{}] Result for unknown call {call_id}", self.endpoint),
            },
            ServerFrame::RpcError { call_id, error } => match self.registry.rpcs.remove(call_id) {
                Some(call) => {
                    log::debug!("[{}] RPC '{}' failed: {error}", self.endpoint, call.endpoint);
                    let _ = call.sink.send(Err(LmStudioError::Rpc {
                        endpoint: call.endpoint,
                        title: error.title,
                    }));
                }
                None => log::debug!("[{}] Error for unknown call {call_id}", self.endpoint),
            },
            ServerFrame::Unknown => {}
        }
    }

    /// Settles the call or channel an undecodable frame was addressed to, if it can be identified.
    fn fail_undecodable(&self, text: &str, error: LmStudioError) {
        let Ok(Value::Object(frame)) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let id = |key: &str| frame.get(key).and_then(Value::as_u64);

        match frame.get("type").and_then(Value::as_str) {
            Some("rpcResult" | "rpcError") => {
                if let Some(call) = id("callId").and_then(|call_id| self.registry.rpcs.remove(call_id)) {
                    let _ = call.sink.send(Err(error));
                }
            }
            Some("channelSend" | "channelClose" | "channelError") => {
                if let Some(handler) =
                    id("channelId").and_then(|channel_id| self.registry.channels.remove(channel_id))
                {
                    deliver(&handler, ChannelEvent::Error(error));
                }
            }
            _ => {}
        }
    }

    fn cleanup(self) {
        let PortThread {
            endpoint,
            mut ws_client,
            outbound,
            registry,
            ..
        } = self;

        // Refuse further sends before failing whatever is still in flight.
        drop(outbound);
        if let Err(e) = ws_client.close() {
            log::debug!("[{endpoint}] Failed to close WebSocket: {e}");
        }

        for (_, call) in registry.rpcs.drain() {
            let _ = call.sink.send(Err(LmStudioError::ConnectionClosed));
        }
        for (_, handler) in registry.channels.drain() {
            deliver(&handler, ChannelEvent::Error(LmStudioError::ConnectionClosed));
        }
        log::info!("Port '{endpoint}' closed");
    }
}

fn deliver(handler: &SharedHandler, event: ChannelEvent) {
    handler
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .handle(event);
}

/// Log streams wrap their payload as `{type: "log", log: …}`.
fn unwrap_log_payload(message: Value) -> Value {
    match message {
        Value::Object(mut map) if map.get("type").and_then(Value::as_str) == Some("log") => {
            map.remove("log").unwrap_or(Value::Null)
        }
        other => other,
    }
}
