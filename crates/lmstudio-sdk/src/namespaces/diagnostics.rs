use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lmstudio_protocol::diagnostics::DiagnosticsLogEvent;
use serde_json::json;

use crate::error::LmStudioError;
use crate::port::{ChannelEvent, ChannelSender, ClientPort};

/// Server log access on the `diagnostics` port.
#[derive(Debug)]
pub struct DiagnosticsNamespace {
    port: ClientPort,
}

impl DiagnosticsNamespace {
    pub(crate) fn new(port: ClientPort) -> Self {
        Self { port }
    }

    pub(crate) fn port(&self) -> &ClientPort {
        &self.port
    }

    /// Streams server log events to `listener` until the subscription is dropped
    /// with [`LogStreamSubscription::unsubscribe`].
    ///
    /// The listener runs on the port's receive thread.
    pub fn unstable_stream_logs(
        &self,
        mut listener: impl FnMut(DiagnosticsLogEvent) + Send + 'static,
    ) -> Result<LogStreamSubscription, LmStudioError> {
        let unsubscribed = Arc::new(AtomicBool::new(false));
        let stopped = unsubscribed.clone();
        let handler = move |event: ChannelEvent| match event {
            ChannelEvent::Message(_) if stopped.load(Ordering::SeqCst) => {}
            ChannelEvent::Message(payload) => {
                match serde_json::from_value::<DiagnosticsLogEvent>(payload) {
                    Ok(event) => listener(event),
                    Err(e) => log::error!("Discarding malformed log event: {e}"),
                }
            }
            ChannelEvent::Error(e) => log::warn!("Log stream ended with an error: {e}"),
            ChannelEvent::Closed => log::debug!("Log stream closed by the server"),
        };
        let channel_id = self.port.create_channel("streamLogs", None, handler)?;
        Ok(LogStreamSubscription {
            sender: ChannelSender::new(self.port.downgrade(), channel_id),
            unsubscribed,
        })
    }
}

/// An open `streamLogs` channel.
#[derive(Debug)]
pub struct LogStreamSubscription {
    sender: ChannelSender,
    unsubscribed: Arc<AtomicBool>,
}

impl LogStreamSubscription {
    /// Asks the server to stop streaming and drops the local listener. Idempotent.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The server may ignore `stop`; the local flag and forget are what end delivery.
        if let Err(e) = self.sender.send(json!({ "type": "stop" })) {
            log::debug!("Could not send stop on log stream: {e}");
        }
        self.sender.forget();
    }
}
