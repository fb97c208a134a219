//! One WebSocket connection per endpoint family, multiplexing RPCs and channels.

mod registry;
mod thread;

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use lmstudio_protocol::{AuthFrame, ClientFrame};
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter};

use self::registry::{PendingCall, PortRegistry};
use self::thread::{PortThread, ThreadError};
use crate::credentials::ClientCredentials;
use crate::error::LmStudioError;
use crate::ids::IDS;
use crate::websocket::WebSocketClient;

const READ_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum PortEndpoint {
    Llm,
    Embedding,
    System,
    Diagnostics,
}

/// What a channel handler observes, in server order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A `channelSend` payload.
    Message(Value),
    /// `channelError`, or the socket went away. Terminal.
    Error(LmStudioError),
    /// `channelClose`. Terminal.
    Closed,
}

/// Receives the events of one channel. Runs on the port's receive thread.
pub trait ChannelHandler: Send + 'static {
    fn handle(&mut self, event: ChannelEvent);
}

impl<F> ChannelHandler for F
where
    F: FnMut(ChannelEvent) + Send + 'static,
{
    fn handle(&mut self, event: ChannelEvent) {
        self(event)
    }
}

pub(crate) type SharedHandler = Arc<Mutex<dyn ChannelHandler>>;

pub(crate) struct Outbound {
    text: String,
    flushed: Option<Sender<Result<(), LmStudioError>>>,
}

struct PortInner {
    endpoint: PortEndpoint,
    outbound: Sender<Outbound>,
    abort_sender: Sender<()>,
    registry: Arc<PortRegistry>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<Result<(), ThreadError>>>>,
}

/// A connected port. Cloning shares the same connection.
#[derive(Clone)]
pub struct ClientPort {
    inner: Arc<PortInner>,
}

/// Non-owning reference to a port, held by model handles.
#[derive(Clone)]
pub struct WeakPort {
    inner: Weak<PortInner>,
}

impl WeakPort {
    pub fn upgrade(&self) -> Result<ClientPort, LmStudioError> {
        self.inner
            .upgrade()
            .map(|inner| ClientPort { inner })
            .ok_or(LmStudioError::NotConnected)
    }
}

impl std::fmt::Debug for WeakPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.upgrade() {
            Some(inner) => write!(f, "WeakPort({})", inner.endpoint),
            None => write!(f, "WeakPort(<dropped>)"),
        }
    }
}

impl std::fmt::Debug for ClientPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPort")
            .field("endpoint", &self.inner.endpoint)
            .field("pending_rpcs", &self.inner.registry.rpcs.len())
            .field("open_channels", &self.inner.registry.channels.len())
            .finish()
    }
}

impl ClientPort {
    /// Opens `<base_url>/<endpoint>`, authenticates and starts the receive thread.
    pub fn connect(
        base_url: &str,
        endpoint: PortEndpoint,
        credentials: &ClientCredentials,
    ) -> Result<ClientPort, LmStudioError> {
        let url = format!("{base_url}/{endpoint}");
        log::debug!("Connecting to {url}");

        let mut ws_client = WebSocketClient::new();
        ws_client.connect(&url, READ_TIMEOUT)?;
        let auth = AuthFrame::new(credentials.identifier(), credentials.passkey());
        ws_client.send_text(auth.encode()?)?;

        let (outbound, outbound_receiver) = crossbeam::channel::unbounded();
        let (abort_sender, abort_signal) = crossbeam::channel::bounded(1);
        let registry = PortRegistry::new();
        let thread = PortThread::new(
            endpoint,
            ws_client,
            outbound_receiver,
            abort_signal,
            registry.clone(),
        );
        let handle = std::thread::Builder::new()
            .name(format!("lmstudio-{endpoint}"))
            .spawn(|| thread.run())
            .map_err(|e| LmStudioError::Connection(e.to_string()))?;

        log::info!("Connected to {url}");

        Ok(ClientPort {
            inner: Arc::new(PortInner {
                endpoint,
                outbound,
                abort_sender,
                registry,
                thread_id: handle.thread().id(),
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn endpoint(&self) -> PortEndpoint {
        self.inner.endpoint
    }

    pub fn downgrade(&self) -> WeakPort {
        WeakPort {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether the receive thread is still running.
    pub fn is_open(&self) -> bool {
        self.inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the receive thread and fails everything still in flight. Idempotent.
    pub fn close(&self) -> Result<(), LmStudioError> {
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };
        if self.is_port_thread() {
            return Err(LmStudioError::ReentrantCall("close".to_string()));
        }

        // The thread may already have exited on its own.
        let _ = self.inner.abort_sender.try_send(());
        match handle.join().unwrap_or(Err(ThreadError::Panic)) {
            Ok(()) => Ok(()),
            Err(ThreadError::Panic) => Err(LmStudioError::Unknown(ThreadError::Panic.to_string())),
            Err(e) => {
                log::debug!("Port '{}' had already stopped: {e}", self.inner.endpoint);
                Ok(())
            }
        }
    }

    fn is_port_thread(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    fn enqueue(&self, text: String, flushed: Option<Sender<Result<(), LmStudioError>>>) -> Result<(), LmStudioError> {
        self.inner
            .outbound
            .send(Outbound { text, flushed })
            .map_err(|_| LmStudioError::ConnectionClosed)
    }

    /// Sends an RPC and blocks until its result arrives.
    pub fn call_rpc(&self, endpoint: &str, parameter: Option<Value>) -> Result<Value, LmStudioError> {
        if self.is_port_thread() {
            return Err(LmStudioError::ReentrantCall(endpoint.to_string()));
        }
        self.call_rpc_deferred(endpoint, parameter)?.wait()
    }

    /// [`call_rpc`](Self::call_rpc), decoding the result.
    pub fn call_rpc_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        parameter: Option<Value>,
    ) -> Result<T, LmStudioError> {
        let result = self.call_rpc(endpoint, parameter)?;
        decode_result(endpoint, result)
    }

    /// Sends an RPC without waiting. The result is delivered to the returned [`PendingRpc`].
    pub fn call_rpc_deferred(
        &self,
        endpoint: &str,
        parameter: Option<Value>,
    ) -> Result<PendingRpc, LmStudioError> {
        let call_id = IDS.next_call_id();
        let (sink, receiver) = crossbeam::channel::bounded(1);
        self.inner.registry.rpcs.insert(
            call_id,
            PendingCall {
                endpoint: endpoint.to_string(),
                sink,
            },
        )?;

        let frame = ClientFrame::RpcCall {
            endpoint: endpoint.to_string(),
            call_id,
            parameter,
        };
        log::debug!("[{}] rpcCall '{endpoint}' ({call_id})", self.inner.endpoint);
        let sent = frame
            .encode()
            .map_err(LmStudioError::from)
            .and_then(|text| self.enqueue(text, None));
        if let Err(e) = sent {
            self.inner.registry.rpcs.remove(call_id);
            return Err(e);
        }

        Ok(PendingRpc {
            endpoint: endpoint.to_string(),
            receiver,
        })
    }

    /// Opens a channel. The handler is registered before the create frame is
    /// sent; the id is returned once the frame has been written.
    pub fn create_channel(
        &self,
        endpoint: &str,
        creation_parameter: Option<Value>,
        handler: impl ChannelHandler,
    ) -> Result<u64, LmStudioError> {
        let channel_id = IDS.next_channel_id();
        let handler: SharedHandler = Arc::new(Mutex::new(handler));
        self.inner.registry.channels.insert(channel_id, handler)?;

        let result = self.send_channel_create(endpoint, channel_id, creation_parameter);
        if let Err(e) = result {
            self.inner.registry.channels.remove(channel_id);
            return Err(e);
        }
        log::debug!(
            "[{}] Channel '{endpoint}' opened ({channel_id})",
            self.inner.endpoint
        );
        Ok(channel_id)
    }

    fn send_channel_create(
        &self,
        endpoint: &str,
        channel_id: u64,
        creation_parameter: Option<Value>,
    ) -> Result<(), LmStudioError> {
        let text = ClientFrame::ChannelCreate {
            endpoint: endpoint.to_string(),
            channel_id,
            creation_parameter,
        }
        .encode()?;

        // The receive thread writes the frame itself; waiting for it there would deadlock.
        if self.is_port_thread() {
            return self.enqueue(text, None);
        }
        let (flushed, flush_ack) = crossbeam::channel::bounded(1);
        self.enqueue(text, Some(flushed))?;
        flush_ack
            .recv()
            .unwrap_or(Err(LmStudioError::ConnectionClosed))
    }

    /// Queues a message on an open channel without waiting for it to be written.
    pub fn send_channel_message(&self, channel_id: u64, message: Value) -> Result<(), LmStudioError> {
        if !self.inner.registry.channels.contains(channel_id) {
            return Err(LmStudioError::InvalidArgument(format!(
                "channel {channel_id} is not open"
            )));
        }
        let text = ClientFrame::ChannelSend { channel_id, message }.encode()?;
        self.enqueue(text, None)
    }

    /// Drops the local handler of a channel. Later server messages for it are ignored.
    pub fn forget_channel(&self, channel_id: u64) -> bool {
        self.inner.registry.channels.remove(channel_id).is_some()
    }
}

/// Decodes an RPC result, naming the endpoint on failure.
pub(crate) fn decode_result<T: DeserializeOwned>(endpoint: &str, result: Value) -> Result<T, LmStudioError> {
    serde_json::from_value(result)
        .map_err(|e| LmStudioError::Protocol(format!("unexpected result for '{endpoint}': {e}")))
}

/// Result of an RPC that was sent but not awaited yet.
#[derive(Debug)]
pub struct PendingRpc {
    endpoint: String,
    receiver: Receiver<Result<Value, LmStudioError>>,
}

impl PendingRpc {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Blocks until the server answers or the connection closes.
    pub fn wait(self) -> Result<Value, LmStudioError> {
        self.receiver
            .recv()
            .unwrap_or(Err(LmStudioError::ConnectionClosed))
    }

    pub fn wait_as<T: DeserializeOwned>(self) -> Result<T, LmStudioError> {
        let endpoint = self.endpoint.clone();
        decode_result(&endpoint, self.wait()?)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value, LmStudioError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                Some(Err(LmStudioError::ConnectionClosed))
            }
        }
    }

    pub fn try_result(&self) -> Option<Result<Value, LmStudioError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(crossbeam::channel::TryRecvError::Empty) => None,
            Err(crossbeam::channel::TryRecvError::Disconnected) => {
                Some(Err(LmStudioError::ConnectionClosed))
            }
        }
    }
}

/// Sends messages on one channel through a non-owning port reference.
#[derive(Debug, Clone)]
pub(crate) struct ChannelSender {
    port: WeakPort,
    channel_id: u64,
}

impl ChannelSender {
    pub fn new(port: WeakPort, channel_id: u64) -> Self {
        Self { port, channel_id }
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn send(&self, message: Value) -> Result<(), LmStudioError> {
        self.port.upgrade()?.send_channel_message(self.channel_id, message)
    }

    pub fn forget(&self) {
        if let Ok(port) = self.port.upgrade() {
            port.forget_channel(self.channel_id);
        }
    }
}
