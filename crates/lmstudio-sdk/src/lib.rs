//! Blocking client for the LM Studio local inference server.
//!
//! An [`LmStudioClient`] holds one WebSocket connection ("port") per endpoint
//! family. Each port is served by a single background thread which writes
//! queued frames and dispatches every inbound frame to the pending RPC or
//! open channel it belongs to.
//!
//! ```no_run
//! use lmstudio_sdk::{LmStudioClient, LoadModelOpts};
//!
//! let client = LmStudioClient::new(None, None, None)?;
//! let model = client
//!     .llm()
//!     .load("lmstudio-community/qwen2.5-7b-instruct", LoadModelOpts::default())?
//!     .into_result()?;
//! let prediction = model.complete("The capital of France is", Default::default())?;
//! for fragment in &prediction {
//!     print!("{}", fragment?);
//! }
//! println!("\n{:?}", prediction.result()?.stats.stop_reason);
//! client.close()?;
//! # Ok::<(), lmstudio_sdk::LmStudioError>(())
//! ```

mod cancellation;
mod client;
mod config;
mod credentials;
mod discovery;
mod error;
mod handles;
mod ids;
mod namespaces;
mod port;
mod prediction;
mod streaming;
mod websocket;

#[cfg(test)]
mod tests;

pub use cancellation::*;
pub use client::*;
pub use config::*;
pub use credentials::*;
pub use discovery::*;
pub use error::*;
pub use handles::*;
pub use namespaces::*;
pub use port::{
    ChannelEvent, ChannelHandler, ClientPort, PendingRpc, PortEndpoint, WeakPort,
};
pub use prediction::*;
pub use streaming::*;
pub use websocket::WebSocketError;

pub use lmstudio_protocol as protocol;
pub use lmstudio_protocol::chat::{ChatMessage, ChatMessagePart, ChatRole, ConversationItem, LlmContext};
pub use lmstudio_protocol::load_config::{
    EmbeddingLoadModelConfig, GpuOffload, GpuSetting, LlmLoadModelConfig, OffloadRatio,
};
pub use lmstudio_protocol::prediction::{
    LlmPredictionConfig, LlmPredictionStats, PredictionResult, StopReason,
};
pub use lmstudio_protocol::{
    DownloadedModel, KvConfig, KvConfigStack, ModelDescriptor, ModelDomainType, ModelQuery,
    ModelSpecifier,
};
