//! Wire types spoken between an LM Studio client and server.
//!
//! Nothing in this crate performs I/O. Frames are encoded to and decoded from
//! JSON text; every payload the client sends or receives over a channel or an
//! RPC has a typed counterpart here.

pub mod chat;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod kv_config;
pub mod load_config;
pub mod messages;
pub mod model;
pub mod prediction;

pub use error::ProtocolError;
pub use frame::{AuthFrame, ClientFrame, SerializedError, ServerFrame};
pub use kv_config::{KvConfig, KvConfigField, KvConfigLayerName, KvConfigStack, KvConfigStackLayer};
pub use model::{DownloadedModel, ModelDescriptor, ModelDomainType, ModelQuery, ModelSpecifier};
