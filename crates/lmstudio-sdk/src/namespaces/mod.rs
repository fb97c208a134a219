mod diagnostics;
mod model;
mod system;

pub use diagnostics::{DiagnosticsNamespace, LogStreamSubscription};
pub use model::{
    Embedding, EmbeddingNamespace, Llm, LlmNamespace, LoadModelOpts, LoadingModel, ModelDomain,
    ModelNamespace,
};
pub use system::SystemNamespace;
