//! Client-side references to models, resolved by the server at call time.

mod dynamic;
mod embedding;
mod llm;
mod specific;

pub use dynamic::{DomainHandle, DynamicHandle};
pub use embedding::{EmbeddingDynamicHandle, EmbeddingSpecificModel, EmbedStringResult};
pub use llm::{LlmDynamicHandle, LlmSpecificModel};
pub use specific::SpecificModel;
