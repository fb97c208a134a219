use derive_more::Deref;
use lmstudio_protocol::load_config::{EMBEDDING_CONTEXT_LENGTH_KEY, EMBEDDING_EVAL_BATCH_SIZE_KEY};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::specific::SpecificModel;
use super::{DomainHandle, DynamicHandle};
use crate::error::LmStudioError;
use crate::port::decode_result;

/// Dynamic handle to an embedding model.
#[derive(Debug, Clone, Deref)]
pub struct EmbeddingDynamicHandle(DynamicHandle);

pub type EmbeddingSpecificModel = SpecificModel<EmbeddingDynamicHandle>;

impl DomainHandle for EmbeddingDynamicHandle {
    fn from_dynamic(handle: DynamicHandle) -> Self {
        Self(handle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedStringResult {
    pub embedding: Vec<f64>,
}

#[derive(Deserialize)]
struct Tokens {
    tokens: Vec<i64>,
}

impl EmbeddingDynamicHandle {
    pub fn embed_string(&self, input: &str) -> Result<EmbedStringResult, LmStudioError> {
        let result = self.call("embedString", [("inputString", json!(input))])?;
        decode_result("embedString", result)
    }

    pub fn unstable_get_context_length(&self) -> Result<Option<u64>, LmStudioError> {
        self.load_config_u64(EMBEDDING_CONTEXT_LENGTH_KEY)
    }

    pub fn unstable_get_eval_batch_size(&self) -> Result<Option<u64>, LmStudioError> {
        self.load_config_u64(EMBEDDING_EVAL_BATCH_SIZE_KEY)
    }

    pub fn unstable_tokenize(&self, input: &str) -> Result<Vec<i64>, LmStudioError> {
        let result = self.call("tokenize", [("inputString", json!(input))])?;
        Ok(decode_result::<Tokens>("tokenize", result)?.tokens)
    }
}
