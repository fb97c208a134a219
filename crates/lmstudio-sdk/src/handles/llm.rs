use derive_more::Deref;
use lmstudio_protocol::chat::{ConversationItem, LlmContext};
use lmstudio_protocol::kv_config::KvConfigLayerName;
use lmstudio_protocol::load_config::LLM_CONTEXT_LENGTH_KEY;
use lmstudio_protocol::prediction::{ApplyPromptTemplateOpts, complete_mode_formatting};
use lmstudio_protocol::KvConfigStack;
use serde::Deserialize;
use serde_json::json;

use super::specific::SpecificModel;
use super::{DomainHandle, DynamicHandle};
use crate::error::LmStudioError;
use crate::port::decode_result;
use crate::prediction::{LlmPredictionOpts, OngoingPrediction, PredictionCallbacks, start_prediction};

/// Dynamic handle to an LLM.
#[derive(Debug, Clone, Deref)]
pub struct LlmDynamicHandle {
    #[deref]
    handle: DynamicHandle,
    internal_stack: KvConfigStack,
}

pub type LlmSpecificModel = SpecificModel<LlmDynamicHandle>;

impl DomainHandle for LlmDynamicHandle {
    fn from_dynamic(handle: DynamicHandle) -> Self {
        Self {
            handle,
            internal_stack: KvConfigStack::default(),
        }
    }
}

#[derive(Deserialize)]
struct Formatted {
    #[serde(default)]
    formatted: String,
}

#[derive(Deserialize)]
struct Tokens {
    tokens: Vec<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenCount {
    token_count: u64,
}

impl LlmDynamicHandle {
    /// Raw completion: the prompt is sent verbatim, without the model's chat template.
    pub fn complete(
        &self,
        prompt: impl Into<String>,
        opts: LlmPredictionOpts,
    ) -> Result<OngoingPrediction, LmStudioError> {
        let (mut config, callbacks) = opts.split();
        config.stop_strings = Some(Vec::new());
        let stack = self
            .internal_stack
            .clone()
            .with_layer(KvConfigLayerName::ApiOverride, config.to_kv_config())
            .with_layer(
                KvConfigLayerName::CompleteModeFormatting,
                complete_mode_formatting(),
            );
        self.predict_internal(&LlmContext::from_prompt(prompt), &stack, callbacks)
    }

    /// Chat response to a conversation.
    pub fn respond(
        &self,
        history: &[ConversationItem],
        opts: LlmPredictionOpts,
    ) -> Result<OngoingPrediction, LmStudioError> {
        self.predict(LlmContext::from_conversation(history), opts)
    }

    /// Prediction over a fully formed context.
    pub fn predict(
        &self,
        context: LlmContext,
        opts: LlmPredictionOpts,
    ) -> Result<OngoingPrediction, LmStudioError> {
        let (config, callbacks) = opts.split();
        let stack = self
            .internal_stack
            .clone()
            .with_layer(KvConfigLayerName::ApiOverride, config.to_kv_config());
        self.predict_internal(&context, &stack, callbacks)
    }

    fn predict_internal(
        &self,
        context: &LlmContext,
        stack: &KvConfigStack,
        callbacks: PredictionCallbacks,
    ) -> Result<OngoingPrediction, LmStudioError> {
        let port = self.try_upgrade()?;
        start_prediction(&port, self.specifier(), context, stack, callbacks)
    }

    /// Renders `context` with the model's prompt template.
    pub fn unstable_apply_prompt_template(
        &self,
        context: &LlmContext,
        opts: ApplyPromptTemplateOpts,
    ) -> Result<String, LmStudioError> {
        let result = self.call(
            "applyPromptTemplate",
            [
                ("context", json!(context)),
                ("opts", json!(opts)),
                ("predictionConfigStack", json!(self.internal_stack)),
            ],
        )?;
        Ok(decode_result::<Formatted>("applyPromptTemplate", result)?.formatted)
    }

    /// Tokenization differs between models; use the model you will predict with.
    pub fn unstable_tokenize(&self, input: &str) -> Result<Vec<i64>, LmStudioError> {
        let result = self.call("tokenize", [("inputString", json!(input))])?;
        Ok(decode_result::<Tokens>("tokenize", result)?.tokens)
    }

    pub fn unstable_count_tokens(&self, input: &str) -> Result<u64, LmStudioError> {
        let result = self.call("countTokens", [("inputString", json!(input))])?;
        Ok(decode_result::<TokenCount>("countTokens", result)?.token_count)
    }

    pub fn unstable_get_context_length(&self) -> Result<Option<u64>, LmStudioError> {
        self.load_config_u64(LLM_CONTEXT_LENGTH_KEY)
    }
}
