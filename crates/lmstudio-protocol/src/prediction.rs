use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumString};

use crate::kv_config::{KvConfig, checkbox_value, entry};
use crate::model::ModelDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ContextOverflowPolicy {
    StopAtLimit,
    TruncateMiddle,
    RollingWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StructuredPredictionType {
    None,
    Json,
}

/// Constrains the output shape. Validation happens server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPredictionSetting {
    #[serde(rename = "type")]
    pub kind: StructuredPredictionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
}

impl StructuredPredictionSetting {
    pub fn json_schema(schema: Value) -> Self {
        Self {
            kind: StructuredPredictionType::Json,
            json_schema: Some(schema),
        }
    }
}

/// Wire-level prediction settings. Unset fields fall back to lower config layers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LlmPredictionConfig {
    pub temperature: Option<f64>,
    pub top_k_sampling: Option<i64>,
    pub stop_strings: Option<Vec<String>>,
    pub structured: Option<StructuredPredictionSetting>,
    pub context_overflow_policy: Option<ContextOverflowPolicy>,
    /// `-1` lets the model generate until it stops on its own.
    pub max_predicted_tokens: Option<i64>,
    pub repeat_penalty: Option<f64>,
    pub min_p_sampling: Option<f64>,
    pub top_p_sampling: Option<f64>,
    pub cpu_threads: Option<u32>,
}

impl LlmPredictionConfig {
    pub fn to_kv_config(&self) -> KvConfig {
        KvConfig::from_entries([
            ("temperature", entry(&self.temperature)),
            ("topKSampling", entry(&self.top_k_sampling)),
            ("stopStrings", entry(&self.stop_strings)),
            ("structured", entry(&self.structured)),
            ("contextOverflowPolicy", entry(&self.context_overflow_policy)),
            (
                "maxPredictedTokens",
                checkbox_value(self.max_predicted_tokens, -1, 1),
            ),
            ("repeatPenalty", checkbox_value(self.repeat_penalty, 1.0, 1.0)),
            ("minPSampling", checkbox_value(self.min_p_sampling, 0.0, 0.05)),
            ("topPSampling", checkbox_value(self.top_p_sampling, 1.0, 0.95)),
            ("llama.cpuThreads", entry(&self.cpu_threads)),
        ])
    }
}

pub const PROMPT_TEMPLATE_KEY: &str = "promptTemplate";

const COMPLETE_MODE_TEMPLATE: &str =
    "{% for message in messages %}{{ message['content'] }}{% endfor %}";

/// Config layer used by raw completions: a template that concatenates messages verbatim.
pub fn complete_mode_formatting() -> KvConfig {
    KvConfig::from_entries([(
        PROMPT_TEMPLATE_KEY,
        Some(json!({
            "type": "jinja",
            "jinjaPromptTemplate": {
                "bosToken": "",
                "eosToken": "",
                "template": COMPLETE_MODE_TEMPLATE,
            },
            "stopStrings": [],
        })),
    )])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum StopReason {
    UserStopped,
    ModelUnloaded,
    Failed,
    EosFound,
    StopStringFound,
    MaxPredictedTokensReached,
    ContextLengthReached,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmPredictionStats {
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_gpu_layers: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_token_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_tokens_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens_count: Option<u64>,
}

/// Final outcome of a successful prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub content: String,
    pub stats: LlmPredictionStats,
    pub model_info: Option<ModelDescriptor>,
    pub load_config: KvConfig,
    pub prediction_config: KvConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPromptTemplateOpts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omit_bos_token: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omit_eos_token: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_encodes_to_no_fields() {
        let config = LlmPredictionConfig::default().to_kv_config();

        assert!(config.is_empty());
        assert_eq!(serde_json::to_value(&config).unwrap(), json!({"fields": []}));
    }

    #[test]
    fn unchecked_sentinels_use_server_defaults() {
        let config = LlmPredictionConfig {
            max_predicted_tokens: Some(-1),
            repeat_penalty: Some(1.0),
            min_p_sampling: Some(0.0),
            top_p_sampling: Some(1.0),
            ..Default::default()
        }
        .to_kv_config();

        assert_eq!(
            config.get("maxPredictedTokens"),
            Some(&json!({"checked": false, "value": 1}))
        );
        assert_eq!(
            config.get("repeatPenalty"),
            Some(&json!({"checked": false, "value": 1.0}))
        );
        assert_eq!(
            config.get("minPSampling"),
            Some(&json!({"checked": false, "value": 0.05}))
        );
        assert_eq!(
            config.get("topPSampling"),
            Some(&json!({"checked": false, "value": 0.95}))
        );
    }

    #[test]
    fn explicit_values_are_checked_and_passed_through() {
        let config = LlmPredictionConfig {
            temperature: Some(0.7),
            top_k_sampling: Some(40),
            stop_strings: Some(vec!["\n".to_string()]),
            context_overflow_policy: Some(ContextOverflowPolicy::RollingWindow),
            max_predicted_tokens: Some(64),
            repeat_penalty: Some(1.1),
            cpu_threads: Some(4),
            ..Default::default()
        }
        .to_kv_config();

        let keys: Vec<_> = config.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "temperature",
                "topKSampling",
                "stopStrings",
                "contextOverflowPolicy",
                "maxPredictedTokens",
                "repeatPenalty",
                "llama.cpuThreads",
            ]
        );
        assert_eq!(config.get("contextOverflowPolicy"), Some(&json!("rollingWindow")));
        assert_eq!(
            config.get("maxPredictedTokens"),
            Some(&json!({"checked": true, "value": 64}))
        );
        assert_eq!(
            config.get("repeatPenalty"),
            Some(&json!({"checked": true, "value": 1.1}))
        );
        assert_eq!(config.get("llama.cpuThreads"), Some(&json!(4)));
    }

    #[test]
    fn re_encoding_an_encoded_config_changes_nothing() {
        let config = LlmPredictionConfig {
            temperature: Some(0.2),
            max_predicted_tokens: Some(-1),
            stop_strings: Some(vec!["\n".to_string()]),
            top_p_sampling: Some(0.9),
            ..Default::default()
        };
        let once = config.to_kv_config();
        let twice = KvConfig::from_entries(once.entries());

        assert_eq!(twice, once);
        assert_eq!(config.to_kv_config(), once);
    }


    #[test]
    fn structured_setting_serializes_schema() {
        let config = LlmPredictionConfig {
            structured: Some(StructuredPredictionSetting::json_schema(json!({"type": "object"}))),
            ..Default::default()
        }
        .to_kv_config();
        assert_eq!(
            config.get("structured"),
            Some(&json!({"type": "json", "jsonSchema": {"type": "object"}}))
        );
    }

    #[test]
    fn stats_decode_known_and_unknown_stop_reasons() {
        let stats: LlmPredictionStats = serde_json::from_value(json!({
            "stopReason": "eosFound",
            "tokensPerSecond": 12.5,
            "predictedTokensCount": 3
        }))
        .unwrap();
        assert_eq!(stats.stop_reason, StopReason::EosFound);
        assert_eq!(stats.stop_reason.to_string(), "eosFound");
        assert_eq!(stats.predicted_tokens_count, Some(3));

        let stats: LlmPredictionStats =
            serde_json::from_value(json!({"stopReason": "somethingElse"})).unwrap();
        assert_eq!(stats.stop_reason, StopReason::Unknown);
    }

    #[test]
    fn complete_mode_layer_concatenates_messages() {
        let config = complete_mode_formatting();
        let template = config.get(PROMPT_TEMPLATE_KEY).unwrap();
        assert_eq!(template["type"], json!("jinja"));
        assert_eq!(
            template["jinjaPromptTemplate"]["template"],
            json!(COMPLETE_MODE_TEMPLATE)
        );
        assert_eq!(template["stopStrings"], json!([]));
    }
}
