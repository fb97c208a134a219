//! Payloads exchanged inside the `predict` and `loadModel` channels.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::frame::SerializedError;
use crate::kv_config::KvConfig;
use crate::model::ModelDescriptor;
use crate::prediction::LlmPredictionStats;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PredictionChannelMessage {
    Fragment {
        #[serde(default)]
        fragment: String,
    },
    PromptProcessingProgress {
        #[serde(default)]
        progress: f64,
    },
    Success {
        stats: LlmPredictionStats,
        #[serde(default, alias = "descriptor")]
        model_info: Option<ModelDescriptor>,
        #[serde(default)]
        load_config: KvConfig,
        #[serde(default)]
        prediction_config: KvConfig,
    },
    Error {
        #[serde(default)]
        error: SerializedError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LoadModelChannelMessage {
    Resolved {
        full_path: String,
        #[serde(default)]
        ambiguous: bool,
    },
    Progress {
        #[serde(default)]
        progress: f64,
    },
    Success {
        instance_reference: String,
        #[serde(default)]
        identifier: Option<String>,
    },
    Error {
        #[serde(default)]
        error: SerializedError,
    },
    #[serde(other)]
    Unknown,
}

/// Decodes a channel payload, mapping payloads without a `type` to the `Unknown` variant.
pub fn decode_channel_message<T>(context: &str, message: Value) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    let message = match message {
        Value::Object(mut map) => {
            map.entry("type").or_insert_with(|| Value::String(String::new()));
            Value::Object(map)
        }
        other => other,
    };
    serde_json::from_value(message).map_err(|e| ProtocolError::unexpected_payload(context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::StopReason;
    use serde_json::json;

    #[test]
    fn prediction_success_accepts_descriptor_alias() {
        let message: PredictionChannelMessage = decode_channel_message(
            "predict",
            json!({
                "type": "success",
                "stats": {"stopReason": "eosFound"},
                "descriptor": {"identifier": "m", "path": "pub/repo"}
            }),
        )
        .unwrap();
        match message {
            PredictionChannelMessage::Success {
                stats,
                model_info,
                load_config,
                ..
            } => {
                assert_eq!(stats.stop_reason, StopReason::EosFound);
                assert_eq!(model_info, Some(ModelDescriptor::new("m", "pub/repo")));
                assert!(load_config.is_empty());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn prediction_success_without_stats_is_rejected() {
        let result: Result<PredictionChannelMessage, _> =
            decode_channel_message("predict", json!({"type": "success"}));
        assert!(matches!(
            result,
            Err(ProtocolError::UnexpectedPayload { .. })
        ));
    }

    #[test]
    fn unknown_messages_decode_to_unknown() {
        let message: PredictionChannelMessage =
            decode_channel_message("predict", json!({"type": "toolCallGenerationStart"})).unwrap();
        assert_eq!(message, PredictionChannelMessage::Unknown);

        let message: LoadModelChannelMessage =
            decode_channel_message("loadModel", json!({"progress": 0.5})).unwrap();
        assert_eq!(message, LoadModelChannelMessage::Unknown);
    }

    #[test]
    fn load_messages_decode() {
        let message: LoadModelChannelMessage = decode_channel_message(
            "loadModel",
            json!({"type": "resolved", "fullPath": "pub/repo/q4.gguf", "ambiguous": true}),
        )
        .unwrap();
        assert_eq!(
            message,
            LoadModelChannelMessage::Resolved {
                full_path: "pub/repo/q4.gguf".to_string(),
                ambiguous: true
            }
        );

        let message: LoadModelChannelMessage = decode_channel_message(
            "loadModel",
            json!({"type": "success", "instanceReference": "i1", "identifier": "m"}),
        )
        .unwrap();
        assert_eq!(
            message,
            LoadModelChannelMessage::Success {
                instance_reference: "i1".to_string(),
                identifier: Some("m".to_string())
            }
        );
    }
}
