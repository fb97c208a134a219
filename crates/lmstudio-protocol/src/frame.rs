use derive_new::new;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

pub const AUTH_VERSION: u32 = 1;

/// First frame sent on every port, before any RPC or channel traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFrame {
    pub auth_version: u32,
    pub client_identifier: String,
    pub client_passkey: String,
}

impl AuthFrame {
    pub fn new(client_identifier: impl Into<String>, client_passkey: impl Into<String>) -> Self {
        Self {
            auth_version: AUTH_VERSION,
            client_identifier: client_identifier.into(),
            client_passkey: client_passkey.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// Error body carried by `rpcError` and `channelError` frames.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, new)]
pub struct SerializedError {
    #[serde(default)]
    pub title: String,
    #[new(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[new(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[new(default)]
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl std::fmt::Display for SerializedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title)?;
        if let Some(cause) = &self.cause {
            write!(f, " (cause: {cause})")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (suggestion: {suggestion})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    RpcCall {
        endpoint: String,
        call_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameter: Option<Value>,
    },
    ChannelCreate {
        endpoint: String,
        channel_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        creation_parameter: Option<Value>,
    },
    ChannelSend {
        channel_id: u64,
        message: Value,
    },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    ChannelSend {
        channel_id: u64,
        #[serde(default)]
        message: Value,
    },
    ChannelClose {
        channel_id: u64,
    },
    ChannelError {
        channel_id: u64,
        #[serde(default)]
        error: SerializedError,
    },
    RpcResult {
        call_id: u64,
        #[serde(default)]
        result: Value,
    },
    RpcError {
        call_id: u64,
        #[serde(default)]
        error: SerializedError,
    },
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Decodes a text frame. Objects without a `type` decode to [`ServerFrame::Unknown`].
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        match &value {
            Value::Object(map) if !map.contains_key("type") => Ok(ServerFrame::Unknown),
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| ProtocolError::MalformedFrame(e.to_string())),
            other => Err(ProtocolError::MalformedFrame(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_frame_uses_protocol_version_one() {
        let frame = AuthFrame::new("id", "pass").encode().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"authVersion": 1, "clientIdentifier": "id", "clientPasskey": "pass"})
        );
    }

    #[test]
    fn rpc_call_omits_missing_parameter() {
        let frame = ClientFrame::RpcCall {
            endpoint: "listLoaded".to_string(),
            call_id: 4,
            parameter: None,
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "rpcCall", "endpoint": "listLoaded", "callId": 4})
        );
    }

    #[test]
    fn channel_create_carries_creation_parameter() {
        let frame = ClientFrame::ChannelCreate {
            endpoint: "predict".to_string(),
            channel_id: 2,
            creation_parameter: Some(json!({"a": 1})),
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "channelCreate", "endpoint": "predict", "channelId": 2, "creationParameter": {"a": 1}})
        );
    }

    #[test]
    fn decodes_every_server_frame_kind() {
        let send = ServerFrame::decode(r#"{"type":"channelSend","channelId":1,"message":{"type":"fragment","fragment":"x"}}"#).unwrap();
        assert_eq!(
            send,
            ServerFrame::ChannelSend {
                channel_id: 1,
                message: json!({"type": "fragment", "fragment": "x"})
            }
        );

        let close = ServerFrame::decode(r#"{"type":"channelClose","channelId":1}"#).unwrap();
        assert_eq!(close, ServerFrame::ChannelClose { channel_id: 1 });

        let error =
            ServerFrame::decode(r#"{"type":"rpcError","callId":7,"error":{"title":"no such model","stack":"x"}}"#)
                .unwrap();
        match error {
            ServerFrame::RpcError { call_id, error } => {
                assert_eq!(call_id, 7);
                assert_eq!(error.title, "no such model");
                assert_eq!(error.rest.get("stack"), Some(&json!("x")));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn unknown_and_untyped_frames_are_tolerated() {
        assert_eq!(
            ServerFrame::decode(r#"{"type":"somethingNew","x":1}"#).unwrap(),
            ServerFrame::Unknown
        );
        assert_eq!(ServerFrame::decode(r#"{"x":1}"#).unwrap(), ServerFrame::Unknown);
        assert!(ServerFrame::decode("[1,2]").is_err());
        assert!(ServerFrame::decode("not json").is_err());
    }
}
