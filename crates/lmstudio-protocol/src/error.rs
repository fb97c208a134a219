use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Failed to encode frame: {0}")]
    Encode(String),
    #[error("Unexpected payload for {context}: {reason}")]
    UnexpectedPayload { context: String, reason: String },
}

impl ProtocolError {
    pub fn unexpected_payload(context: impl Into<String>, error: serde_json::Error) -> Self {
        ProtocolError::UnexpectedPayload {
            context: context.into(),
            reason: error.to_string(),
        }
    }
}
