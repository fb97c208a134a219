use serde::{Deserialize, Serialize};

/// A prediction input recorded by the server, as delivered by `streamLogs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsLogEventData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub model_path: String,
    #[serde(default)]
    pub model_identifier: String,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsLogEvent {
    pub timestamp: f64,
    pub data: DiagnosticsLogEventData,
}
