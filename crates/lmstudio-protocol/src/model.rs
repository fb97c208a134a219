use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ModelDomainType {
    Llm,
    Embedding,
}

/// Matches whichever loaded model currently satisfies every present field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<ModelDomainType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ModelQuery {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Default::default()
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: ModelDomainType) -> Self {
        self.domain = Some(domain);
        self
    }
}

impl From<&str> for ModelQuery {
    fn from(identifier: &str) -> Self {
        ModelQuery::identifier(identifier)
    }
}

impl From<String> for ModelQuery {
    fn from(identifier: String) -> Self {
        ModelQuery::identifier(identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ModelSpecifier {
    Query { query: ModelQuery },
    InstanceReference { instance_reference: String },
}

impl ModelSpecifier {
    pub fn query(query: ModelQuery) -> Self {
        ModelSpecifier::Query { query }
    }

    pub fn instance_reference(instance_reference: impl Into<String>) -> Self {
        ModelSpecifier::InstanceReference {
            instance_reference: instance_reference.into(),
        }
    }
}

impl From<ModelQuery> for ModelSpecifier {
    fn from(query: ModelQuery) -> Self {
        ModelSpecifier::query(query)
    }
}

/// Identity of a loaded model as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ModelDescriptor {
    #[new(into)]
    pub identifier: String,
    #[new(into)]
    pub path: String,
}

/// Result of `getModelInfo` with `throwIfNotFound: true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedModelInfo {
    pub instance_reference: String,
    pub descriptor: ModelDescriptor,
}

/// A model file present on the server's disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedModel {
    #[serde(rename = "type")]
    pub model_type: String,
    pub path: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_specifier_omits_missing_fields() {
        let specifier =
            ModelSpecifier::query(ModelQuery::identifier("m").with_domain(ModelDomainType::Llm));
        assert_eq!(
            serde_json::to_value(&specifier).unwrap(),
            json!({"type": "query", "query": {"domain": "llm", "identifier": "m"}})
        );
    }

    #[test]
    fn instance_reference_specifier_uses_camel_case() {
        let specifier = ModelSpecifier::instance_reference("i1");
        assert_eq!(
            serde_json::to_value(&specifier).unwrap(),
            json!({"type": "instanceReference", "instanceReference": "i1"})
        );
    }

    #[test]
    fn downloaded_model_decodes_optional_architecture() {
        let model: DownloadedModel = serde_json::from_value(json!({
            "type": "llm",
            "path": "pub/repo/file.gguf",
            "sizeBytes": 1024
        }))
        .unwrap();
        assert_eq!(model.model_type, "llm");
        assert_eq!(model.size_bytes, 1024);
        assert_eq!(model.architecture, None);
    }
}
