use lmstudio_protocol::{KvConfig, ModelDescriptor, ModelSpecifier};
use serde_json::{Map, Value, json};

use crate::error::LmStudioError;
use crate::port::{ClientPort, WeakPort, decode_result};

/// A set of requirements for a model rather than a particular model.
///
/// Every call resolves the specifier on the server, so the model behind a
/// handle can change as models are loaded and unloaded.
#[derive(Debug, Clone)]
pub struct DynamicHandle {
    port: WeakPort,
    specifier: ModelSpecifier,
}

impl DynamicHandle {
    pub(crate) fn new(port: WeakPort, specifier: ModelSpecifier) -> Self {
        Self { port, specifier }
    }

    pub fn specifier(&self) -> &ModelSpecifier {
        &self.specifier
    }

    pub(crate) fn try_upgrade(&self) -> Result<ClientPort, LmStudioError> {
        self.port.upgrade()
    }

    /// Runs an RPC whose parameter is `{specifier, ..extra}`.
    pub(crate) fn call(
        &self,
        endpoint: &str,
        extra: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Result<Value, LmStudioError> {
        let mut parameter = Map::new();
        parameter.insert("specifier".to_string(), json!(self.specifier));
        parameter.extend(extra.into_iter().map(|(key, value)| (key.to_string(), value)));
        self.try_upgrade()?
            .call_rpc(endpoint, Some(Value::Object(parameter)))
    }

    /// Descriptor of the model currently matching this handle, if any is loaded.
    pub fn get_model_info(&self) -> Result<Option<ModelDescriptor>, LmStudioError> {
        let result = self.call("getModelInfo", [("throwIfNotFound", json!(false))])?;
        let descriptor = match result {
            Value::Object(mut map) => map.remove("descriptor"),
            _ => None,
        };
        match descriptor {
            None | Some(Value::Null) => Ok(None),
            Some(descriptor) => decode_result("getModelInfo", descriptor).map(Some),
        }
    }

    /// Effective load config of the model currently matching this handle.
    pub fn get_load_config(&self) -> Result<KvConfig, LmStudioError> {
        let result = self.call("getLoadConfig", std::iter::empty())?;
        decode_result("getLoadConfig", result)
    }

    pub(crate) fn load_config_u64(&self, key: &str) -> Result<Option<u64>, LmStudioError> {
        Ok(self.get_load_config()?.get(key).and_then(Value::as_u64))
    }
}

/// A domain-specific wrapper around a [`DynamicHandle`].
pub trait DomainHandle: Clone + Send + Sync + 'static {
    fn from_dynamic(handle: DynamicHandle) -> Self;
}

impl DomainHandle for DynamicHandle {
    fn from_dynamic(handle: DynamicHandle) -> Self {
        handle
    }
}
