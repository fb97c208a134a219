//! Key-value configuration and the layered stack the server resolves.

use derive_new::new;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct KvConfigField {
    #[new(into)]
    pub key: String,
    pub value: Value,
}

/// Ordered list of `{key, value}` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, new)]
pub struct KvConfig {
    #[serde(default)]
    pub fields: Vec<KvConfigField>,
}

impl KvConfig {
    /// Builds a config from optional entries, dropping absent and `null` values.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<Value>)>,
        K: Into<String>,
    {
        let fields = entries
            .into_iter()
            .filter_map(|(key, value)| match value {
                None | Some(Value::Null) => None,
                Some(value) => Some(KvConfigField::new(key, value)),
            })
            .collect();
        Self { fields }
    }

    /// The fields as `from_entries` input.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<Value>)> + '_ {
        self.fields
            .iter()
            .map(|field| (field.key.as_str(), Some(field.value.clone())))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.key == key)
            .map(|field| &field.value)
    }

    /// Sets `key`, replacing an existing entry in place.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.fields.iter_mut().find(|field| field.key == key) {
            Some(field) => field.value = value,
            None => self.fields.push(KvConfigField::new(key, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Named scope of a config layer, in wire spelling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum KvConfigLayerName {
    CurrentlyLoaded,
    ApiOverride,
    ConversationSpecific,
    ConversationGlobal,
    HttpServerRequestOverride,
    CompleteModeFormatting,
    Instance,
    UserModelDefault,
    VirtualModel,
    ModelDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
#[serde(rename_all = "camelCase")]
pub struct KvConfigStackLayer {
    pub layer_name: KvConfigLayerName,
    pub config: KvConfig,
}

/// Higher precedence layers come first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, new)]
pub struct KvConfigStack {
    #[serde(default)]
    pub layers: Vec<KvConfigStackLayer>,
}

impl KvConfigStack {
    pub fn single(layer_name: KvConfigLayerName, config: KvConfig) -> Self {
        Self {
            layers: vec![KvConfigStackLayer::new(layer_name, config)],
        }
    }

    pub fn with_layer(mut self, layer_name: KvConfigLayerName, config: KvConfig) -> Self {
        self.layers.push(KvConfigStackLayer::new(layer_name, config));
        self
    }

    pub fn layer(&self, layer_name: KvConfigLayerName) -> Option<&KvConfig> {
        self.layers
            .iter()
            .find(|layer| layer.layer_name == layer_name)
            .map(|layer| &layer.config)
    }
}

/// Server representation of an "override vs. default" numeric setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, new)]
pub struct CheckboxValue<T> {
    pub checked: bool,
    pub value: T,
}

/// Wraps `value` as a checkbox. `unchecked` is the sentinel meaning "use the
/// server default"; it is encoded as `{checked: false, value: value_when_unchecked}`.
pub fn checkbox<T>(value: T, unchecked: T, value_when_unchecked: T) -> CheckboxValue<T>
where
    T: PartialEq,
{
    if value == unchecked {
        CheckboxValue::new(false, value_when_unchecked)
    } else {
        CheckboxValue::new(true, value)
    }
}

/// Same as [`checkbox`], returned as a JSON value ready for a [`KvConfig`] entry.
pub fn checkbox_value<T>(value: Option<T>, unchecked: T, value_when_unchecked: T) -> Option<Value>
where
    T: PartialEq + Serialize,
{
    value
        .map(|value| checkbox(value, unchecked, value_when_unchecked))
        .and_then(|checkbox| serde_json::to_value(checkbox).ok())
}

/// Serializes an optional entry, mapping `None` to an absent value.
pub(crate) fn entry<T: Serialize>(value: &Option<T>) -> Option<Value> {
    value.as_ref().and_then(|value| serde_json::to_value(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn from_entries_drops_absent_and_null_values() {
        let config = KvConfig::from_entries([
            ("a", Some(json!(1))),
            ("b", None),
            ("c", Some(Value::Null)),
            ("d", Some(json!("x"))),
        ]);
        assert_eq!(
            config,
            KvConfig::new(vec![
                KvConfigField::new("a", json!(1)),
                KvConfigField::new("d", json!("x")),
            ])
        );
    }

    #[test]
    fn set_replaces_existing_key_in_place() {
        let mut config = KvConfig::from_entries([("a", Some(json!(1))), ("b", Some(json!(2)))]);
        config.set("a", json!(3));
        config.set("c", json!(4));
        let keys: Vec<_> = config.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(config.get("a"), Some(&json!(3)));
    }

    #[test]
    fn layer_names_use_wire_spelling() {
        let names: Vec<String> = KvConfigLayerName::iter().map(|n| n.to_string()).collect();
        assert_eq!(
            names,
            [
                "currentlyLoaded",
                "apiOverride",
                "conversationSpecific",
                "conversationGlobal",
                "httpServerRequestOverride",
                "completeModeFormatting",
                "instance",
                "userModelDefault",
                "virtualModel",
                "modelDefault",
            ]
        );
        assert_eq!(
            serde_json::to_value(KvConfigLayerName::HttpServerRequestOverride).unwrap(),
            json!("httpServerRequestOverride")
        );
    }

    #[test]
    fn stack_serializes_layer_name_and_config() {
        let stack = KvConfigStack::single(
            KvConfigLayerName::ApiOverride,
            KvConfig::from_entries([("temperature", Some(json!(0.5)))]),
        );
        assert_eq!(
            serde_json::to_value(&stack).unwrap(),
            json!({"layers": [{"layerName": "apiOverride", "config": {"fields": [{"key": "temperature", "value": 0.5}]}}]})
        );
    }

    #[rstest]
    #[case(-1, json!({"checked": false, "value": 1}))]
    #[case(100, json!({"checked": true, "value": 100}))]
    #[case(0, json!({"checked": true, "value": 0}))]
    fn checkbox_wraps_integer_sentinel(#[case] input: i64, #[case] expected: Value) {
        assert_eq!(checkbox_value(Some(input), -1, 1), Some(expected));
    }

    #[rstest]
    #[case(1.0, json!({"checked": false, "value": 1.0}))]
    #[case(1.1, json!({"checked": true, "value": 1.1}))]
    fn checkbox_wraps_float_sentinel(#[case] input: f64, #[case] expected: Value) {
        assert_eq!(checkbox_value(Some(input), 1.0, 1.0), Some(expected));
    }

    #[test]
    fn checkbox_of_absent_value_is_absent() {
        assert_eq!(checkbox_value::<i64>(None, -1, 1), None);
    }
}
