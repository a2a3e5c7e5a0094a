//! Tool definition document types.
//!
//! These types are both the input format read by the loader/builder and the
//! descriptor format published to the host platform. Field order, omission rules
//! and key names are part of the host compatibility surface.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

fn is_false(b: &bool) -> bool {
    !*b
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_object_type() -> String {
    "object".to_string()
}

/// String-keyed map that keeps declaration order and duplicate keys.
///
/// Duplicates survive deserialization so that the compiler can reject them instead
/// of silently keeping the last entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Replace the value of an existing key or append a new entry.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// First key that appears more than once.
    pub fn first_duplicate(&self) -> Option<&str> {
        self.0
            .iter()
            .enumerate()
            .find(|(i, (k, _))| self.0[..*i].iter().any(|(prev, _)| prev == k))
            .map(|(_, (k, _))| k.as_str())
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map with string keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

impl<V: JsonSchema> JsonSchema for OrderedMap<V> {
    fn schema_name() -> String {
        format!("Map_of_{}", V::schema_name())
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <BTreeMap<String, V>>::json_schema(gen)
    }

    fn is_referenceable() -> bool {
        false
    }
}

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    /// Whether `value` is an instance of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of `parameters.properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// JSON-schema-like parameter block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParametersSchema {
    #[serde(rename = "type", default = "default_object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: OrderedMap<PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Default for ParametersSchema {
    fn default() -> Self {
        Self {
            schema_type: default_object_type(),
            properties: OrderedMap::new(),
            required: Vec::new(),
        }
    }
}

/// Final output of a tool: response text plus opaque host actions.
///
/// `actions` are passed through to the host untouched apart from template
/// expansion of their string fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct OutputSpec {
    /// Response template.
    pub response: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub post_process: bool,
}

impl OutputSpec {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            action: Vec::new(),
            post_process: false,
        }
    }

    /// Append a host action, e.g. `json!({"playback_bg": {"file": "${args.file}"}})`.
    pub fn with_action(mut self, action: Value) -> Self {
        self.action.push(action);
        self
    }

    pub fn with_post_process(mut self, enable: bool) -> Self {
        self.post_process = enable;
        self
    }
}

/// Turns a response array into one aggregated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ForeachSpec {
    /// Dotted path of the array inside the response.
    pub input_key: String,
    /// Top-level name the aggregated string is bound to.
    pub output_key: String,
    /// Maximum number of items processed; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    /// Item template, expanded once per item with `this` bound.
    pub append: String,
    /// Treat an empty projection as a failed call.
    #[serde(default, skip_serializing_if = "is_false")]
    pub require_items: bool,
}

impl ForeachSpec {
    pub fn new(
        input_key: impl Into<String>,
        output_key: impl Into<String>,
        append: impl Into<String>,
    ) -> Self {
        Self {
            input_key: input_key.into(),
            output_key: output_key.into(),
            max: None,
            append: append.into(),
            require_items: false,
        }
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_require_items(mut self, enable: bool) -> Self {
        self.require_items = enable;
        self
    }
}

/// One declarative HTTP call.
///
/// `url`, header values and every string inside `params` may contain template
/// references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WebhookSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub headers: OrderedMap<String>,
    /// Request body (JSON, or query string for GET/DELETE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Send the params as JSON text inside this single form field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_param: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub input_args_as_params: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<ForeachSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_keys: Vec<String>,
}

impl WebhookSpec {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: OrderedMap::new(),
            params: None,
            form_param: None,
            input_args_as_params: false,
            require_args: Vec::new(),
            foreach: None,
            output: None,
            error_keys: Vec::new(),
        }
    }
}

/// Regex-to-output rule evaluated without any I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionRule {
    /// Subject template, e.g. `${args.action}`.
    pub string: String,
    /// Plain regex or `/regex/flags`.
    pub pattern: String,
    pub output: OutputSpec,
    #[serde(
        rename = "nomatch-output",
        alias = "nomatch_output",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub nomatch_output: Option<OutputSpec>,
}

/// The `data_map` block of a descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DataMapDocument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<ExpressionRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhooks: Vec<WebhookSpec>,
    /// Fallback output, used when the primary path fails.
    #[serde(default, alias = "fallback_output", skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
    /// Error keys applied to every webhook response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_keys: Vec<String>,
}

/// A complete tool descriptor document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolDocument {
    pub function: String,
    #[serde(default, alias = "purpose")]
    pub description: String,
    #[serde(default)]
    pub parameters: ParametersSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_map: Option<DataMapDocument>,
    /// Locally hosted webhook endpoint, for tools the host calls directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_hook_url: Option<String>,
}

/// Accepted shapes of a definition file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum DocumentSet {
    Functions { functions: Vec<ToolDocument> },
    List(Vec<ToolDocument>),
    Single(Box<ToolDocument>),
}

impl DocumentSet {
    pub(crate) fn into_documents(self) -> Vec<ToolDocument> {
        match self {
            DocumentSet::Functions { functions } => functions,
            DocumentSet::List(list) => list,
            DocumentSet::Single(doc) => vec![*doc],
        }
    }
}
