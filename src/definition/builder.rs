//! Fluent construction of data-map tools in code.
//!
//! ```rust
//! use datamap_runtime::definition::{DataMap, Output, ParamType};
//!
//! let tool = DataMap::new("get_weather")
//!     .purpose("Get the current weather")
//!     .parameter("location", ParamType::String, "City name", true)
//!     .webhook("GET", "https://api.example.com/weather?q=${args.location}")
//!     .output(Output::new("It is ${response.temp} degrees in ${args.location}"))
//!     .error_keys(["error"])
//!     .fallback_output(Output::new("Weather is unavailable right now"))
//!     .build()
//!     .unwrap();
//! assert_eq!(tool.name(), "get_weather");
//! ```

use crate::definition::types::{
    DataMapDocument, ExpressionRule, ForeachSpec, OutputSpec, ParamType, ParametersSchema,
    PropertySchema, ToolDocument, WebhookSpec,
};
use crate::definition::{CompiledTool, DefinitionError, ToolCompiler};
use serde_json::Value;

/// Builder for an [`OutputSpec`].
#[derive(Debug, Clone, Default)]
pub struct Output {
    spec: OutputSpec,
}

impl Output {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            spec: OutputSpec::new(response),
        }
    }

    /// Add an opaque host action.
    pub fn action(mut self, action: Value) -> Self {
        self.spec.action.push(action);
        self
    }

    pub fn post_process(mut self, enable: bool) -> Self {
        self.spec.post_process = enable;
        self
    }

    pub fn into_spec(self) -> OutputSpec {
        self.spec
    }
}

impl From<Output> for OutputSpec {
    fn from(output: Output) -> Self {
        output.spec
    }
}

/// Fluent builder producing a [`ToolDocument`] and compiling it.
///
/// Webhook-scoped setters (`header`, `params`, `foreach`, `output`, `error_keys`, ...)
/// apply to the most recently added webhook. Using one before any `webhook` call is
/// reported by [`DataMap::build`].
#[derive(Debug, Clone)]
pub struct DataMap {
    document: ToolDocument,
    instance_key: Option<String>,
    misuse: Option<String>,
}

impl DataMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            document: ToolDocument {
                function: name.into(),
                description: String::new(),
                parameters: ParametersSchema::default(),
                data_map: Some(DataMapDocument::default()),
                web_hook_url: None,
            },
            instance_key: None,
            misuse: None,
        }
    }

    /// Tool description shown to the model.
    pub fn purpose(mut self, description: impl Into<String>) -> Self {
        self.document.description = description.into();
        self
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        self.purpose(description)
    }

    pub fn parameter(
        self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.add_parameter(name.into(), param_type, description.into(), required, None)
    }

    pub fn enum_parameter<I, V>(
        self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
        values: I,
    ) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.add_parameter(
            name.into(),
            param_type,
            description.into(),
            required,
            Some(values),
        )
    }

    fn add_parameter(
        mut self,
        name: String,
        param_type: ParamType,
        description: String,
        required: bool,
        enum_values: Option<Vec<Value>>,
    ) -> Self {
        if required {
            self.document.parameters.required.push(name.clone());
        }
        // Pushed rather than inserted so repeated names reach the compiler.
        self.document.parameters.properties.0.push((
            name,
            PropertySchema {
                param_type,
                description,
                enum_values,
                items: None,
                default: None,
            },
        ));
        self
    }

    pub fn expression(
        self,
        string: impl Into<String>,
        pattern: impl Into<String>,
        output: impl Into<OutputSpec>,
    ) -> Self {
        self.push_expression(string.into(), pattern.into(), output.into(), None)
    }

    pub fn expression_with_nomatch(
        self,
        string: impl Into<String>,
        pattern: impl Into<String>,
        output: impl Into<OutputSpec>,
        nomatch_output: impl Into<OutputSpec>,
    ) -> Self {
        self.push_expression(
            string.into(),
            pattern.into(),
            output.into(),
            Some(nomatch_output.into()),
        )
    }

    fn push_expression(
        mut self,
        string: String,
        pattern: String,
        output: OutputSpec,
        nomatch_output: Option<OutputSpec>,
    ) -> Self {
        if let Some(dm) = self.document.data_map.as_mut() {
            dm.expressions.push(ExpressionRule {
                string,
                pattern,
                output,
                nomatch_output,
            });
        }
        self
    }

    /// Start a new webhook; subsequent webhook setters configure it.
    pub fn webhook(mut self, method: impl Into<String>, url: impl Into<String>) -> Self {
        if let Some(dm) = self.document.data_map.as_mut() {
            dm.webhooks.push(WebhookSpec::new(method, url));
        }
        self
    }

    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        self.with_webhook("header", |w| w.headers.0.push((name, value)))
    }

    pub fn params(self, params: Value) -> Self {
        self.with_webhook("params", |w| w.params = Some(params))
    }

    pub fn form_param(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.with_webhook("form_param", |w| w.form_param = Some(field))
    }

    pub fn input_args_as_params(self, enable: bool) -> Self {
        self.with_webhook("input_args_as_params", |w| w.input_args_as_params = enable)
    }

    pub fn require_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        self.with_webhook("require_args", |w| w.require_args = args)
    }

    pub fn foreach(self, foreach: ForeachSpec) -> Self {
        self.with_webhook("foreach", |w| w.foreach = Some(foreach))
    }

    pub fn output(self, output: impl Into<OutputSpec>) -> Self {
        let output = output.into();
        self.with_webhook("output", |w| w.output = Some(output))
    }

    /// Error keys of the current webhook.
    pub fn error_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.with_webhook("error_keys", |w| w.error_keys = keys)
    }

    /// Error keys applied to every webhook response.
    pub fn global_error_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(dm) = self.document.data_map.as_mut() {
            dm.error_keys = keys.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn fallback_output(mut self, output: impl Into<OutputSpec>) -> Self {
        if let Some(dm) = self.document.data_map.as_mut() {
            dm.output = Some(output.into());
        }
        self
    }

    pub fn instance_key(mut self, key: impl Into<String>) -> Self {
        self.instance_key = Some(key.into());
        self
    }

    fn with_webhook(mut self, setter: &str, apply: impl FnOnce(&mut WebhookSpec)) -> Self {
        match self
            .document
            .data_map
            .as_mut()
            .and_then(|dm| dm.webhooks.last_mut())
        {
            Some(webhook) => apply(webhook),
            None => {
                if self.misuse.is_none() {
                    self.misuse = Some(format!(
                        "'{}' was set on tool '{}' before any webhook was added",
                        setter, self.document.function
                    ));
                }
            }
        }
        self
    }

    /// The document this builder would compile.
    pub fn to_document(&self) -> ToolDocument {
        self.document.clone()
    }

    pub fn build(self) -> Result<CompiledTool, DefinitionError> {
        if let Some(message) = self.misuse {
            return Err(DefinitionError::validation(message));
        }
        ToolCompiler::compile_with_instance_key(self.document, self.instance_key)
    }
}

/// Build a single-webhook tool.
///
/// `parameters` are `(name, description, required)` string parameters.
pub fn simple_api_tool(
    name: &str,
    purpose: &str,
    parameters: &[(&str, &str, bool)],
    method: &str,
    url: &str,
    response: &str,
    error_keys: &[&str],
) -> Result<CompiledTool, DefinitionError> {
    let mut builder = DataMap::new(name).purpose(purpose);
    for (param, description, required) in parameters {
        builder = builder.parameter(*param, ParamType::String, *description, *required);
    }
    builder
        .webhook(method, url)
        .output(Output::new(response))
        .error_keys(error_keys.iter().copied())
        .build()
}

/// Build an expression-only tool switching on one string parameter.
///
/// Each rule is `(pattern, output)` and is tested against `${args.<parameter>}` in
/// the given order.
pub fn expression_tool(
    name: &str,
    purpose: &str,
    parameter: (&str, &str),
    rules: Vec<(&str, Output)>,
) -> Result<CompiledTool, DefinitionError> {
    let (param, description) = parameter;
    let subject = format!("${{args.{}}}", param);
    let mut builder = DataMap::new(name)
        .purpose(purpose)
        .parameter(param, ParamType::String, description, true);
    for (pattern, output) in rules {
        builder = builder.expression(subject.clone(), pattern, output);
    }
    builder.build()
}
