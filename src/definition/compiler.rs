//! Tool Definition Compiler
//!
//! Turns a [`ToolDocument`] into an immutable [`CompiledTool`]: parameters are checked,
//! every template is strictly parsed, every regex is compiled, and the descriptor the
//! host platform consumes is rendered once. Any failed check rejects the whole tool.

use crate::definition::types::{
    DataMapDocument, ExpressionRule, ForeachSpec, OutputSpec, ParamType, ToolDocument,
    WebhookSpec,
};
use crate::definition::DefinitionError;
use crate::matcher::{CompiledRule, PatternMatcher};
use crate::template::{scope, Template};
use crate::utils::json_path::{PathMapper, Segment};
use reqwest::header::HeaderName;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// HTTP methods a webhook may use.
pub const SUPPORTED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Names that a foreach `output_key` may not shadow.
const RESERVED_SCOPES: [&str; 7] = [
    scope::ARGS,
    scope::RESPONSE,
    scope::GLOBAL,
    scope::GLOBAL_DATA,
    scope::THIS,
    scope::ARRAY,
    scope::FOREACH,
];

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub enum_values: Option<Vec<Value>>,
}

/// Static identity and signature of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    /// Identifier of the skill instance that registered the tool, if any.
    pub instance_key: Option<String>,
}

impl ToolDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|p| p.required)
    }
}

/// Validated data-map runtime.
#[derive(Debug, Clone)]
pub struct CompiledDataMap {
    pub matcher: PatternMatcher,
    pub webhooks: Vec<WebhookSpec>,
    pub fallback_output: Option<OutputSpec>,
    pub error_keys: Vec<String>,
}

impl CompiledDataMap {
    pub fn has_webhooks(&self) -> bool {
        !self.webhooks.is_empty()
    }
}

/// How a tool executes.
#[derive(Debug, Clone)]
pub enum ToolRuntime {
    DataMap(CompiledDataMap),
    /// Executed by the host calling a locally hosted endpoint; not runnable here.
    LocalWebhook { url: String },
}

/// Immutable, shareable result of compilation.
#[derive(Debug, Clone)]
pub struct CompiledTool {
    definition: ToolDefinition,
    runtime: ToolRuntime,
    document: ToolDocument,
    descriptor: Value,
}

impl CompiledTool {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn runtime(&self) -> &ToolRuntime {
        &self.runtime
    }

    pub fn data_map(&self) -> Option<&CompiledDataMap> {
        match &self.runtime {
            ToolRuntime::DataMap(dm) => Some(dm),
            ToolRuntime::LocalWebhook { .. } => None,
        }
    }

    /// Normalised source document.
    pub fn document(&self) -> &ToolDocument {
        &self.document
    }

    /// Descriptor published to the host platform.
    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    /// Compact descriptor text; stable across calls and processes.
    pub fn descriptor_json(&self) -> String {
        self.descriptor.to_string()
    }
}

/// Definition compiler.
pub struct ToolCompiler;

impl ToolCompiler {
    pub fn compile(document: ToolDocument) -> Result<CompiledTool, DefinitionError> {
        Self::compile_with_instance_key(document, None)
    }

    pub fn compile_with_instance_key(
        mut document: ToolDocument,
        instance_key: Option<String>,
    ) -> Result<CompiledTool, DefinitionError> {
        let name = document.function.clone();
        if name.trim().is_empty() {
            return Err(DefinitionError::validation("tool name ('function') must not be empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DefinitionError::validation(format!(
                "tool name '{}' must not contain whitespace",
                name
            )));
        }

        if let Some(dm) = document.data_map.as_mut() {
            for webhook in dm.webhooks.iter_mut() {
                webhook.method = webhook.method.trim().to_ascii_uppercase();
            }
        }

        let parameters = compile_parameters(&document)?;

        let runtime = match (&document.data_map, &document.web_hook_url) {
            (Some(_), Some(_)) => {
                return Err(DefinitionError::validation(format!(
                    "tool '{}' declares both data_map and web_hook_url",
                    name
                )))
            }
            (None, None) => {
                return Err(DefinitionError::validation(format!(
                    "tool '{}' declares neither data_map nor web_hook_url",
                    name
                )))
            }
            (Some(dm), None) => ToolRuntime::DataMap(compile_data_map(&name, dm, &parameters)?),
            (None, Some(url)) => {
                check_url(url, "web_hook_url")?;
                ToolRuntime::LocalWebhook { url: url.clone() }
            }
        };

        let descriptor = serde_json::to_value(&document).map_err(|e| {
            DefinitionError::Internal(format!("failed to render descriptor for '{}': {}", name, e))
        })?;

        debug!(
            tool = %name,
            parameters = parameters.len(),
            local = matches!(runtime, ToolRuntime::LocalWebhook { .. }),
            "tool definition compiled"
        );

        Ok(CompiledTool {
            definition: ToolDefinition {
                name,
                description: document.description.clone(),
                parameters,
                instance_key,
            },
            runtime,
            document,
            descriptor,
        })
    }
}

fn compile_parameters(document: &ToolDocument) -> Result<Vec<ParameterSpec>, DefinitionError> {
    let schema = &document.parameters;
    if schema.schema_type != "object" {
        return Err(DefinitionError::validation(format!(
            "parameters.type of tool '{}' must be \"object\", found \"{}\"",
            document.function, schema.schema_type
        )));
    }

    if let Some(dup) = schema.properties.first_duplicate() {
        return Err(DefinitionError::Duplicate {
            kind: "parameter".to_string(),
            name: dup.to_string(),
            hint: Some(format!(
                "Parameter names of tool '{}' must be unique",
                document.function
            )),
        });
    }

    let mut seen_required = HashSet::new();
    for (i, name) in schema.required.iter().enumerate() {
        if schema.properties.get(name).is_none() {
            return Err(DefinitionError::validation(format!(
                "parameters.required[{}] names undeclared parameter '{}'",
                i, name
            )));
        }
        if !seen_required.insert(name.as_str()) {
            return Err(DefinitionError::Duplicate {
                kind: "required parameter".to_string(),
                name: name.clone(),
                hint: None,
            });
        }
    }

    let mut specs = Vec::with_capacity(schema.properties.len());
    for (name, property) in schema.properties.iter() {
        let path = format!("parameters.properties.{}", name);
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DefinitionError::validation(format!(
                "parameter name '{}' may only contain ASCII letters, digits, '_' and '-'",
                name
            )));
        }

        if let Some(values) = &property.enum_values {
            if values.is_empty() {
                return Err(DefinitionError::validation(format!(
                    "{}.enum must not be empty",
                    path
                )));
            }
            for (i, value) in values.iter().enumerate() {
                if !property.param_type.accepts(value) {
                    return Err(DefinitionError::validation(format!(
                        "{}.enum[{}] ({}) is not of type {}",
                        path, i, value, property.param_type
                    )));
                }
                if values[..i].contains(value) {
                    return Err(DefinitionError::Duplicate {
                        kind: "enum value".to_string(),
                        name: value.to_string(),
                        hint: Some(format!("Remove the repeated value from {}.enum", path)),
                    });
                }
            }
        }

        if let Some(default) = &property.default {
            if !property.param_type.accepts(default) {
                return Err(DefinitionError::validation(format!(
                    "{}.default ({}) is not of type {}",
                    path, default, property.param_type
                )));
            }
        }

        specs.push(ParameterSpec {
            name: name.to_string(),
            param_type: property.param_type,
            description: property.description.clone(),
            required: seen_required.contains(name),
            enum_values: property.enum_values.clone(),
        });
    }
    Ok(specs)
}

fn compile_data_map(
    tool: &str,
    data_map: &DataMapDocument,
    parameters: &[ParameterSpec],
) -> Result<CompiledDataMap, DefinitionError> {
    if data_map.expressions.is_empty() && data_map.webhooks.is_empty() {
        return Err(DefinitionError::validation(format!(
            "data_map of tool '{}' has neither expressions nor webhooks",
            tool
        )));
    }

    let mut rules = Vec::with_capacity(data_map.expressions.len());
    for (i, rule) in data_map.expressions.iter().enumerate() {
        let path = format!("data_map.expressions[{}]", i);
        check_expression(rule, &path)?;
        rules.push(CompiledRule::compile(rule.clone(), &format!("{}.pattern", path))?);
    }

    for (i, webhook) in data_map.webhooks.iter().enumerate() {
        check_webhook(webhook, &format!("data_map.webhooks[{}]", i), parameters)?;
    }

    if let Some(output) = &data_map.output {
        check_output(output, "data_map.output")?;
    }
    check_error_keys(&data_map.error_keys, "data_map.error_keys")?;

    lint_argument_references(tool, data_map, parameters);
    lint_enum_coverage(tool, &rules, data_map.webhooks.is_empty(), parameters);

    Ok(CompiledDataMap {
        matcher: PatternMatcher::new(rules),
        webhooks: data_map.webhooks.clone(),
        fallback_output: data_map.output.clone(),
        error_keys: data_map.error_keys.clone(),
    })
}

fn check_expression(rule: &ExpressionRule, path: &str) -> Result<(), DefinitionError> {
    if rule.string.trim().is_empty() {
        return Err(DefinitionError::validation(format!(
            "{}.string must not be empty",
            path
        )));
    }
    if rule.pattern.is_empty() {
        return Err(DefinitionError::validation(format!(
            "{}.pattern must not be empty",
            path
        )));
    }
    check_template(&rule.string, &format!("{}.string", path))?;
    check_output(&rule.output, &format!("{}.output", path))?;
    if let Some(nomatch) = &rule.nomatch_output {
        check_output(nomatch, &format!("{}.nomatch-output", path))?;
    }
    Ok(())
}

fn check_webhook(
    webhook: &WebhookSpec,
    path: &str,
    parameters: &[ParameterSpec],
) -> Result<(), DefinitionError> {
    check_url(&webhook.url, &format!("{}.url", path))?;

    if !SUPPORTED_METHODS.contains(&webhook.method.as_str()) {
        return Err(DefinitionError::validation(format!(
            "{}.method '{}' is not supported (expected one of {})",
            path,
            webhook.method,
            SUPPORTED_METHODS.join(", ")
        )));
    }

    let mut seen_headers = HashSet::new();
    for (name, value) in webhook.headers.iter() {
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            DefinitionError::validation(format!(
                "{}.headers: '{}' is not a valid header name",
                path, name
            ))
        })?;
        if !seen_headers.insert(name.to_ascii_lowercase()) {
            return Err(DefinitionError::Duplicate {
                kind: "header".to_string(),
                name: name.to_string(),
                hint: Some(format!("Header names in {} are case-insensitive", path)),
            });
        }
        check_template(value, &format!("{}.headers.{}", path, name))?;
    }

    if let Some(params) = &webhook.params {
        if !params.is_object() {
            return Err(DefinitionError::validation(format!(
                "{}.params must be an object",
                path
            )));
        }
        Template::validate_value(params).map_err(|e| DefinitionError::InvalidTemplate {
            path: format!("{}.params", path),
            reason: e.to_string(),
        })?;
    }

    if let Some(field) = &webhook.form_param {
        if field.trim().is_empty() {
            return Err(DefinitionError::validation(format!(
                "{}.form_param must not be empty",
                path
            )));
        }
    }

    for (i, arg) in webhook.require_args.iter().enumerate() {
        if !parameters.iter().any(|p| &p.name == arg) {
            return Err(DefinitionError::validation(format!(
                "{}.require_args[{}] names undeclared parameter '{}'",
                path, i, arg
            )));
        }
    }

    if let Some(foreach) = &webhook.foreach {
        check_foreach(foreach, &format!("{}.foreach", path))?;
    }

    match &webhook.output {
        Some(output) => check_output(output, &format!("{}.output", path))?,
        None => {
            return Err(DefinitionError::validation(format!(
                "{}.output is required",
                path
            )))
        }
    }

    check_error_keys(&webhook.error_keys, &format!("{}.error_keys", path))
}

fn check_foreach(foreach: &ForeachSpec, path: &str) -> Result<(), DefinitionError> {
    PathMapper::parse(&foreach.input_key).map_err(|e| {
        DefinitionError::validation(format!("{}.input_key: {}", path, e))
    })?;

    let key = foreach.output_key.as_str();
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DefinitionError::validation(format!(
            "{}.output_key '{}' must be a plain name",
            path, key
        )));
    }
    if RESERVED_SCOPES.contains(&key) {
        return Err(DefinitionError::validation(format!(
            "{}.output_key '{}' would shadow a built-in scope",
            path, key
        )));
    }

    if foreach.max == Some(0) {
        return Err(DefinitionError::validation(format!(
            "{}.max must be greater than zero",
            path
        )));
    }
    if foreach.append.is_empty() {
        return Err(DefinitionError::validation(format!(
            "{}.append must not be empty",
            path
        )));
    }
    check_template(&foreach.append, &format!("{}.append", path))
}

fn check_output(output: &OutputSpec, path: &str) -> Result<(), DefinitionError> {
    check_template(&output.response, &format!("{}.response", path))?;
    for (i, action) in output.action.iter().enumerate() {
        let action_path = format!("{}.action[{}]", path, i);
        if !action.is_object() {
            return Err(DefinitionError::validation(format!(
                "{} must be an object",
                action_path
            )));
        }
        Template::validate_value(action).map_err(|e| DefinitionError::InvalidTemplate {
            path: action_path,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn check_url(url: &str, path: &str) -> Result<(), DefinitionError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(DefinitionError::validation(format!("{} must not be empty", path)));
    }
    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://") || trimmed.starts_with("${"))
    {
        return Err(DefinitionError::validation(format!(
            "{} '{}' must start with http://, https:// or a template reference",
            path, url
        )));
    }
    check_template(url, path)
}

fn check_template(template: &str, path: &str) -> Result<(), DefinitionError> {
    Template::parse(template)
        .map(|_| ())
        .map_err(|e| DefinitionError::InvalidTemplate {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

fn check_error_keys(keys: &[String], path: &str) -> Result<(), DefinitionError> {
    for (i, key) in keys.iter().enumerate() {
        PathMapper::parse(key).map_err(|e| {
            DefinitionError::validation(format!("{}[{}]: {}", path, i, e))
        })?;
    }
    Ok(())
}

fn collect_strings<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Warn about `args.*` references to parameters the tool never declares.
fn lint_argument_references(tool: &str, data_map: &DataMapDocument, parameters: &[ParameterSpec]) {
    let Ok(tree) = serde_json::to_value(data_map) else {
        return;
    };
    let mut strings = Vec::new();
    collect_strings(&tree, &mut strings);

    let mut reported = HashSet::new();
    for reference in strings.into_iter().flat_map(Template::references) {
        let Ok(segments) = PathMapper::parse(reference) else {
            continue;
        };
        if let [Segment::Key(scope_name), Segment::Key(arg), ..] = segments.as_slice() {
            if scope_name == scope::ARGS
                && !parameters.iter().any(|p| &p.name == arg)
                && reported.insert(arg.clone())
            {
                warn!(tool, parameter = %arg, "template references an undeclared parameter");
            }
        }
    }
}

/// Mismatch between a parameter's published enum and the rules testing it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CoverageGap {
    /// Value no rule matches, in a tool without webhooks to fall through to.
    UnmatchedValue { parameter: String, value: String },
    /// Rule that matches none of the published values.
    UnreachableRule { parameter: String, pattern: String },
}

fn enum_coverage_gaps(
    rules: &[CompiledRule],
    no_webhooks: bool,
    parameters: &[ParameterSpec],
) -> Vec<CoverageGap> {
    let mut gaps = Vec::new();
    for parameter in parameters {
        let Some(values) = &parameter.enum_values else {
            continue;
        };
        let subject = format!("${{args.{}}}", parameter.name);
        let related: Vec<&CompiledRule> = rules
            .iter()
            .filter(|r| r.rule.string.trim() == subject)
            .collect();
        if related.is_empty() {
            continue;
        }

        let texts: Vec<String> = values
            .iter()
            .filter_map(PathMapper::to_display_string)
            .collect();

        if no_webhooks {
            for text in &texts {
                if !related.iter().any(|r| r.is_match(text)) {
                    gaps.push(CoverageGap::UnmatchedValue {
                        parameter: parameter.name.clone(),
                        value: text.clone(),
                    });
                }
            }
        }
        for rule in &related {
            if !texts.iter().any(|t| rule.is_match(t)) {
                gaps.push(CoverageGap::UnreachableRule {
                    parameter: parameter.name.clone(),
                    pattern: rule.rule.pattern.clone(),
                });
            }
        }
    }
    gaps
}

/// Warn when published enum values cannot reach any expression rule.
fn lint_enum_coverage(
    tool: &str,
    rules: &[CompiledRule],
    no_webhooks: bool,
    parameters: &[ParameterSpec],
) {
    for gap in enum_coverage_gaps(rules, no_webhooks, parameters) {
        match gap {
            CoverageGap::UnmatchedValue { parameter, value } => warn!(
                tool,
                parameter = %parameter,
                value = %value,
                "enum value matches no expression rule"
            ),
            CoverageGap::UnreachableRule { parameter, pattern } => warn!(
                tool,
                parameter = %parameter,
                pattern = %pattern,
                "expression rule matches no published enum value"
            ),
        }
    }
}
