//! Invocation input and output types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Caller-scoped context supplied by the host platform. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallContext {
    /// Session variables, exposed as the `global` (and `global_data`) scope.
    #[serde(default)]
    pub global: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// One request to run a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub tool_name: String,
    pub arguments: Value,
    pub context: CallContext,
}

impl Invocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            context: CallContext::default(),
        }
    }

    pub fn with_global(mut self, global: Value) -> Self {
        self.context.global = global;
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.context.call_id = Some(call_id.into());
        self
    }

    /// Build an invocation from a host request body.
    ///
    /// Understands `{"function", "argument": {"parsed": [{...}], "raw": "..."},
    /// "global_data", "call_id"}` as well as a plain `"arguments"` object.
    pub fn from_host_request(request: &Value) -> Option<Self> {
        let tool_name = request.get("function")?.as_str()?.to_string();

        let arguments = match request.get("argument") {
            Some(Value::Object(argument)) => argument
                .get("parsed")
                .and_then(Value::as_array)
                .and_then(|parsed| parsed.first().cloned())
                .or_else(|| argument.get("raw").cloned())
                .unwrap_or_else(|| Value::Object(argument.clone())),
            Some(other) => other.clone(),
            None => request.get("arguments").cloned().unwrap_or(Value::Null),
        };

        let global = request
            .get("global_data")
            .or_else(|| request.get("global"))
            .cloned()
            .unwrap_or(Value::Null);

        Some(Self {
            tool_name,
            arguments,
            context: CallContext {
                global,
                call_id: request
                    .get("call_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
        })
    }

    /// Arguments as a JSON object. JSON text is parsed; anything that is not an
    /// object binds as an empty object.
    pub fn normalized_arguments(&self) -> Value {
        normalize_object(&self.arguments)
    }

    pub fn normalized_global(&self) -> Value {
        normalize_object(&self.context.global)
    }
}

fn normalize_object(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::Object(Map::new()),
        },
        _ => Value::Object(Map::new()),
    }
}

/// Classification of a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    /// The tool runs behind a locally hosted webhook.
    NotExecutable,
    MissingArgs,
    InvalidRequest,
    Transport,
    Timeout,
    UpstreamStatus(u16),
    UnparsableBody,
    /// An error key of the response was truthy.
    ErrorKey(String),
    EmptyResults,
    NoMatch,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::UnknownTool => f.write_str("unknown tool"),
            FailureKind::NotExecutable => f.write_str("tool is not executable by the engine"),
            FailureKind::MissingArgs => f.write_str("required arguments missing"),
            FailureKind::InvalidRequest => f.write_str("invalid request"),
            FailureKind::Transport => f.write_str("transport failure"),
            FailureKind::Timeout => f.write_str("timeout"),
            FailureKind::UpstreamStatus(status) => write!(f, "upstream status {}", status),
            FailureKind::UnparsableBody => f.write_str("unparsable response body"),
            FailureKind::ErrorKey(key) => write!(f, "error key '{}' set", key),
            FailureKind::EmptyResults => f.write_str("empty results"),
            FailureKind::NoMatch => f.write_str("no match"),
        }
    }
}

/// Which path produced the final output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Expression { rule: usize },
    NoMatchOutput { rule: usize },
    Webhook { index: usize, status: u16 },
    /// The tool's fallback output was used.
    Fallback { reason: FailureKind },
    /// Nothing usable was configured; the engine's failure text was returned.
    Failed { reason: FailureKind },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Expression { .. } | Outcome::NoMatchOutput { .. } | Outcome::Webhook { .. }
        )
    }

    pub fn failure(&self) -> Option<&FailureKind> {
        match self {
            Outcome::Fallback { reason } | Outcome::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Per-invocation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Received,
    MatchedExpression,
    InvokedWebhook,
    Projected,
    Completed,
}

/// Final result handed back to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    pub invocation_id: String,
    pub tool: String,
    pub response: String,
    pub action: Vec<Value>,
    pub post_process: bool,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

impl InvocationResult {
    /// Output in the host wire shape: `response`, then `action` when present, then
    /// `post_process` when set.
    pub fn to_host_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("response".to_string(), Value::String(self.response.clone()));
        if !self.action.is_empty() {
            out.insert("action".to_string(), Value::Array(self.action.clone()));
        }
        if self.post_process {
            out.insert("post_process".to_string(), Value::Bool(true));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_argument_normalisation() {
        let inv = Invocation::new("t", json!("{\"a\": 1}"));
        assert_eq!(inv.normalized_arguments(), json!({"a": 1}));
        let inv = Invocation::new("t", json!("not json"));
        assert_eq!(inv.normalized_arguments(), json!({}));
        let inv = Invocation::new("t", json!([1, 2]));
        assert_eq!(inv.normalized_arguments(), json!({}));
        assert_eq!(inv.normalized_global(), json!({}));
    }

    #[test]
    fn test_from_host_request() {
        let request = json!({
            "function": "get_weather",
            "argument": {"parsed": [{"location": "Paris"}], "raw": "{\"location\":\"Paris\"}"},
            "global_data": {"units": "metric"},
            "call_id": "c-1"
        });
        let inv = Invocation::from_host_request(&request).unwrap();
        assert_eq!(inv.tool_name, "get_weather");
        assert_eq!(inv.normalized_arguments(), json!({"location": "Paris"}));
        assert_eq!(inv.context.global, json!({"units": "metric"}));
        assert_eq!(inv.context.call_id.as_deref(), Some("c-1"));

        let raw_only = json!({"function": "f", "argument": {"raw": "{\"x\": 2}"}});
        let inv = Invocation::from_host_request(&raw_only).unwrap();
        assert_eq!(inv.normalized_arguments(), json!({"x": 2}));

        assert!(Invocation::from_host_request(&json!({"argument": {}})).is_none());
    }

    #[test]
    fn test_host_json_shape() {
        let mut result = InvocationResult {
            invocation_id: "id".into(),
            tool: "t".into(),
            response: "ok".into(),
            action: vec![],
            post_process: false,
            outcome: Outcome::Expression { rule: 0 },
            duration_ms: 1,
        };
        assert_eq!(result.to_host_json().to_string(), r#"{"response":"ok"}"#);
        result.action.push(json!({"stop": true}));
        result.post_process = true;
        assert_eq!(
            result.to_host_json().to_string(),
            r#"{"response":"ok","action":[{"stop":true}],"post_process":true}"#
        );
    }

    #[test]
    fn test_failure_kind_serialization() {
        assert_eq!(
            serde_json::to_value(FailureKind::UpstreamStatus(503)).unwrap(),
            json!({"kind": "upstream_status", "detail": 503})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Fallback { reason: FailureKind::Timeout }).unwrap(),
            json!({"type": "fallback", "reason": {"kind": "timeout"}})
        );
    }
}
