//! Response Projector
//!
//! Turns a parsed webhook response into the final output: error keys are checked,
//! an optional `foreach` aggregates an array into one string, and the output
//! templates are expanded against every active scope.
//!
//! Foreach items are bound to `this`, and their 0-based position to
//! `foreach.index`. Object items keep their own fields and gain `this.index` unless
//! they already carry one; scalar items are bound as `{"value": item, "index": i}`.

use crate::definition::{ForeachSpec, OutputSpec, WebhookSpec};
use crate::engine::FailureKind;
use crate::template::{self, scope, Scopes};
use crate::utils::json_path::PathMapper;
use serde::Serialize;
use serde_json::{json, Value};

/// An output with every template expanded.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RenderedOutput {
    pub response: String,
    pub action: Vec<Value>,
    pub post_process: bool,
}

impl RenderedOutput {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    /// Neither text nor actions.
    pub fn is_blank(&self) -> bool {
        self.response.trim().is_empty() && self.action.is_empty()
    }
}

/// Expand an output's response template and the string fields of its actions.
pub fn render_output(spec: &OutputSpec, scopes: &Scopes<'_>) -> RenderedOutput {
    RenderedOutput {
        response: template::expand(&spec.response, scopes),
        action: spec
            .action
            .iter()
            .map(|a| template::expand_value(a, scopes))
            .collect(),
        post_process: spec.post_process,
    }
}

/// Bind a parsed body as `response` (and as `array` when it is a top-level array).
pub fn bind_response(scopes: &mut Scopes<'_>, body: &Value) {
    if body.is_array() {
        scopes.bind(scope::ARRAY, body.clone());
    }
    scopes.bind(scope::RESPONSE, body.clone());
}

/// First error key whose value in `body` is truthy.
pub fn triggered_error_key<'k>(
    keys: impl IntoIterator<Item = &'k String>,
    body: &Value,
) -> Option<&'k str> {
    keys.into_iter()
        .find(|key| {
            PathMapper::get_path(body, key)
                .map(|v| PathMapper::is_truthy(&v))
                .unwrap_or(false)
        })
        .map(String::as_str)
}

/// Aggregate the array at `input_key` into one string.
///
/// Returns the text and the number of items processed. A missing or non-array
/// value counts as zero items.
pub fn run_foreach(spec: &ForeachSpec, body: &Value, scopes: &Scopes<'_>) -> (String, usize) {
    let Some(value) = PathMapper::get_path(body, &spec.input_key) else {
        return (String::new(), 0);
    };
    let Value::Array(items) = value.as_ref() else {
        return (String::new(), 0);
    };

    let limit = spec.max.unwrap_or(usize::MAX);
    let mut out = String::new();
    let mut count = 0;
    for (index, item) in items.iter().take(limit).enumerate() {
        let item_scope = scopes
            .child()
            .with(scope::THIS, bind_item(item, index))
            .with(scope::FOREACH, json!({ "index": index }));
        out.push_str(&template::expand(&spec.append, &item_scope));
        count += 1;
    }
    (out, count)
}

fn bind_item(item: &Value, index: usize) -> Value {
    match item {
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.entry("index").or_insert_with(|| json!(index));
            Value::Object(fields)
        }
        other => json!({"value": other, "index": index}),
    }
}

/// Projection of one webhook's successful response.
pub struct ResponseProjector<'a> {
    webhook: &'a WebhookSpec,
    global_error_keys: &'a [String],
}

impl<'a> ResponseProjector<'a> {
    pub fn new(webhook: &'a WebhookSpec, global_error_keys: &'a [String]) -> Self {
        Self {
            webhook,
            global_error_keys,
        }
    }

    /// Project `body` into the webhook's output. `scopes` must already have the
    /// response bound (see [`bind_response`]).
    pub fn project(&self, body: &Value, scopes: &Scopes<'_>) -> Result<RenderedOutput, FailureKind> {
        let keys = self.webhook.error_keys.iter().chain(self.global_error_keys);
        if let Some(key) = triggered_error_key(keys, body) {
            return Err(FailureKind::ErrorKey(key.to_string()));
        }

        let mut layer = scopes.child();
        if let Some(foreach) = &self.webhook.foreach {
            let (text, count) = run_foreach(foreach, body, scopes);
            tracing::trace!(
                input_key = %foreach.input_key,
                output_key = %foreach.output_key,
                items = count,
                "foreach projected"
            );
            if count == 0 && foreach.require_items {
                return Err(FailureKind::EmptyResults);
            }
            layer.bind(foreach.output_key.clone(), Value::String(text));
        }

        let output = self.webhook.output.as_ref().ok_or(FailureKind::InvalidRequest)?;
        Ok(render_output(output, &layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ForeachSpec;

    fn webhook(output: &str) -> WebhookSpec {
        let mut spec = WebhookSpec::new("GET", "https://api.example.com");
        spec.output = Some(OutputSpec::new(output));
        spec
    }

    fn scopes_with(body: &Value) -> Scopes<'static> {
        let mut scopes = Scopes::for_invocation(json!({"q": "cats"}), json!({}));
        bind_response(&mut scopes, body);
        scopes
    }

    #[test]
    fn test_foreach_zero_based_index() {
        let body = json!({"results": [{"content": "x"}, {"content": "y"}, {"content": "z"}]});
        let spec = ForeachSpec::new("results", "out", "${this.index}:${this.content};").with_max(2);
        let scopes = scopes_with(&body);
        assert_eq!(run_foreach(&spec, &body, &scopes), ("0:x;1:y;".to_string(), 2));
    }

    #[test]
    fn test_foreach_item_fields_win_and_scalars() {
        let body = json!({"a": [{"index": "own"}], "s": ["p", 7]});
        let scopes = scopes_with(&body);
        let spec = ForeachSpec::new("a", "out", "${this.index}");
        assert_eq!(run_foreach(&spec, &body, &scopes).0, "own");
        let spec = ForeachSpec::new("s", "out", "[${this.index}=${this.value}]");
        assert_eq!(run_foreach(&spec, &body, &scopes).0, "[0=p][1=7]");
    }

    #[test]
    fn test_foreach_position_ignores_item_index_field() {
        let body = json!({"items": [{"index": 7, "name": "x"}, {"name": "y"}]});
        let scopes = scopes_with(&body);
        let spec = ForeachSpec::new("items", "out", "${foreach.index}:${this.name};");
        assert_eq!(run_foreach(&spec, &body, &scopes).0, "0:x;1:y;");
        let spec = ForeachSpec::new("items", "out", "${this.index};");
        assert_eq!(run_foreach(&spec, &body, &scopes).0, "7;1;");
    }

    #[test]
    fn test_foreach_missing_or_not_array_is_empty() {
        let body = json!({"results": {"not": "an array"}});
        let scopes = scopes_with(&body);
        assert_eq!(
            run_foreach(&ForeachSpec::new("results", "o", "x"), &body, &scopes),
            (String::new(), 0)
        );
        assert_eq!(
            run_foreach(&ForeachSpec::new("absent.path", "o", "x"), &body, &scopes),
            (String::new(), 0)
        );
    }

    #[test]
    fn test_project_binds_output_key() {
        let body = json!({"results": [{"t": "a"}, {"t": "b"}]});
        let mut spec = webhook("Found ${count}: ${list} for ${args.q}");
        spec.foreach = Some(ForeachSpec::new("results", "list", "${this.t},"));
        spec.output = Some(OutputSpec::new("${response.results.length}: ${list} for ${args.q}"));
        let scopes = scopes_with(&body);
        let out = ResponseProjector::new(&spec, &[]).project(&body, &scopes).unwrap();
        assert_eq!(out.response, "2: a,b, for cats");
    }

    #[test]
    fn test_error_keys_mark_failure() {
        let body = json!({"error": "bad request", "meta": {"code": 0}});
        let mut spec = webhook("ok");
        spec.error_keys = vec!["meta.code".into()];
        let scopes = scopes_with(&body);
        assert!(ResponseProjector::new(&spec, &[]).project(&body, &scopes).is_ok());

        let global = vec!["error".to_string()];
        let err = ResponseProjector::new(&spec, &global)
            .project(&body, &scopes)
            .unwrap_err();
        assert_eq!(err, FailureKind::ErrorKey("error".into()));
    }

    #[test]
    fn test_require_items() {
        let body = json!({"results": []});
        let mut spec = webhook("${list}");
        spec.foreach = Some(ForeachSpec::new("results", "list", "${this.t}").with_require_items(true));
        let scopes = scopes_with(&body);
        assert_eq!(
            ResponseProjector::new(&spec, &[]).project(&body, &scopes).unwrap_err(),
            FailureKind::EmptyResults
        );

        spec.foreach = Some(ForeachSpec::new("results", "list", "${this.t}"));
        let out = ResponseProjector::new(&spec, &[]).project(&body, &scopes).unwrap();
        assert_eq!(out.response, "");
    }

    #[test]
    fn test_render_output_expands_actions() {
        let spec = OutputSpec::new("Playing ${args.q}")
            .with_action(json!({"playback_bg": {"file": "${args.q}.mp3", "wait": true}}));
        let scopes = Scopes::for_invocation(json!({"q": "song"}), json!({}));
        let out = render_output(&spec, &scopes);
        assert_eq!(out.response, "Playing song");
        assert_eq!(out.action[0], json!({"playback_bg": {"file": "song.mp3", "wait": true}}));
    }

    #[test]
    fn test_top_level_array_bound_as_array() {
        let body = json!([{"category": "Math"}]);
        let scopes = scopes_with(&body);
        assert_eq!(template::expand("${array[0].category}/${response.0.category}", &scopes), "Math/Math");
    }
}
