//! Webhook Invoker
//!
//! Expands a [`WebhookSpec`] against the invocation scopes into a concrete request
//! and sends it with the bounded retry policy. Every failure is classified into a
//! [`FailureKind`]; nothing here is surfaced to the host as an error.
//!
//! | Method | `params` go to |
//! |--------|----------------|
//! | GET, DELETE | query string (values stringified) |
//! | POST, PUT, PATCH | JSON body, or one form field with `form_param` |

use crate::definition::WebhookSpec;
use crate::engine::FailureKind;
use crate::telemetry::{EventSink, InvocationEvent};
use crate::template::{self, scope, Scopes};
use crate::transport::{
    AttemptError, Decision, HttpTransport, PreparedRequest, RequestBody, RetryPolicy,
};
use crate::utils::json_path::PathMapper;
use reqwest::Method;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Parsed body of a successful call.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
    pub attempts: u32,
}

/// Classified failure, with the parsed body when the upstream sent one.
#[derive(Debug, Clone)]
pub struct WebhookFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub body: Option<Value>,
}

impl WebhookFailure {
    fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            status: None,
            body: None,
        }
    }
}

/// Where an attempt is reported.
pub struct CallSite<'a> {
    pub invocation_id: &'a str,
    pub tool: &'a str,
    pub webhook_index: usize,
    pub sink: &'a dyn EventSink,
}

pub struct WebhookInvoker {
    transport: Arc<HttpTransport>,
    policy: RetryPolicy,
}

impl WebhookInvoker {
    pub fn new(transport: Arc<HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// First `require_args` entry that is absent, null or empty.
    pub fn missing_argument<'w>(webhook: &'w WebhookSpec, args: &Value) -> Option<&'w str> {
        webhook
            .require_args
            .iter()
            .find(|name| match args.get(name.as_str()) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(Value::Array(a)) => a.is_empty(),
                Some(Value::Object(o)) => o.is_empty(),
                Some(_) => false,
            })
            .map(String::as_str)
    }

    /// Expand the webhook into a request. Fails with `InvalidRequest` when the expanded
    /// URL is not an absolute http(s) URL or a path value is a dot segment.
    pub fn prepare(webhook: &WebhookSpec, scopes: &Scopes<'_>) -> Result<PreparedRequest, FailureKind> {
        let url_text = template::expand_url(&webhook.url, scopes).map_err(|e| {
            debug!(error = %e, "webhook url refused");
            FailureKind::InvalidRequest
        })?;
        let mut url = Url::parse(url_text.trim()).map_err(|e| {
            debug!(error = %e, "expanded webhook url does not parse");
            FailureKind::InvalidRequest
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FailureKind::InvalidRequest);
        }

        let method = Method::from_bytes(webhook.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| FailureKind::InvalidRequest)?;

        let headers = webhook
            .headers
            .iter()
            .map(|(name, value)| (name.to_string(), template::expand(value, scopes)))
            .collect();

        let mut params = match &webhook.params {
            Some(raw @ Value::Object(_)) => match template::expand_value(raw, scopes) {
                Value::Object(expanded) => expanded,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        if webhook.input_args_as_params {
            if let Some(Value::Object(args)) = scopes.scope(scope::ARGS) {
                for (key, value) in args {
                    params.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        let has_params = webhook.params.is_some() || !params.is_empty();

        let body = if method == Method::GET || method == Method::DELETE {
            if !params.is_empty() {
                let mut query = url.query_pairs_mut();
                for (key, value) in &params {
                    if let Some(text) = PathMapper::to_display_string(value) {
                        query.append_pair(key, &text);
                    }
                }
            }
            RequestBody::Empty
        } else if let Some(field) = &webhook.form_param {
            RequestBody::Form(vec![(field.clone(), Value::Object(params).to_string())])
        } else if has_params {
            RequestBody::Json(Value::Object(params))
        } else {
            RequestBody::Empty
        };

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body,
        })
    }

    /// Run one webhook to completion, retries included.
    pub async fn invoke(
        &self,
        webhook: &WebhookSpec,
        scopes: &Scopes<'_>,
        site: &CallSite<'_>,
    ) -> Result<WebhookResponse, WebhookFailure> {
        let request = Self::prepare(webhook, scopes).map_err(WebhookFailure::new)?;

        let mut attempt: u32 = 0;
        loop {
            let result = self.transport.send(&request).await;
            let http_status = match &result {
                Ok(reply) => Some(reply.status),
                Err(AttemptError::Status { status, .. }) => Some(*status),
                Err(_) => None,
            };
            debug!(
                invocation_id = site.invocation_id,
                tool = site.tool,
                webhook_index = site.webhook_index,
                attempt = attempt + 1,
                http_status = ?http_status,
                method = %request.method,
                host = request.url.host_str().unwrap_or_default(),
                "webhook attempt"
            );
            let _ = site
                .sink
                .emit(InvocationEvent::WebhookAttempt {
                    invocation_id: site.invocation_id.to_string(),
                    webhook_index: site.webhook_index,
                    attempt: attempt + 1,
                    http_status,
                })
                .await;

            let error = match result {
                Ok(reply) => return parse_reply(reply.status, &reply.body, attempt + 1),
                Err(error) => error,
            };

            match self.policy.decide(&error, attempt) {
                Decision::Retry { delay } => {
                    warn!(
                        invocation_id = site.invocation_id,
                        tool = site.tool,
                        webhook_index = site.webhook_index,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "webhook attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Decision::GiveUp => return Err(classify_failure(error)),
            }
        }
    }
}

/// Structured (object or array) body, else `None`.
fn parse_structured(body: &[u8]) -> Option<Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

fn parse_reply(status: u16, body: &[u8], attempts: u32) -> Result<WebhookResponse, WebhookFailure> {
    match parse_structured(body) {
        Some(body) => Ok(WebhookResponse {
            status,
            body,
            attempts,
        }),
        None => Err(WebhookFailure {
            kind: FailureKind::UnparsableBody,
            status: Some(status),
            body: None,
        }),
    }
}

fn classify_failure(error: AttemptError) -> WebhookFailure {
    match error {
        AttemptError::Build(_) => WebhookFailure::new(FailureKind::InvalidRequest),
        AttemptError::Connect(_) | AttemptError::Body(_) => WebhookFailure::new(FailureKind::Transport),
        AttemptError::Timeout => WebhookFailure::new(FailureKind::Timeout),
        AttemptError::Status { status, body, .. } => WebhookFailure {
            kind: FailureKind::UpstreamStatus(status),
            status: Some(status),
            body: parse_structured(&body),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scopes() -> Scopes<'static> {
        Scopes::for_invocation(
            json!({"category": "science & nature", "limit": 3, "empty": ""}),
            json!({"api_key": "k-123"}),
        )
    }

    #[test]
    fn test_prepare_get_encodes_query() {
        let mut spec = WebhookSpec::new("GET", "https://api.example/v1/trivia?category=${args.category}");
        spec.headers.insert("X-Api-Key", "${global.api_key}".to_string());
        spec.params = Some(json!({"limit": "${args.limit}"}));
        let req = WebhookInvoker::prepare(&spec, &scopes()).unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(
            req.url.as_str(),
            "https://api.example/v1/trivia?category=science+%26+nature&limit=3"
        );
        assert_eq!(req.headers, vec![("X-Api-Key".to_string(), "k-123".to_string())]);
        assert_eq!(req.body, RequestBody::Empty);
    }

    #[test]
    fn test_prepare_post_bodies() {
        let mut spec = WebhookSpec::new("POST", "https://api.example/v1/search");
        spec.params = Some(json!({"q": "${args.category}", "nested": {"n": "${args.limit}"}}));
        let req = WebhookInvoker::prepare(&spec, &scopes()).unwrap();
        assert_eq!(
            req.body,
            RequestBody::Json(json!({"q": "science & nature", "nested": {"n": "3"}}))
        );

        spec.input_args_as_params = true;
        spec.params = Some(json!({"limit": "explicit"}));
        let req = WebhookInvoker::prepare(&spec, &scopes()).unwrap();
        match req.body {
            RequestBody::Json(body) => {
                assert_eq!(body["limit"], json!("explicit"));
                assert_eq!(body["category"], json!("science & nature"));
            }
            other => panic!("unexpected body {:?}", other),
        }

        spec.input_args_as_params = false;
        spec.form_param = Some("payload".into());
        spec.params = Some(json!({"a": "1"}));
        let req = WebhookInvoker::prepare(&spec, &scopes()).unwrap();
        assert_eq!(
            req.body,
            RequestBody::Form(vec![("payload".to_string(), r#"{"a":"1"}"#.to_string())])
        );
    }

    #[test]
    fn test_prepare_rejects_non_http_url() {
        let spec = WebhookSpec::new("GET", "${global.base}/path");
        assert_eq!(
            WebhookInvoker::prepare(&spec, &scopes()).unwrap_err(),
            FailureKind::InvalidRequest
        );
    }

    #[test]
    fn test_prepare_keeps_path_argument_in_its_segment() {
        let spec = WebhookSpec::new("GET", "https://api.example/v1/items/${args.id}");
        for id in ["../x?y#", "../../admin/delete?all=1#"] {
            let s = Scopes::for_invocation(json!({ "id": id }), Value::Null);
            let req = WebhookInvoker::prepare(&spec, &s).unwrap();
            let segments: Vec<&str> = req.url.path_segments().unwrap().collect();
            assert_eq!(segments.len(), 3);
            assert_eq!(segments[..2], ["v1", "items"]);
            assert_eq!(req.url.query(), None);
            assert_eq!(req.url.fragment(), None);
        }

        let s = Scopes::for_invocation(json!({"id": ".."}), Value::Null);
        assert_eq!(
            WebhookInvoker::prepare(&spec, &s).unwrap_err(),
            FailureKind::InvalidRequest
        );
    }

    #[test]
    fn test_missing_argument() {
        let args = json!({"category": "x", "empty": ""});
        let mut spec = WebhookSpec::new("GET", "https://a.example");
        spec.require_args = vec!["category".into()];
        assert_eq!(WebhookInvoker::missing_argument(&spec, &args), None);
        spec.require_args = vec!["category".into(), "empty".into()];
        assert_eq!(WebhookInvoker::missing_argument(&spec, &args), Some("empty"));
        spec.require_args = vec!["absent".into()];
        assert_eq!(WebhookInvoker::missing_argument(&spec, &args), Some("absent"));
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            classify_failure(AttemptError::Timeout).kind,
            FailureKind::Timeout
        );
        let failure = classify_failure(AttemptError::Status {
            status: 400,
            retry_after: None,
            body: br#"{"message": "bad"}"#.to_vec(),
        });
        assert_eq!(failure.kind, FailureKind::UpstreamStatus(400));
        assert_eq!(failure.body.unwrap()["message"], json!("bad"));

        assert!(parse_reply(200, b"plain text", 1).is_err());
        assert!(parse_reply(200, b"\"just a string\"", 1).is_err());
        assert!(parse_reply(200, b"[]", 1).is_ok());
    }
}
