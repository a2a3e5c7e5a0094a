//! End-to-end webhook tools against a local mock server.

use datamap_runtime::definition::{DataMap, ForeachSpec, Output, ParamType};
use datamap_runtime::telemetry::InMemoryEventSink;
use datamap_runtime::{
    CompiledTool, DataMapEngine, EngineConfig, FailureKind, Invocation, InvocationEvent, Outcome,
};
use mockito::Matcher;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_max_retries(1)
        .with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
}

fn engine_with(config: EngineConfig, tools: Vec<CompiledTool>) -> (DataMapEngine, Arc<InMemoryEventSink>) {
    let sink = Arc::new(InMemoryEventSink::default());
    let engine = DataMapEngine::builder()
        .config(config)
        .event_sink(sink.clone())
        .tools(tools)
        .build()
        .unwrap();
    (engine, sink)
}

fn trivia_tool(base: &str, fallback: &str) -> CompiledTool {
    DataMap::new("get_trivia")
        .purpose("Get a trivia question")
        .enum_parameter(
            "category",
            ParamType::String,
            "Question category",
            true,
            ["math", "art", "history"],
        )
        .webhook("GET", format!("{}/v1/trivia?category=${{args.category}}", base))
        .header("X-Api-Key", "${global.api_key}")
        .output(Output::new(
            "Category ${response[0].category}: ${response[0].question} — ${response[0].answer}",
        ))
        .error_keys(["error"])
        .fallback_output(Output::new(fallback))
        .build()
        .unwrap()
}

fn attempts(sink: &InMemoryEventSink) -> usize {
    sink.events()
        .iter()
        .filter(|e| matches!(e, InvocationEvent::WebhookAttempt { .. }))
        .count()
}

#[tokio::test]
async fn test_trivia_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/trivia")
        .match_query(Matcher::UrlEncoded("category".into(), "math".into()))
        .match_header("x-api-key", "k-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"category":"Math","question":"Q","answer":"A"}]"#)
        .create_async()
        .await;

    let (engine, sink) = engine_with(test_config(), vec![trivia_tool(&server.url(), "Trivia is unavailable")]);
    let result = engine
        .invoke(
            &Invocation::new("get_trivia", json!({"category": "math"}))
                .with_global(json!({"api_key": "k-1"})),
        )
        .await;

    mock.assert_async().await;
    assert_eq!(result.response, "Category Math: Q — A");
    assert_eq!(result.outcome, Outcome::Webhook { index: 0, status: 200 });
    assert_eq!(attempts(&sink), 1);
}

#[tokio::test]
async fn test_error_key_on_success_status_uses_fallback() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/trivia")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"error": "quota exceeded"}"#)
        .create_async()
        .await;

    let (engine, _) = engine_with(
        test_config(),
        vec![trivia_tool(&server.url(), "Sorry: ${response.error}")],
    );
    let result = engine
        .invoke(&Invocation::new("get_trivia", json!({"category": "art"})))
        .await;

    assert_eq!(result.response, "Sorry: quota exceeded");
    assert_eq!(
        result.outcome,
        Outcome::Fallback {
            reason: FailureKind::ErrorKey("error".to_string())
        }
    );
}

#[tokio::test]
async fn test_server_error_is_retried_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/trivia")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("boom")
        .expect(2)
        .create_async()
        .await;

    let (engine, sink) = engine_with(test_config(), vec![trivia_tool(&server.url(), "Trivia is unavailable")]);
    let result = engine
        .invoke(&Invocation::new("get_trivia", json!({"category": "history"})))
        .await;

    mock.assert_async().await;
    assert_eq!(result.response, "Trivia is unavailable");
    assert_eq!(
        result.outcome,
        Outcome::Fallback {
            reason: FailureKind::UpstreamStatus(500)
        }
    );
    assert_eq!(attempts(&sink), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/trivia")
        .match_query(Matcher::Any)
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let (engine, _) = engine_with(test_config(), vec![trivia_tool(&server.url(), "Trivia is unavailable")]);
    let result = engine
        .invoke(&Invocation::new("get_trivia", json!({"category": "math"})))
        .await;

    mock.assert_async().await;
    assert_eq!(
        result.outcome,
        Outcome::Fallback {
            reason: FailureKind::UpstreamStatus(404)
        }
    );
}

#[tokio::test]
async fn test_timeout_uses_fallback() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept connections and never answer.
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = test_config()
        .with_timeout(Duration::from_millis(200))
        .with_max_retries(0);
    let (engine, _) = engine_with(
        config,
        vec![trivia_tool(&format!("http://{}", addr), "Trivia is unavailable")],
    );
    let result = engine
        .invoke(&Invocation::new("get_trivia", json!({"category": "math"})))
        .await;

    assert_eq!(result.response, "Trivia is unavailable");
    assert_eq!(
        result.outcome,
        Outcome::Fallback {
            reason: FailureKind::Timeout
        }
    );
    server.abort();
}

#[tokio::test]
async fn test_timeout_is_retried_then_falls_back() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    let config = test_config()
        .with_timeout(Duration::from_millis(150))
        .with_max_retries(2);
    let (engine, sink) = engine_with(
        config,
        vec![trivia_tool(&format!("http://{}", addr), "Trivia is unavailable")],
    );
    let result = engine
        .invoke(&Invocation::new("get_trivia", json!({"category": "math"})))
        .await;

    assert_eq!(result.response, "Trivia is unavailable");
    assert_eq!(
        result.outcome,
        Outcome::Fallback {
            reason: FailureKind::Timeout
        }
    );
    let numbers: Vec<u32> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            InvocationEvent::WebhookAttempt {
                attempt,
                http_status,
                ..
            } => {
                assert_eq!(*http_status, None);
                Some(*attempt)
            }
            _ => None,
        })
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
    server.abort();
}

#[tokio::test]
async fn test_connection_refused_uses_fallback() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let (engine, _) = engine_with(
        test_config().with_max_retries(0),
        vec![trivia_tool(&format!("http://{}", addr), "Trivia is unavailable")],
    );
    let result = engine
        .invoke(&Invocation::new("get_trivia", json!({"category": "math"})))
        .await;

    assert_eq!(result.response, "Trivia is unavailable");
    assert_eq!(
        result.outcome,
        Outcome::Fallback {
            reason: FailureKind::Transport
        }
    );
}

#[tokio::test]
async fn test_foreach_aggregates_items() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/search")
        .match_query(Matcher::UrlEncoded("q".into(), "cats".into()))
        .with_status(200)
        .with_body(r#"{"items": [{"name": "x"}, {"name": "y"}, {"name": "z"}]}"#)
        .create_async()
        .await;

    let tool = DataMap::new("search")
        .purpose("Search")
        .parameter("q", ParamType::String, "Query", true)
        .webhook("GET", format!("{}/search", server.url()))
        .params(json!({"q": "${args.q}"}))
        .foreach(ForeachSpec::new("items", "list", "${this.index}:${this.name};").with_max(2))
        .output(Output::new("${list}"))
        .build()
        .unwrap();

    let (engine, _) = engine_with(test_config(), vec![tool]);
    let result = engine.invoke(&Invocation::new("search", json!({"q": "cats"}))).await;
    assert_eq!(result.response, "0:x;1:y;");
}

#[tokio::test]
async fn test_post_json_and_form_bodies() {
    let mut server = mockito::Server::new_async().await;
    let json_mock = server
        .mock("POST", "/orders")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({"item": "pizza", "qty": "2"})))
        .with_status(201)
        .with_body(r#"{"id": "o-9"}"#)
        .create_async()
        .await;
    let form_mock = server
        .mock("POST", "/legacy")
        .match_body(Matcher::UrlEncoded("data".into(), r#"{"item":"pizza"}"#.into()))
        .with_status(200)
        .with_body(r#"{"ok": true}"#)
        .create_async()
        .await;

    let order = DataMap::new("order")
        .purpose("Place an order")
        .parameter("item", ParamType::String, "Item", true)
        .parameter("qty", ParamType::Integer, "Quantity", true)
        .webhook("POST", format!("{}/orders", server.url()))
        .params(json!({"item": "${args.item}", "qty": "${args.qty}"}))
        .output(Output::new("Order ${response.id} placed"))
        .build()
        .unwrap();
    let legacy = DataMap::new("legacy_order")
        .purpose("Place an order on the legacy endpoint")
        .parameter("item", ParamType::String, "Item", true)
        .webhook("POST", format!("{}/legacy", server.url()))
        .params(json!({"item": "${args.item}"}))
        .form_param("data")
        .output(Output::new("Legacy order accepted: ${response.ok}"))
        .build()
        .unwrap();

    let (engine, _) = engine_with(test_config(), vec![order, legacy]);
    let placed = engine
        .invoke(&Invocation::new("order", json!({"item": "pizza", "qty": 2})))
        .await;
    let accepted = engine
        .invoke(&Invocation::new("legacy_order", json!({"item": "pizza"})))
        .await;

    json_mock.assert_async().await;
    form_mock.assert_async().await;
    assert_eq!(placed.response, "Order o-9 placed");
    assert_eq!(placed.outcome, Outcome::Webhook { index: 0, status: 201 });
    assert_eq!(accepted.response, "Legacy order accepted: true");
}

#[tokio::test]
async fn test_second_webhook_runs_after_first_fails() {
    let mut server = mockito::Server::new_async().await;
    let primary = server
        .mock("GET", "/primary")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let backup = server
        .mock("GET", "/backup")
        .with_status(200)
        .with_body(r#"{"temp": 21}"#)
        .create_async()
        .await;

    let tool = DataMap::new("weather")
        .purpose("Current temperature")
        .webhook("GET", format!("{}/primary", server.url()))
        .output(Output::new("Primary says ${response.temp}"))
        .webhook("GET", format!("{}/backup", server.url()))
        .output(Output::new("Backup says ${response.temp}"))
        .build()
        .unwrap();

    let (engine, _) = engine_with(test_config(), vec![tool]);
    let result = engine.invoke(&Invocation::new("weather", json!({}))).await;

    primary.assert_async().await;
    backup.assert_async().await;
    assert_eq!(result.response, "Backup says 21");
    assert_eq!(result.outcome, Outcome::Webhook { index: 1, status: 200 });
}
