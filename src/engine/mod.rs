//! 执行编排：表达式优先、Webhook 兜底、统一回退策略。
//!
//! # Execution Orchestrator
//!
//! Runs one invocation of a registered tool:
//!
//! ```text
//! Received -> MatchedExpression | InvokedWebhook -> Projected -> Completed
//! ```
//!
//! Expressions are evaluated first (no I/O). Only when none matches do the
//! webhooks run, in declaration order, until one succeeds. When every path fails
//! the tool's fallback output is rendered; when the tool has none the engine's
//! configured failure text is returned. An invocation therefore always produces a
//! non-empty response and never returns an error.
//!
//! Invocations share nothing mutable: each one builds its own scopes and drops
//! them when the result is produced, so any number may run concurrently.

mod builder;
mod invocation;
mod registry;

pub use builder::DataMapEngineBuilder;
pub use invocation::{
    CallContext, FailureKind, Invocation, InvocationResult, InvocationState, Outcome,
};
pub use registry::{RegistrySnapshot, ToolRegistry};

use crate::config::EngineConfig;
use crate::definition::{CompiledDataMap, CompiledTool, ToolCompiler, ToolDocument, ToolRuntime};
use crate::projector::{self, render_output, RenderedOutput, ResponseProjector};
use crate::telemetry::{EventSink, InvocationEvent};
use crate::template::{scope, Scopes};
use crate::webhook::{CallSite, WebhookInvoker};
use crate::Result;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) struct EngineInner {
    pub(crate) registry: ToolRegistry,
    pub(crate) invoker: WebhookInvoker,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) config: EngineConfig,
}

/// DataMap execution engine. Cheap to clone; clones share the tool table, the
/// HTTP connection pool and the event sink.
#[derive(Clone)]
pub struct DataMapEngine {
    inner: Arc<EngineInner>,
}

/// Last failure seen on the way to the fallback output.
struct Failure {
    kind: FailureKind,
    body: Option<Value>,
}

impl Failure {
    fn new(kind: FailureKind) -> Self {
        Self { kind, body: None }
    }
}

impl DataMapEngine {
    pub fn builder() -> DataMapEngineBuilder {
        DataMapEngineBuilder::new()
    }

    /// Engine with configuration from the environment and no tools.
    pub fn new() -> Result<Self> {
        DataMapEngineBuilder::new().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub fn register(&self, tool: CompiledTool) -> Result<()> {
        self.inner.registry.register(tool)?;
        Ok(())
    }

    /// Compile and register a raw document.
    pub fn register_document(&self, document: ToolDocument) -> Result<()> {
        let tool = ToolCompiler::compile(document)?;
        self.register(tool)
    }

    pub fn tool(&self, name: &str) -> Option<Arc<CompiledTool>> {
        self.inner.registry.get(name)
    }

    /// Descriptors of every registered tool, in registration order.
    pub fn descriptors(&self) -> Vec<Value> {
        self.inner.registry.descriptors()
    }

    /// Run one invocation to completion. Never fails.
    pub async fn invoke(&self, invocation: &Invocation) -> InvocationResult {
        let invocation_id = uuid::Uuid::new_v4().to_string();
        self.invoke_with_id(invocation, invocation_id).await
    }

    /// Like [`invoke`](Self::invoke), but abandons the invocation when `token` is
    /// cancelled. The in-flight request is dropped and `None` is returned.
    pub async fn invoke_cancellable(
        &self,
        invocation: &Invocation,
        token: CancellationToken,
    ) -> Option<InvocationResult> {
        let invocation_id = uuid::Uuid::new_v4().to_string();
        tokio::select! {
            _ = token.cancelled() => {
                info!(invocation_id = %invocation_id, tool = %invocation.tool_name, "invocation cancelled");
                self.emit(InvocationEvent::Cancelled {
                    invocation_id,
                    tool: invocation.tool_name.clone(),
                })
                .await;
                None
            }
            result = self.invoke_with_id(invocation, invocation_id.clone()) => Some(result),
        }
    }

    /// Run several invocations concurrently. Results keep the input order.
    pub async fn invoke_all(&self, invocations: &[Invocation]) -> Vec<InvocationResult> {
        join_all(invocations.iter().map(|inv| self.invoke(inv))).await
    }

    async fn emit(&self, event: InvocationEvent) {
        let _ = self.inner.sink.emit(event).await;
    }

    async fn transition(&self, invocation_id: &str, state: InvocationState) {
        self.emit(InvocationEvent::StateChanged {
            invocation_id: invocation_id.to_string(),
            state,
        })
        .await;
    }

    async fn invoke_with_id(&self, invocation: &Invocation, invocation_id: String) -> InvocationResult {
        let started = Instant::now();
        let tool_name = invocation.tool_name.as_str();
        self.emit(InvocationEvent::Started {
            invocation_id: invocation_id.clone(),
            tool: tool_name.to_string(),
        })
        .await;
        self.transition(&invocation_id, InvocationState::Received).await;

        let (output, outcome) = match self.inner.registry.get(tool_name) {
            None => {
                debug!(invocation_id = %invocation_id, tool = tool_name, "unknown tool");
                self.failed(FailureKind::UnknownTool)
            }
            Some(tool) => match tool.runtime() {
                ToolRuntime::LocalWebhook { .. } => self.failed(FailureKind::NotExecutable),
                ToolRuntime::DataMap(data_map) => {
                    let scopes = Scopes::for_invocation(
                        invocation.normalized_arguments(),
                        invocation.normalized_global(),
                    );
                    let run = self.run_data_map(tool_name, &invocation_id, data_map, &scopes);
                    match self.inner.config.invocation_deadline {
                        Some(deadline) => match tokio::time::timeout(deadline, run).await {
                            Ok(result) => result,
                            Err(_) => {
                                debug!(invocation_id = %invocation_id, tool = tool_name, "invocation deadline exceeded");
                                let result =
                                    self.fallback(data_map, &scopes, Failure::new(FailureKind::Timeout));
                                self.transition(&invocation_id, InvocationState::Projected).await;
                                result
                            }
                        },
                        None => run.await,
                    }
                }
            },
        };

        let output = self.ensure_presentable(output);
        self.transition(&invocation_id, InvocationState::Completed).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.emit(InvocationEvent::Completed {
            invocation_id: invocation_id.clone(),
            tool: tool_name.to_string(),
            outcome: outcome.clone(),
            duration_ms,
        })
        .await;
        debug!(
            invocation_id = %invocation_id,
            tool = tool_name,
            outcome = ?outcome,
            duration_ms,
            "invocation completed"
        );

        InvocationResult {
            invocation_id,
            tool: tool_name.to_string(),
            response: output.response,
            action: output.action,
            post_process: output.post_process,
            outcome,
            duration_ms,
        }
    }

    async fn run_data_map(
        &self,
        tool: &str,
        invocation_id: &str,
        data_map: &CompiledDataMap,
        scopes: &Scopes<'_>,
    ) -> (RenderedOutput, Outcome) {
        let mut last = Failure::new(FailureKind::NoMatch);

        if !data_map.matcher.is_empty() {
            if let Some(matched) = data_map.matcher.evaluate(scopes) {
                debug!(invocation_id, tool, rule_index = matched.index, "expression matched");
                self.emit(InvocationEvent::ExpressionMatched {
                    invocation_id: invocation_id.to_string(),
                    rule_index: matched.index,
                })
                .await;
                self.transition(invocation_id, InvocationState::MatchedExpression).await;
                let output = render_output(&matched.rule.rule.output, scopes);
                self.transition(invocation_id, InvocationState::Projected).await;
                return (output, Outcome::Expression { rule: matched.index });
            }

            self.emit(InvocationEvent::ExpressionNoMatch {
                invocation_id: invocation_id.to_string(),
            })
            .await;
            if !data_map.has_webhooks() {
                if let Some((index, rule)) = data_map.matcher.nomatch_default() {
                    if let Some(nomatch) = &rule.rule.nomatch_output {
                        let output = render_output(nomatch, scopes);
                        self.transition(invocation_id, InvocationState::Projected).await;
                        return (output, Outcome::NoMatchOutput { rule: index });
                    }
                }
            }
        }

        let args = scopes.scope(scope::ARGS).cloned().unwrap_or(Value::Null);
        let mut invoked = false;
        for (index, webhook) in data_map.webhooks.iter().enumerate() {
            if let Some(arg) = WebhookInvoker::missing_argument(webhook, &args) {
                debug!(invocation_id, tool, webhook_index = index, argument = arg, "webhook skipped, required argument missing");
                last = Failure::new(FailureKind::MissingArgs);
                self.report_webhook_failure(invocation_id, index, &last.kind).await;
                continue;
            }

            if !invoked {
                self.transition(invocation_id, InvocationState::InvokedWebhook).await;
                invoked = true;
            }

            let site = CallSite {
                invocation_id,
                tool,
                webhook_index: index,
                sink: self.inner.sink.as_ref(),
            };
            match self.inner.invoker.invoke(webhook, scopes, &site).await {
                Ok(response) => {
                    let mut layer = scopes.child();
                    projector::bind_response(&mut layer, &response.body);
                    match ResponseProjector::new(webhook, &data_map.error_keys)
                        .project(&response.body, &layer)
                    {
                        Ok(output) => {
                            self.transition(invocation_id, InvocationState::Projected).await;
                            return (
                                output,
                                Outcome::Webhook {
                                    index,
                                    status: response.status,
                                },
                            );
                        }
                        Err(kind) => {
                            self.report_webhook_failure(invocation_id, index, &kind).await;
                            last = Failure {
                                kind,
                                body: Some(response.body),
                            };
                        }
                    }
                }
                Err(failure) => {
                    self.report_webhook_failure(invocation_id, index, &failure.kind).await;
                    last = Failure {
                        kind: failure.kind,
                        body: failure.body,
                    };
                }
            }
        }

        let result = self.fallback(data_map, scopes, last);
        self.transition(invocation_id, InvocationState::Projected).await;
        result
    }

    async fn report_webhook_failure(&self, invocation_id: &str, webhook_index: usize, kind: &FailureKind) {
        self.emit(InvocationEvent::WebhookFailed {
            invocation_id: invocation_id.to_string(),
            webhook_index,
            failure: kind.clone(),
        })
        .await;
    }

    /// Render the tool's fallback output, with `response` bound when a body exists.
    fn fallback(
        &self,
        data_map: &CompiledDataMap,
        scopes: &Scopes<'_>,
        failure: Failure,
    ) -> (RenderedOutput, Outcome) {
        match &data_map.fallback_output {
            Some(spec) => {
                let mut layer = scopes.child();
                if let Some(body) = &failure.body {
                    projector::bind_response(&mut layer, body);
                }
                (
                    render_output(spec, &layer),
                    Outcome::Fallback {
                        reason: failure.kind,
                    },
                )
            }
            None => self.failed(failure.kind),
        }
    }

    fn failed(&self, reason: FailureKind) -> (RenderedOutput, Outcome) {
        (
            RenderedOutput::text(self.inner.config.failure_response.clone()),
            Outcome::Failed { reason },
        )
    }

    fn ensure_presentable(&self, output: RenderedOutput) -> RenderedOutput {
        if output.is_blank() {
            RenderedOutput {
                response: self.inner.config.failure_response.clone(),
                ..output
            }
        } else {
            output
        }
    }
}
