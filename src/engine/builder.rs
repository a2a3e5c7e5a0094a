use crate::config::EngineConfig;
use crate::definition::{CompiledTool, ToolCompiler, ToolDocument};
use crate::engine::{DataMapEngine, EngineInner, ToolRegistry};
use crate::telemetry::EventSink;
use crate::transport::{HttpTransport, RetryPolicy};
use crate::webhook::WebhookInvoker;
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;

/// Builder for [`DataMapEngine`].
///
/// Tools added here are compiled and registered by [`build`](Self::build); any
/// definition error aborts the build.
pub struct DataMapEngineBuilder {
    config: Option<EngineConfig>,
    sink: Option<Arc<dyn EventSink>>,
    tools: Vec<CompiledTool>,
    documents: Vec<ToolDocument>,
}

impl DataMapEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            sink: None,
            tools: Vec::new(),
            documents: Vec::new(),
        }
    }

    /// Use this configuration instead of [`EngineConfig::from_env`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Inject an event sink. Events are dropped when none is set.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn tool(mut self, tool: CompiledTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = CompiledTool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Add a raw document, compiled at build time.
    pub fn document(mut self, document: ToolDocument) -> Self {
        self.documents.push(document);
        self
    }

    pub fn build(self) -> Result<DataMapEngine> {
        let config = self.config.unwrap_or_else(EngineConfig::from_env);
        if config.failure_response.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "failure_response must not be empty",
                ErrorContext::new()
                    .with_field_path("failure_response")
                    .with_source("engine_builder"),
            ));
        }

        let transport = HttpTransport::new(&config)?;
        let invoker = WebhookInvoker::new(Arc::new(transport), RetryPolicy::from_config(&config));

        let mut tools = self.tools;
        for document in self.documents {
            tools.push(ToolCompiler::compile(document)?);
        }
        let registry = ToolRegistry::new();
        registry.register_all(tools)?;

        tracing::debug!(
            tools = registry.len(),
            timeout_ms = config.timeout.as_millis() as u64,
            max_retries = config.max_retries,
            "datamap engine built"
        );

        Ok(DataMapEngine {
            inner: Arc::new(EngineInner {
                registry,
                invoker,
                sink: self.sink.unwrap_or_else(crate::telemetry::noop_sink),
                config,
            }),
        })
    }
}

impl Default for DataMapEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
