//! 遥测模块：调用生命周期事件的可插拔接收端。
//!
//! Invocation telemetry.
//!
//! The engine reports structured lifecycle events to an [`EventSink`] without
//! depending on any particular destination. Sink failures never affect an
//! invocation.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`InvocationEvent`] | Typed lifecycle event |
//! | [`EventSink`] | Trait for event destinations |
//! | [`NoopEventSink`] | Default sink (drops everything) |
//! | [`InMemoryEventSink`] | Bounded in-memory sink for tests |
//! | [`TracingEventSink`] | Forwards events to `tracing` |
//! | [`CompositeEventSink`] | Fan-out to several sinks |

use crate::engine::{FailureKind, InvocationState, Outcome};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

/// Lifecycle event of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InvocationEvent {
    Started {
        invocation_id: String,
        tool: String,
    },
    StateChanged {
        invocation_id: String,
        state: InvocationState,
    },
    ExpressionMatched {
        invocation_id: String,
        rule_index: usize,
    },
    ExpressionNoMatch {
        invocation_id: String,
    },
    WebhookAttempt {
        invocation_id: String,
        webhook_index: usize,
        attempt: u32,
        http_status: Option<u16>,
    },
    WebhookFailed {
        invocation_id: String,
        webhook_index: usize,
        failure: FailureKind,
    },
    Cancelled {
        invocation_id: String,
        tool: String,
    },
    Completed {
        invocation_id: String,
        tool: String,
        outcome: Outcome,
        duration_ms: u64,
    },
}

impl InvocationEvent {
    pub fn invocation_id(&self) -> &str {
        match self {
            InvocationEvent::Started { invocation_id, .. }
            | InvocationEvent::StateChanged { invocation_id, .. }
            | InvocationEvent::ExpressionMatched { invocation_id, .. }
            | InvocationEvent::ExpressionNoMatch { invocation_id }
            | InvocationEvent::WebhookAttempt { invocation_id, .. }
            | InvocationEvent::WebhookFailed { invocation_id, .. }
            | InvocationEvent::Cancelled { invocation_id, .. }
            | InvocationEvent::Completed { invocation_id, .. } => invocation_id,
        }
    }
}

/// Destination for invocation events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: InvocationEvent) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink that drops every event.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: InvocationEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

/// In-memory sink for testing. Keeps the most recent `max_events` events.
pub struct InMemoryEventSink {
    events: RwLock<VecDeque<InvocationEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max.max(1),
        }
    }

    pub fn events(&self) -> Vec<InvocationEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn events_for(&self, invocation_id: &str) -> Vec<InvocationEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.invocation_id() == invocation_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn emit(&self, event: InvocationEvent) -> Result<()> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}

/// Sink that logs every event through `tracing` at debug level (completion and
/// webhook failures at info/warn).
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: InvocationEvent) -> Result<()> {
        match &event {
            InvocationEvent::Completed {
                invocation_id,
                tool,
                outcome,
                duration_ms,
            } => tracing::info!(
                invocation_id = %invocation_id,
                tool = %tool,
                success = outcome.is_success(),
                outcome = ?outcome,
                duration_ms,
                "invocation completed"
            ),
            InvocationEvent::WebhookFailed {
                invocation_id,
                webhook_index,
                failure,
            } => tracing::warn!(
                invocation_id = %invocation_id,
                webhook_index,
                failure = %failure,
                "webhook failed"
            ),
            other => tracing::debug!(invocation_id = %other.invocation_id(), event = ?other, "invocation event"),
        }
        Ok(())
    }
}

/// Composite sink for multiple destinations.
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Default for CompositeEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn emit(&self, event: InvocationEvent) -> Result<()> {
        for s in &self.sinks {
            let _ = s.emit(event.clone()).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.close().await;
        }
        Ok(())
    }
}
