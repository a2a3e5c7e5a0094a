use crate::definition::DefinitionError;
use crate::transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Where a setup error came from: the tool, the offending field and the component
/// that noticed it. Rendered after the message as `(tool: x, field: y, ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Tool the error belongs to, when there is one.
    pub tool: Option<String>,
    /// Dotted location inside a definition or config, e.g. `data_map.webhooks[0].url`.
    pub field_path: Option<String>,
    pub details: Option<String>,
    /// Component reporting the error, e.g. `engine_builder`.
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tool(tool: impl Into<String>) -> Self {
        Self {
            tool: Some(tool.into()),
            ..Self::default()
        }
    }

    pub fn with_field_path(self, path: impl Into<String>) -> Self {
        Self {
            field_path: Some(path.into()),
            ..self
        }
    }

    pub fn with_details(self, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..self
        }
    }

    pub fn with_source(self, source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..self
        }
    }

    fn is_empty(&self) -> bool {
        self.tool.is_none()
            && self.field_path.is_none()
            && self.details.is_none()
            && self.source.is_none()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let labelled = [
            ("tool", &self.tool),
            ("field", &self.field_path),
            ("details", &self.details),
            ("source", &self.source),
        ];
        let parts: Vec<String> = labelled
            .iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
            .collect();
        write!(f, " ({})", parts.join(", "))
    }
}

/// Unified error type for the DataMap runtime.
///
/// Only build-time and setup-time problems surface as `Error`. A failing tool
/// invocation is never an `Error`: it is classified as a
/// [`FailureKind`](crate::engine::FailureKind) and answered with fallback text.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Tool definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Engine configuration error: {message}{context}")]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Webhook transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// True for errors caused by a bad tool definition or engine setup.
    ///
    /// Callers registering tools treat these as hard failures and refuse to publish
    /// the tool.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Definition(_) | Error::Configuration { .. })
    }
}
