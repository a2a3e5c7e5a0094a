//! Tool definition error types

/// Errors raised while loading, validating or compiling a tool definition.
///
/// Every variant is fatal for the tool concerned: the tool is never registered.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("Failed to load tool definitions from {path}: {reason}{}", .hint.as_ref().map(|h| format!("\n Hint: {}", h)).unwrap_or_default())]
    LoadError {
        path: String,
        reason: String,
        hint: Option<String>,
    },

    #[error("Tool definition validation failed: {0}")]
    ValidationError(String),

    #[error("Schema mismatch at {path}: {message}{}", .hint.as_ref().map(|h| format!("\n Hint: {}", h)).unwrap_or_default())]
    SchemaMismatch {
        path: String,
        message: String,
        hint: Option<String>,
    },

    #[error("Duplicate {kind} '{name}'{}", .hint.as_ref().map(|h| format!("\n Hint: {}", h)).unwrap_or_default())]
    Duplicate {
        kind: String,
        name: String,
        hint: Option<String>,
    },

    #[error("Invalid pattern '{pattern}' at {path}: {reason}")]
    InvalidPattern {
        path: String,
        pattern: String,
        reason: String,
    },

    #[error("Invalid template at {path}: {reason}")]
    InvalidTemplate { path: String, reason: String },

    #[error("YAML syntax error: {0}")]
    YamlError(String),

    #[error("Internal definition error: {0}")]
    Internal(String),
}

impl DefinitionError {
    /// Attach an actionable hint to the error
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        let hint_val = Some(hint.into());
        match self {
            DefinitionError::LoadError { ref mut hint, .. } => *hint = hint_val,
            DefinitionError::SchemaMismatch { ref mut hint, .. } => *hint = hint_val,
            DefinitionError::Duplicate { ref mut hint, .. } => *hint = hint_val,
            _ => (),
        }
        self
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        DefinitionError::ValidationError(msg.into())
    }
}
