//! Definition validator using JSON Schema
//!
//! The schema is derived from [`ToolDocument`] itself, so the structural checks
//! can never drift from the types the compiler consumes.

use crate::definition::{DefinitionError, ToolDocument};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Structural validator run on raw documents before typed decoding.
pub struct DefinitionValidator {
    schema: JSONSchema,
}

impl DefinitionValidator {
    pub fn new() -> Result<Self, DefinitionError> {
        let schema_value = Self::schema_value()?;
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| DefinitionError::Internal(format!("Failed to compile schema: {}", e)))?;
        Ok(Self { schema })
    }

    /// The generated draft-07 schema for a single tool document.
    pub fn schema_value() -> Result<Value, DefinitionError> {
        let schema = schemars::schema_for!(ToolDocument);
        serde_json::to_value(&schema)
            .map_err(|e| DefinitionError::Internal(format!("Invalid JSON Schema: {}", e)))
    }

    /// Validate one raw document. Reports the first few violations with their
    /// instance paths.
    pub fn validate(&self, document: &Value) -> Result<(), DefinitionError> {
        let result = self.schema.validate(document);
        if let Err(errors) = result {
            let mut paths = Vec::new();
            let mut messages = Vec::new();
            for error in errors.take(5) {
                let path = error.instance_path.to_string();
                paths.push(if path.is_empty() { "/".to_string() } else { path });
                messages.push(error.to_string());
            }
            let name = document
                .get("function")
                .and_then(Value::as_str)
                .unwrap_or("<unnamed>");
            return Err(DefinitionError::SchemaMismatch {
                path: paths.join(", "),
                message: messages.join("; "),
                hint: Some(format!(
                    "Check the definition of tool '{}' against the descriptor format",
                    name
                )),
            });
        }
        Ok(())
    }
}
