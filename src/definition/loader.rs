//! Tool definition loader for JSON and YAML documents on the local file system.
//!
//! A file may hold one document, a list of documents, or `{"functions": [...]}`.
//! Every document is structurally validated before it is decoded and compiled.

use crate::definition::types::DocumentSet;
use crate::definition::{CompiledTool, DefinitionError, DefinitionValidator, ToolCompiler, ToolDocument};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Source format of a definition document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Format implied by a file extension; `None` for unknown extensions.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Some(DocumentFormat::Json),
            Some("yaml") | Some("yml") => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }
}

/// Loads, validates and compiles tool definitions.
pub struct ToolLoader {
    base_path: Option<PathBuf>,
    validator: DefinitionValidator,
}

impl ToolLoader {
    pub fn new() -> Result<Self, DefinitionError> {
        Ok(Self {
            base_path: None,
            validator: DefinitionValidator::new()?,
        })
    }

    /// Resolve relative paths against this directory.
    pub fn with_base_path(mut self, path: impl AsRef<Path>) -> Self {
        self.base_path = Some(path.as_ref().to_path_buf());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Parse and validate documents from text.
    pub fn parse_str(
        &self,
        content: &str,
        format: DocumentFormat,
    ) -> Result<Vec<ToolDocument>, DefinitionError> {
        let raw: Value = match format {
            DocumentFormat::Json => serde_json::from_str(content)
                .map_err(|e| DefinitionError::validation(format!("invalid JSON: {}", e)))?,
            DocumentFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| DefinitionError::YamlError(e.to_string()))?,
        };

        let raw_documents: Vec<&Value> = match &raw {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => match map.get("functions") {
                Some(Value::Array(items)) if !map.contains_key("function") => items.iter().collect(),
                _ => vec![&raw],
            },
            _ => {
                return Err(DefinitionError::validation(
                    "a definition file must hold an object or a list of objects",
                ))
            }
        };
        for document in &raw_documents {
            self.validator.validate(document)?;
        }

        // Decoded from the text again so repeated keys survive for the compiler.
        let set: DocumentSet = match format {
            DocumentFormat::Json => serde_json::from_str(content)
                .map_err(|e| DefinitionError::validation(format!("invalid document: {}", e)))?,
            DocumentFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| DefinitionError::YamlError(e.to_string()))?,
        };
        Ok(set.into_documents())
    }

    /// Load and validate every document in one file.
    pub async fn load_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<ToolDocument>, DefinitionError> {
        let path = self.resolve(path.as_ref());
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| {
                DefinitionError::LoadError {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                    hint: None,
                }
                .with_hint("Check that the file exists and is readable")
            })?;

        let format = DocumentFormat::from_path(&path);
        let result = match format {
            Some(format) => self.parse_str(&content, format),
            // Unknown extension: JSON first, then YAML (a superset).
            None => self
                .parse_str(&content, DocumentFormat::Json)
                .or_else(|_| self.parse_str(&content, DocumentFormat::Yaml)),
        };

        result.map_err(|e| match e {
            DefinitionError::LoadError { .. } => e,
            other => {
                let error = DefinitionError::LoadError {
                    path: path.display().to_string(),
                    reason: other.to_string(),
                    hint: None,
                };
                if format.is_none() {
                    error.with_hint("Name the file .json, .yaml or .yml to pick its format")
                } else {
                    error
                }
            }
        })
    }

    /// Load every `.json`, `.yaml` and `.yml` file of a directory, in file-name order.
    pub async fn load_dir(
        &self,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<ToolDocument>, DefinitionError> {
        let dir = self.resolve(dir.as_ref());
        let load_error = |reason: String| DefinitionError::LoadError {
            path: dir.display().to_string(),
            reason,
            hint: None,
        };

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| load_error(e.to_string()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| load_error(e.to_string()))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && DocumentFormat::from_path(&path).is_some() {
                files.push(path);
            }
        }
        files.sort();

        let mut documents = Vec::new();
        for file in files {
            documents.extend(self.load_file(&file).await?);
        }
        tracing::debug!(dir = %dir.display(), documents = documents.len(), "tool definitions loaded");
        Ok(documents)
    }

    /// Load a file or directory and compile every document in it.
    pub async fn compile_path(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<CompiledTool>, DefinitionError> {
        let resolved = self.resolve(path.as_ref());
        let documents = if tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            self.load_dir(&resolved).await?
        } else {
            self.load_file(&resolved).await?
        };
        documents.into_iter().map(ToolCompiler::compile).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/tools.YML")),
            Some(DocumentFormat::Yaml)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("tools.json")),
            Some(DocumentFormat::Json)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_parse_yaml_list() {
        let loader = ToolLoader::new().unwrap();
        let yaml = r#"
- function: stop
  purpose: Stop playback
  data_map:
    expressions:
      - string: "${args.action}"
        pattern: "/^stop$/i"
        output:
          response: Stopped
- function: ping
  web_hook_url: https://agent.example/swaig
"#;
        let docs = loader.parse_str(yaml, DocumentFormat::Yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].description, "Stop playback");
        assert!(docs[1].web_hook_url.is_some());
    }

    #[test]
    fn test_parse_functions_wrapper_and_schema_errors() {
        let loader = ToolLoader::new().unwrap();
        let json = r#"{"functions": [{"function": "a", "web_hook_url": "https://x.example"}]}"#;
        assert_eq!(loader.parse_str(json, DocumentFormat::Json).unwrap().len(), 1);

        let bad = r#"{"function": "a", "data_map": {"webhooks": "nope"}}"#;
        let err = loader.parse_str(bad, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, DefinitionError::SchemaMismatch { .. }));

        assert!(loader.parse_str("[1, 2]", DocumentFormat::Json).is_err());
        assert!(loader.parse_str("42", DocumentFormat::Json).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_load_error() {
        let loader = ToolLoader::new().unwrap();
        let err = loader.load_file("/definitely/not/here.yaml").await.unwrap_err();
        assert!(matches!(err, DefinitionError::LoadError { hint: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_unknown_extension_error_carries_hint() {
        let path = std::env::temp_dir().join(format!("datamap-{}.def", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "function: [unclosed").await.unwrap();
        let err = ToolLoader::new().unwrap().load_file(&path).await.unwrap_err();
        let _ = tokio::fs::remove_file(&path).await;

        match &err {
            DefinitionError::LoadError { hint: Some(hint), .. } => assert!(hint.contains(".yaml")),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("Hint: Name the file"));
    }
}
