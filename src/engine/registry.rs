//! Explicit registration table of compiled tools.
//!
//! Readers take a snapshot through `ArcSwap` and never lock; registration copies
//! the table and publishes the new version atomically.

use crate::definition::{CompiledTool, DefinitionError};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Immutable view of the registered tools, in registration order.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    tools: Vec<Arc<CompiledTool>>,
    by_name: HashMap<String, usize>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&Arc<CompiledTool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn tools(&self) -> &[Arc<CompiledTool>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub struct ToolRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    write_lock: Mutex<()>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Register tools all-or-nothing: a duplicate name (within `tools` or against
    /// the table) rejects the whole batch.
    pub fn register_all(&self, tools: Vec<CompiledTool>) -> Result<(), DefinitionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot.load();

        let mut next_tools = current.tools.clone();
        let mut by_name = current.by_name.clone();
        for tool in tools {
            if by_name.contains_key(tool.name()) {
                return Err(DefinitionError::Duplicate {
                    kind: "tool".to_string(),
                    name: tool.name().to_string(),
                    hint: Some("Each tool name may be registered once per engine".to_string()),
                });
            }
            by_name.insert(tool.name().to_string(), next_tools.len());
            next_tools.push(Arc::new(tool));
        }

        self.snapshot.store(Arc::new(RegistrySnapshot {
            tools: next_tools,
            by_name,
        }));
        Ok(())
    }

    pub fn register(&self, tool: CompiledTool) -> Result<(), DefinitionError> {
        self.register_all(vec![tool])
    }

    pub fn get(&self, name: &str) -> Option<Arc<CompiledTool>> {
        self.snapshot.load().get(name).cloned()
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot
            .load()
            .tools
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<Value> {
        self.snapshot
            .load()
            .tools
            .iter()
            .map(|t| t.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{expression_tool, Output};

    fn tool(name: &str) -> CompiledTool {
        expression_tool(name, "test", ("a", "a"), vec![("x", Output::new("x"))]).unwrap()
    }

    #[test]
    fn test_register_and_lookup_in_order() {
        let registry = ToolRegistry::new();
        registry.register(tool("b")).unwrap();
        registry.register(tool("a")).unwrap();
        assert_eq!(registry.names(), vec!["b", "a"]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
        assert_eq!(registry.descriptors()[0]["function"], "b");
    }

    #[test]
    fn test_duplicate_batch_is_rejected_whole() {
        let registry = ToolRegistry::new();
        registry.register(tool("a")).unwrap();
        let err = registry.register_all(vec![tool("b"), tool("a")]).unwrap_err();
        assert!(matches!(err, DefinitionError::Duplicate { .. }));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_snapshot_is_stable_across_registration() {
        let registry = ToolRegistry::new();
        registry.register(tool("a")).unwrap();
        let before = registry.snapshot();
        registry.register(tool("b")).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }
}
