//! Layered variable scopes consulted during template expansion.

use crate::utils::json_path::{PathMapper, Segment};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Scope holding the invocation arguments.
pub const ARGS: &str = "args";
/// Scope holding the parsed webhook response.
pub const RESPONSE: &str = "response";
/// Scope holding caller-scoped (session) variables.
pub const GLOBAL: &str = "global";
/// Alias of [`GLOBAL`] kept for definitions written against the wire names.
pub const GLOBAL_DATA: &str = "global_data";
/// Scope bound to the current item during a foreach projection.
pub const THIS: &str = "this";
/// Scope bound to a top-level array response.
pub const ARRAY: &str = "array";
/// Scope holding the position of the current foreach item, as `foreach.index`.
pub const FOREACH: &str = "foreach";

/// A set of named scopes, optionally layered over a parent set.
///
/// Lookups check the innermost layer first, so a foreach item scope can add
/// `this` without copying the invocation scopes. Each invocation builds its own
/// root set and drops it when the result is produced.
#[derive(Debug, Default)]
pub struct Scopes<'p> {
    vars: Map<String, Value>,
    parent: Option<&'p Scopes<'p>>,
}

impl Scopes<'static> {
    pub fn new() -> Self {
        Self {
            vars: Map::new(),
            parent: None,
        }
    }

    /// Root scopes for one invocation: `args` plus `global` (and its alias).
    pub fn for_invocation(args: Value, global: Value) -> Self {
        let mut scopes = Self::new();
        scopes.bind(ARGS, args);
        scopes.bind(GLOBAL_DATA, global.clone());
        scopes.bind(GLOBAL, global);
        scopes
    }
}

impl<'p> Scopes<'p> {
    /// New empty layer on top of `self`.
    pub fn child(&self) -> Scopes<'_> {
        Scopes {
            vars: Map::new(),
            parent: Some(self),
        }
    }

    /// Bind (or shadow) a top-level name in this layer.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bind(name, value);
        self
    }

    /// Look a top-level name up through the layers.
    pub fn scope(&self, name: &str) -> Option<&Value> {
        match self.vars.get(name) {
            Some(v) => Some(v),
            None => self.parent.and_then(|p| p.scope(name)),
        }
    }

    /// Resolve parsed path segments; the first segment names the scope.
    pub fn resolve(&self, segments: &[Segment]) -> Option<Cow<'_, Value>> {
        let (first, rest) = segments.split_first()?;
        let root = match first {
            Segment::Key(name) => self.scope(name)?,
            Segment::Index(_) => return None,
        };
        PathMapper::walk(root, rest)
    }

    /// Resolve a textual path such as `response[0].title`.
    pub fn resolve_path(&self, path: &str) -> Option<Cow<'_, Value>> {
        let segments = PathMapper::parse(path).ok()?;
        self.resolve(&segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_shadows_parent() {
        let root = Scopes::for_invocation(json!({"q": "cats"}), json!({"key": "k1"}));
        let mut child = root.child();
        child.bind(THIS, json!({"title": "t", "index": 0}));
        child.bind(ARGS, json!({"q": "dogs"}));

        assert_eq!(child.resolve_path("this.title").unwrap().as_ref(), &json!("t"));
        assert_eq!(child.resolve_path("args.q").unwrap().as_ref(), &json!("dogs"));
        assert_eq!(child.resolve_path("global.key").unwrap().as_ref(), &json!("k1"));
        assert_eq!(
            child.resolve_path("global_data.key").unwrap().as_ref(),
            &json!("k1")
        );
        // The parent is untouched.
        assert_eq!(root.resolve_path("args.q").unwrap().as_ref(), &json!("cats"));
        assert!(root.resolve_path("this.title").is_none());
    }

    #[test]
    fn test_unknown_scope_resolves_to_none() {
        let root = Scopes::new();
        assert!(root.resolve_path("nothing.here").is_none());
        assert!(root.resolve_path("").is_none());
    }
}
