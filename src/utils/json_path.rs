//! Path lookup over JSON values for template references and response fields
//!
//! Supported forms:
//! - Nested object access (e.g., "response.data.title")
//! - Bracket indexing (e.g., "response[0].category", "items[2]")
//! - Dot indexing (e.g., "results.0.content")
//! - `.length` on arrays, strings and objects without a `length` key
//!
//! Lookups never evaluate anything: a path either names an existing value or
//! resolves to nothing.

use serde_json::Value;
use std::borrow::Cow;

/// Path mapper error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathMapperError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Path mapper for reading values out of JSON using dot/bracket notation
pub struct PathMapper;

impl PathMapper {
    /// Parse a path such as `response[0].items.2.name` into segments.
    ///
    /// Keys may contain ASCII letters, digits, `_` and `-`. A purely numeric dotted
    /// segment is an index.
    pub fn parse(path: &str) -> Result<Vec<Segment>, PathMapperError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(PathMapperError::InvalidPath("Empty path".to_string()));
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            if part.is_empty() {
                return Err(PathMapperError::InvalidPath(format!(
                    "Empty segment in '{}'",
                    path
                )));
            }

            // Key followed by zero or more "[n]" subscripts, e.g. "choices[0][1]"
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };

            if !key.is_empty() {
                if !key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(PathMapperError::InvalidPath(format!(
                        "Invalid characters in segment '{}'",
                        key
                    )));
                }
                if !segments.is_empty() && key.chars().all(|c| c.is_ascii_digit()) {
                    segments.push(Segment::Index(key.parse().map_err(|_| {
                        PathMapperError::InvalidPath(format!("Index out of range: {}", key))
                    })?));
                } else {
                    segments.push(Segment::Key(key.to_string()));
                }
            } else if segments.is_empty() {
                return Err(PathMapperError::InvalidPath(format!(
                    "Path must start with a name: '{}'",
                    path
                )));
            }

            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| {
                    PathMapperError::InvalidPath(format!("Unclosed '[' in '{}'", part))
                })?;
                let idx_str = &rest[1..close];
                let idx = idx_str.trim().parse::<usize>().map_err(|_| {
                    PathMapperError::InvalidPath(format!("Invalid index '{}'", idx_str))
                })?;
                segments.push(Segment::Index(idx));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(PathMapperError::InvalidPath(format!(
                        "Unexpected text after subscript in '{}'",
                        part
                    )));
                }
            }
        }

        Ok(segments)
    }

    /// Walk `segments` starting at `root`.
    ///
    /// A trailing `length` key yields the element count of an array, the character
    /// count of a string, or the key count of an object that has no `length` field.
    pub fn walk<'a>(root: &'a Value, segments: &[Segment]) -> Option<Cow<'a, Value>> {
        let mut current = root;
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            match segment {
                Segment::Key(key) => match current {
                    Value::Object(map) => match map.get(key) {
                        Some(v) => current = v,
                        None if is_last && key == "length" => {
                            return Some(Cow::Owned(Value::from(map.len())));
                        }
                        None => return None,
                    },
                    Value::Array(arr) if is_last && key == "length" => {
                        return Some(Cow::Owned(Value::from(arr.len())));
                    }
                    Value::String(s) if is_last && key == "length" => {
                        return Some(Cow::Owned(Value::from(s.chars().count())));
                    }
                    _ => return None,
                },
                Segment::Index(idx) => match current {
                    Value::Array(arr) => current = arr.get(*idx)?,
                    // Objects keyed by numbers ("0", "1") are common in loosely typed APIs
                    Value::Object(map) => current = map.get(&idx.to_string())?,
                    _ => return None,
                },
            }
        }
        Some(Cow::Borrowed(current))
    }

    /// Get value from JSON using a dot/bracket path. Invalid paths resolve to `None`.
    pub fn get_path<'a>(obj: &'a Value, path: &str) -> Option<Cow<'a, Value>> {
        let segments = Self::parse(path).ok()?;
        Self::walk(obj, &segments)
    }

    /// Get string value from path (converts non-strings to their JSON text)
    pub fn get_string(obj: &Value, path: &str) -> Option<String> {
        Self::get_path(obj, path).and_then(|v| Self::to_display_string(&v))
    }

    /// String form used when a value is substituted into text.
    ///
    /// `null` has no string form and behaves like an absent value.
    pub fn to_display_string(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => serde_json::to_string(other).ok(),
        }
    }

    /// Truthiness used by error keys and required-argument checks.
    pub fn is_truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }
}
