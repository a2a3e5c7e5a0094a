//! 模板展开：`${scope.path}` 引用的纯数据替换。
//!
//! # Template Expander
//!
//! Replaces `${scope.path}` references with values looked up in [`Scopes`].
//! A reference may carry a literal default: `${args.city || "London"}`.
//!
//! The expander performs path lookup and default substitution only. There is no
//! arithmetic, no function call and no nested evaluation, and substituted values
//! are never expanded again, so neither tool configuration nor caller-supplied
//! arguments can smuggle code through a template.
//!
//! | Input | Result |
//! |-------|--------|
//! | `Hello ${args.name}` | value of `args.name`, or empty |
//! | `${args.name \|\| "friend"}` | value, or `friend` when absent |
//! | `${response.items.length}` | element count |
//! | `no markers` | unchanged |

pub mod scope;

pub use scope::Scopes;

use crate::utils::json_path::PathMapper;
use serde_json::Value;
use std::borrow::Cow;

/// Strict-parse failure, reported when a definition is compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated '${{' starting at byte {0}")]
    Unterminated(usize),

    #[error("'{0}' is not a plain variable path")]
    NotAPath(String),

    #[error("malformed default literal: {0}")]
    BadDefault(String),
}

/// A parsed piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece<'t> {
    Literal(&'t str),
    Reference {
        path: &'t str,
        default: Option<Cow<'t, str>>,
    },
}

/// Raw token produced by the scanner.
enum Token<'t> {
    Text(&'t str),
    Marker { body: &'t str, start: usize },
    Unterminated { rest: &'t str, start: usize },
}

fn scan(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(found) = template[pos..].find("${") {
        let start = pos + found;
        if start > pos {
            tokens.push(Token::Text(&template[pos..start]));
        }

        let body_start = start + 2;
        match find_close(&template[body_start..]) {
            Some(len) => {
                tokens.push(Token::Marker {
                    body: &template[body_start..body_start + len],
                    start,
                });
                pos = body_start + len + 1;
            }
            None => {
                tokens.push(Token::Unterminated {
                    rest: &template[start..],
                    start,
                });
                return tokens;
            }
        }
    }

    if pos < template.len() {
        tokens.push(Token::Text(&template[pos..]));
    }
    tokens
}

/// Byte offset of the `}` closing a marker body, skipping quoted sections.
fn find_close(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '}' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Split a marker body into its path and optional raw default text.
fn split_default(body: &str) -> (&str, Option<&str>) {
    let mut quote: Option<char> = None;
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '|' && bytes.get(i + 1) == Some(&b'|') => {
                return (&body[..i], Some(&body[i + 2..]));
            }
            None => {}
        }
        i += 1;
    }
    (body, None)
}

/// Interpret default text: quoted literal (with `\` escapes) or trimmed bare text.
fn parse_default(raw: &str) -> Result<Cow<'_, str>, TemplateError> {
    let raw = raw.trim();
    let mut chars = raw.chars();
    let quote = match chars.next() {
        Some(q @ ('"' | '\'')) => q,
        _ => {
            if raw.contains("${") {
                return Err(TemplateError::BadDefault(
                    "nested references are not supported".to_string(),
                ));
            }
            return Ok(Cow::Borrowed(raw));
        }
    };

    let mut out = String::with_capacity(raw.len());
    let mut escaped = false;
    let mut closed = false;
    for c in chars {
        if closed {
            return Err(TemplateError::BadDefault(format!(
                "unexpected text after closing quote in {}",
                raw
            )));
        }
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            closed = true;
        } else {
            out.push(c);
        }
    }
    if !closed {
        return Err(TemplateError::BadDefault(format!("missing closing quote in {}", raw)));
    }
    Ok(Cow::Owned(out))
}

fn parse_marker(body: &str) -> Result<Piece<'_>, TemplateError> {
    let (path, default) = split_default(body);
    let path = path.trim();
    PathMapper::parse(path).map_err(|_| TemplateError::NotAPath(path.to_string()))?;
    let default = default.map(parse_default).transpose()?;
    Ok(Piece::Reference { path, default })
}

/// Template parsing entry points.
pub struct Template;

impl Template {
    /// Strictly parse a template; used to reject bad definitions at compile time.
    pub fn parse(template: &str) -> Result<Vec<Piece<'_>>, TemplateError> {
        scan(template)
            .into_iter()
            .map(|token| match token {
                Token::Text(t) => Ok(Piece::Literal(t)),
                Token::Marker { body, .. } => parse_marker(body),
                Token::Unterminated { start, .. } => Err(TemplateError::Unterminated(start)),
            })
            .collect()
    }

    /// Validate every string inside a JSON structure.
    pub fn validate_value(value: &Value) -> Result<(), TemplateError> {
        match value {
            Value::String(s) => Self::parse(s).map(|_| ()),
            Value::Array(items) => items.iter().try_for_each(Self::validate_value),
            Value::Object(map) => map.values().try_for_each(Self::validate_value),
            _ => Ok(()),
        }
    }

    /// Paths referenced by a template (strictly parsed pieces only).
    pub fn references(template: &str) -> Vec<&str> {
        scan(template)
            .into_iter()
            .filter_map(|token| match token {
                Token::Marker { body, .. } => match parse_marker(body) {
                    Ok(Piece::Reference { path, .. }) => Some(path),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// True when the text contains no `${` marker at all.
    pub fn is_plain(template: &str) -> bool {
        !template.contains("${")
    }
}

/// A URL substitution that would land as a `.` or `..` path segment. URL parsing
/// collapses such segments even when percent-encoded, so the URL is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("substitution at byte {offset} expands to a dot path segment")]
pub struct DotSegment {
    pub offset: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Verbatim,
    PathSegment,
    Query,
}

impl Encoding {
    /// Encoding of a URL substitution at byte `start`, given the literal template
    /// text that precedes it. A marker opening the template (the base URL) and
    /// markers inside the authority are kept verbatim.
    fn for_url(literal: &str, start: usize) -> Self {
        if literal.contains(|c: char| c == '?' || c == '#') {
            return Encoding::Query;
        }
        if start == 0 {
            return Encoding::Verbatim;
        }
        match literal.split_once("://") {
            Some((_, authority)) if !authority.contains('/') => Encoding::Verbatim,
            _ => Encoding::PathSegment,
        }
    }
}

/// Appends `text`; false when a path value consists only of dots.
fn encode_into(out: &mut String, text: &str, encoding: Encoding) -> bool {
    match encoding {
        Encoding::Verbatim => out.push_str(text),
        Encoding::PathSegment => {
            if !text.is_empty() && text.bytes().all(|b| b == b'.') {
                return false;
            }
            out.push_str(&urlencoding::encode(text));
        }
        Encoding::Query => out.extend(url::form_urlencoded::byte_serialize(text.as_bytes())),
    }
    true
}

fn expand_with(
    template: &str,
    scopes: &Scopes<'_>,
    url_mode: bool,
) -> (String, Option<DotSegment>) {
    if Template::is_plain(template) {
        return (template.to_string(), None);
    }

    let mut out = String::with_capacity(template.len());
    let mut literal = String::new();
    let mut rejected = None;

    for token in scan(template) {
        match token {
            Token::Text(text) => {
                out.push_str(text);
                if url_mode {
                    literal.push_str(text);
                }
            }
            Token::Unterminated { rest, .. } => out.push_str(rest),
            Token::Marker { body, start } => {
                let encoding = if url_mode {
                    Encoding::for_url(&literal, start)
                } else {
                    Encoding::Verbatim
                };
                let (path, default) = split_default(body);
                let resolved = PathMapper::parse(path.trim())
                    .ok()
                    .and_then(|segments| scopes.resolve(&segments))
                    .and_then(|v| PathMapper::to_display_string(&v));

                let text = match (resolved, default) {
                    (Some(value), _) => Some(Cow::Owned(value)),
                    // A malformed default falls back to its trimmed raw text.
                    (None, Some(raw)) => {
                        Some(parse_default(raw).unwrap_or_else(|_| Cow::Borrowed(raw.trim())))
                    }
                    (None, None) => {
                        tracing::trace!(template_offset = start, path = path.trim(), "template reference unresolved");
                        None
                    }
                };
                if let Some(text) = text {
                    if !encode_into(&mut out, &text, encoding) && rejected.is_none() {
                        rejected = Some(DotSegment { offset: start });
                    }
                }
            }
        }
    }
    (out, rejected)
}

/// Expand every `${...}` reference in `template`. Never fails.
pub fn expand(template: &str, scopes: &Scopes<'_>) -> String {
    expand_with(template, scopes, false).0
}

/// Expand a URL template. Substitutions in the path are encoded as a single
/// segment and those in the query string are form-encoded.
pub fn expand_url(template: &str, scopes: &Scopes<'_>) -> Result<String, DotSegment> {
    match expand_with(template, scopes, true) {
        (url, None) => Ok(url),
        (_, Some(rejected)) => Err(rejected),
    }
}

/// Recursively expand every string inside a JSON structure; keys are left alone.
pub fn expand_value(value: &Value, scopes: &Scopes<'_>) -> Value {
    match value {
        Value::String(s) => Value::String(expand(s, scopes)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, scopes)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, scopes)))
                .collect(),
        ),
        other => other.clone(),
    }
}
