//! Pattern Matcher
//!
//! Evaluates an ordered list of expression rules against expanded subject strings.
//! Every regex is compiled once, when the tool definition is compiled; evaluation is
//! a plain unanchored search and the first matching rule wins.

use crate::definition::{DefinitionError, ExpressionRule};
use crate::template::{self, Scopes};
use regex::{Regex, RegexBuilder};

/// Maximum compiled size of a single pattern. Patterns come from configuration,
/// but a runaway pattern should still fail at compile time rather than at call time.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Compile a pattern in plain (`start.*`) or slash (`/^stop$/i`) form.
///
/// Slash-form flags: `i` case-insensitive, `m` multi-line, `s` dot matches newline,
/// `x` ignore whitespace.
pub fn compile_pattern(pattern: &str) -> Result<Regex, String> {
    let (body, flags) = split_slash_form(pattern).unwrap_or((pattern, ""));

    let mut builder = RegexBuilder::new(body);
    builder.size_limit(PATTERN_SIZE_LIMIT);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => return Err(format!("unsupported regex flag '{}'", other)),
        };
    }
    builder.build().map_err(|e| e.to_string())
}

/// `/body/flags` -> (body, flags). Only treated as slash form when the text after the
/// last `/` is all ASCII letters.
fn split_slash_form(pattern: &str) -> Option<(&str, &str)> {
    let inner = pattern.strip_prefix('/')?;
    let last = inner.rfind('/')?;
    let flags = &inner[last + 1..];
    if flags.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((&inner[..last], flags))
    } else {
        None
    }
}

/// An expression rule with its compiled regex.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ExpressionRule,
    regex: Regex,
}

impl CompiledRule {
    pub fn compile(rule: ExpressionRule, field_path: &str) -> Result<Self, DefinitionError> {
        let regex =
            compile_pattern(&rule.pattern).map_err(|reason| DefinitionError::InvalidPattern {
                path: field_path.to_string(),
                pattern: rule.pattern.clone(),
                reason,
            })?;
        Ok(Self { rule, regex })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Test the rule against an already expanded subject.
    pub fn is_match(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }
}

/// A matched rule together with the subject it matched.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'m> {
    pub index: usize,
    pub rule: &'m CompiledRule,
}

/// Ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    rules: Vec<CompiledRule>,
}

impl PatternMatcher {
    pub fn new(rules: Vec<CompiledRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule, in declaration order, whose expanded subject matches.
    pub fn evaluate(&self, scopes: &Scopes<'_>) -> Option<RuleMatch<'_>> {
        self.rules.iter().enumerate().find_map(|(index, rule)| {
            let subject = template::expand(&rule.rule.string, scopes);
            let matched = rule.is_match(&subject);
            tracing::trace!(rule_index = index, matched, "expression rule tested");
            matched.then_some(RuleMatch { index, rule })
        })
    }

    /// First rule carrying a `nomatch-output`, used as the matcher's default.
    pub fn nomatch_default(&self) -> Option<(usize, &CompiledRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.rule.nomatch_output.is_some())
    }
}
