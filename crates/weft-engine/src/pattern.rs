//! Name patterns used by advice declarations
//!
//! * `/.../` - the inner text is a regular expression that must match the
//!   whole name
//! * `a|b*` - alternation of literal segments, each of which may use `*`
//! * `get*` - literal text where `*` matches any run of characters
//! * anything else - exact match

use crate::error::{DeclarationError, DeclarationResult};
use regex::Regex;
use std::fmt;

/// A compiled name pattern
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact string comparison
    Exact(String),
    /// Anchored regular expression
    Regex {
        /// Text the pattern was built from
        source: String,
        /// Compiled expression, anchored at both ends
        regex: Regex,
    },
}

impl Pattern {
    /// Whether `name` matches
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Exact(text) => text == name,
            Pattern::Regex { regex, .. } => regex.is_match(name),
        }
    }

    /// Text the pattern was built from
    pub fn source(&self) -> &str {
        match self {
            Pattern::Exact(text) => text,
            Pattern::Regex { source, .. } => source,
        }
    }

    /// Whether the pattern is a plain literal
    pub fn is_exact(&self) -> bool {
        matches!(self, Pattern::Exact(_))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.is_exact() == other.is_exact() && self.source() == other.source()
    }
}

/// Compile a pattern
pub fn build_pattern(text: &str) -> DeclarationResult<Pattern> {
    if text.len() >= 2 && text.starts_with('/') && text.ends_with('/') {
        let inner = &text[1..text.len() - 1];
        return compile(text, &format!("^(?:{})$", inner));
    }
    if text.contains('|') {
        let alternatives: Vec<String> = text.split('|').map(|part| wildcard(part.trim())).collect();
        return compile(text, &format!("^(?:{})$", alternatives.join("|")));
    }
    if text.contains('*') {
        return compile(text, &format!("^{}$", wildcard(text)));
    }
    Ok(Pattern::Exact(text.to_string()))
}

fn wildcard(text: &str) -> String {
    text.split('*').map(regex::escape).collect::<Vec<_>>().join(".*")
}

fn compile(source: &str, expression: &str) -> DeclarationResult<Pattern> {
    let regex = Regex::new(expression).map_err(|e| DeclarationError::InvalidPattern {
        pattern: source.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Pattern::Regex {
        source: source.to_string(),
        regex,
    })
}
