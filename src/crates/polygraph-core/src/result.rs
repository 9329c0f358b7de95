//! Result-literal grammar
//!
//! A node's `result` attribute is a comma-separated list of `key=value`
//! items, e.g. `approved=true,segment=prime,score=720`. Values are decoded in
//! priority order: `true`/`false`, decimal integer, float, quoted string
//! (either quote kind), and finally the raw trimmed text as a string. Empty
//! items between commas are skipped; an item without `=` or with an empty key
//! fails compilation. `key=` decodes to the empty string.

use serde_json::{Number, Value};
use thiserror::Error;

use crate::model::Assignment;

/// Rejected `key=value` item inside a `result` attribute.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentParseError {
    /// Item has no `=` separator.
    #[error("invalid assignment {0:?} (expected key=value)")]
    InvalidItem(String),

    /// Item has an empty key.
    #[error("empty key in assignment {0:?}")]
    EmptyKey(String),
}

/// Parse a `result` attribute into its ordered assignment list.
///
/// An empty (or whitespace-only) attribute yields no assignments. Repeated
/// parsing of the same text yields identical typed values.
pub fn parse_result(raw: &str) -> Result<Vec<Assignment>, AssignmentParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let Some((key, value)) = part.split_once('=') else {
            return Err(AssignmentParseError::InvalidItem(part.to_string()));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(AssignmentParseError::EmptyKey(part.to_string()));
        }

        out.push(Assignment {
            key: key.to_string(),
            value: parse_literal(value),
        });
    }

    Ok(out)
}

/// Decode a single literal according to the priority order of the grammar.
pub fn parse_literal(raw: &str) -> Value {
    let s = raw.trim();

    if s == "true" {
        return Value::Bool(true);
    }
    if s == "false" {
        return Value::Bool(false);
    }

    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(Number::from(i));
    }

    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }

    if let Some(inner) = strip_quotes(s) {
        return Value::String(unescape(inner));
    }

    Value::String(s.to_string())
}

/// Inner text of a `"…"` or `'…'` literal, or `None` when `s` is not quoted.
fn strip_quotes(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some(&s[1..s.len() - 1]);
        }
    }
    None
}

/// Decode backslash escapes inside a quoted literal. Unrecognised escapes
/// are kept verbatim.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
