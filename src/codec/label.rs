//! Label-style predicates over descriptor annotations.
//!
//! Grammar (comma-separated requirements, all must hold):
//!
//! ```text
//! key                 key is present
//! !key                key is absent
//! key=value           key == value (also `==`)
//! key!=value          key absent or != value
//! key in (a,b)        key present with a listed value
//! key notin (a,b)     key absent or value not listed
//! ```

use regex_lite::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use crate::types::Annotations;

/// Error parsing a label selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid label selector {selector:?}: {reason}")]
pub struct LabelSelectorError {
    /// The selector text.
    pub selector: String,
    /// What was wrong.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Exists(String),
    NotExists(String),
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
}

impl Requirement {
    fn matches(&self, annotations: Option<&Annotations>) -> bool {
        let get = |key: &str| annotations.and_then(|a| a.get(key)).map(String::as_str);
        match self {
            Self::Exists(key) => get(key).is_some(),
            Self::NotExists(key) => get(key).is_none(),
            Self::Equals(key, value) => get(key) == Some(value.as_str()),
            Self::NotEquals(key, value) => get(key) != Some(value.as_str()),
            Self::In(key, values) => get(key).is_some_and(|v| values.contains(v)),
            Self::NotIn(key, values) => get(key).map_or(true, |v| !values.contains(v)),
        }
    }
}

/// A compiled label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    source: String,
    requirements: Vec<Requirement>,
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._/-]*[A-Za-z0-9])?$").expect("static pattern compiles")
    })
}

fn value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9]([A-Za-z0-9._+-]*[A-Za-z0-9])?)?$").expect("static pattern compiles")
    })
}

/// Split on commas that are not inside parentheses.
fn split_top_level(s: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
            }
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn check_key(key: &str) -> Result<String, String> {
    if key_pattern().is_match(key) {
        Ok(key.to_string())
    } else {
        Err(format!("invalid key {key:?}"))
    }
}

fn check_value(value: &str) -> Result<String, String> {
    if value_pattern().is_match(value) {
        Ok(value.to_string())
    } else {
        Err(format!("invalid value {value:?}"))
    }
}

fn parse_set(rest: &str) -> Result<BTreeSet<String>, String> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| "expected parenthesised value list".to_string())?;
    let values = inner
        .split(',')
        .map(|v| check_value(v.trim()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if values.is_empty() || (values.len() == 1 && values.contains("")) {
        return Err("empty value list".to_string());
    }
    Ok(values)
}

fn parse_requirement(req: &str) -> Result<Requirement, String> {
    let req = req.trim();
    if req.is_empty() {
        return Err("empty requirement".to_string());
    }

    if let Some(key) = req.strip_prefix('!') {
        return Ok(Requirement::NotExists(check_key(key.trim())?));
    }

    let mut words = req.splitn(2, char::is_whitespace);
    let first = words.next().unwrap_or_default();
    if let Some(rest) = words.next() {
        let rest = rest.trim_start();
        if let Some(set) = rest.strip_prefix("notin") {
            return Ok(Requirement::NotIn(check_key(first)?, parse_set(set)?));
        }
        if let Some(set) = rest.strip_prefix("in") {
            return Ok(Requirement::In(check_key(first)?, parse_set(set)?));
        }
    }

    if let Some((key, value)) = req.split_once("!=") {
        return Ok(Requirement::NotEquals(check_key(key.trim())?, check_value(value.trim())?));
    }
    if let Some((key, value)) = req.split_once("==") {
        return Ok(Requirement::Equals(check_key(key.trim())?, check_value(value.trim())?));
    }
    if let Some((key, value)) = req.split_once('=') {
        return Ok(Requirement::Equals(check_key(key.trim())?, check_value(value.trim())?));
    }
    Ok(Requirement::Exists(check_key(req)?))
}

impl LabelSelector {
    /// Parse a selector.
    pub fn parse(selector: &str) -> Result<Self, LabelSelectorError> {
        let err = |reason: String| LabelSelectorError {
            selector: selector.to_string(),
            reason,
        };
        let requirements = split_top_level(selector)
            .map_err(err)?
            .into_iter()
            .map(parse_requirement)
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;
        Ok(Self {
            source: selector.to_string(),
            requirements,
        })
    }

    /// Whether every requirement holds for `annotations`.
    pub fn matches(&self, annotations: Option<&Annotations>) -> bool {
        self.requirements.iter().all(|r| r.matches(annotations))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
