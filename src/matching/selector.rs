//! Label-selector language for structured predicates.
//!
//! A selector is a comma-separated list of requirements, all of which must
//! hold:
//!
//! ```text
//! type==issue, repo.owner!=someone, state in (OPEN), number>100, !missing
//! ```
//!
//! Supported operators: `=`, `==`, `!=`, `in (..)`, `notin (..)`, `>`, `<`,
//! bare `key` (exists) and `!key` (does not exist). `>` and `<` compare
//! integers. Keys are restricted to `[A-Za-z0-9._/-]`.

use std::collections::BTreeMap;
use std::fmt;

/// Errors produced while parsing a selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// A comma produced an empty requirement.
    #[error("empty requirement in selector '{0}'")]
    EmptyRequirement(String),
    /// The requirement does not start with a valid key.
    #[error("invalid key in requirement '{0}'")]
    InvalidKey(String),
    /// Text after the key is not a known operator.
    #[error("unknown operator in requirement '{0}'")]
    UnknownOperator(String),
    /// A set operator without a parenthesised, non-empty value list.
    #[error("expected a non-empty '(a,b)' value list in requirement '{0}'")]
    BadValueSet(String),
    /// `>`/`<` with a non-integer operand.
    #[error("expected an integer in requirement '{0}'")]
    NotAnInteger(String),
    /// Parentheses do not balance.
    #[error("unbalanced parentheses in selector '{0}'")]
    Unbalanced(String),
}

/// Comparison applied to one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    /// Value equals.
    Equals(String),
    /// Value differs, or key absent.
    NotEquals(String),
    /// Value is one of the set.
    In(Vec<String>),
    /// Value is none of the set, or key absent.
    NotIn(Vec<String>),
    /// Key present.
    Exists,
    /// Key absent.
    DoesNotExist,
    /// Integer value strictly greater.
    GreaterThan(i64),
    /// Integer value strictly less.
    LessThan(i64),
}

/// A single `key <op> value` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Field key, e.g. `repo.name`.
    pub key: String,
    /// Comparison to apply.
    pub op: Operator,
}

impl Requirement {
    fn matches(&self, fields: &BTreeMap<&'static str, String>) -> bool {
        let value = fields.get(self.key.as_str());
        match &self.op {
            Operator::Equals(v) => value == Some(v),
            Operator::NotEquals(v) => value != Some(v),
            Operator::In(set) => value.is_some_and(|x| set.contains(x)),
            Operator::NotIn(set) => !value.is_some_and(|x| set.contains(x)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::GreaterThan(n) => value
                .and_then(|x| x.parse::<i64>().ok())
                .is_some_and(|x| x > *n),
            Operator::LessThan(n) => value
                .and_then(|x| x.parse::<i64>().ok())
                .is_some_and(|x| x < *n),
        }
    }
}

/// A parsed selector: the conjunction of its requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Parse selector text. An empty string selects everything.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError`] describing the first malformed requirement.
    pub fn parse(text: &str) -> Result<Self, SelectorError> {
        let trimmed = text.trim();
        let mut requirements = Vec::new();
        if !trimmed.is_empty() {
            for part in split_top_level(trimmed)? {
                requirements.push(parse_requirement(part.trim(), trimmed)?);
            }
        }
        Ok(Self {
            source: trimmed.to_owned(),
            requirements,
        })
    }

    /// Requirements in source order.
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Every key referenced by the selector.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.requirements.iter().map(|r| r.key.as_str())
    }

    /// Whether every requirement holds for the flattened field view.
    pub fn matches(&self, fields: &BTreeMap<&'static str, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(fields))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split on commas that are not inside a `( .. )` value list.
fn split_top_level(text: &str) -> Result<Vec<&str>, SelectorError> {
    let mut parts = Vec::new();
    let mut depth: u32 = 0;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth = depth.saturating_add(1),
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::Unbalanced(text.to_owned()))?;
            }
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i.saturating_add(1);
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Unbalanced(text.to_owned()));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')
}

fn split_key(text: &str) -> (&str, &str) {
    let end = text
        .char_indices()
        .find(|(_, c)| !is_key_char(*c))
        .map_or(text.len(), |(i, _)| i);
    (&text[..end], text[end..].trim_start())
}

fn parse_requirement(part: &str, whole: &str) -> Result<Requirement, SelectorError> {
    if part.is_empty() {
        return Err(SelectorError::EmptyRequirement(whole.to_owned()));
    }

    if let Some(rest) = part.strip_prefix('!') {
        let (key, tail) = split_key(rest.trim_start());
        if key.is_empty() || !tail.is_empty() {
            return Err(SelectorError::InvalidKey(part.to_owned()));
        }
        return Ok(Requirement {
            key: key.to_owned(),
            op: Operator::DoesNotExist,
        });
    }

    let (key, rest) = split_key(part);
    if key.is_empty() {
        return Err(SelectorError::InvalidKey(part.to_owned()));
    }

    let op = if rest.is_empty() {
        Operator::Exists
    } else if let Some(v) = rest.strip_prefix("!=") {
        Operator::NotEquals(v.trim().to_owned())
    } else if let Some(v) = rest.strip_prefix("==") {
        Operator::Equals(v.trim().to_owned())
    } else if let Some(v) = rest.strip_prefix('=') {
        Operator::Equals(v.trim().to_owned())
    } else if let Some(v) = rest.strip_prefix('>') {
        Operator::GreaterThan(parse_int(v, part)?)
    } else if let Some(v) = rest.strip_prefix('<') {
        Operator::LessThan(parse_int(v, part)?)
    } else if let Some(v) = strip_word(rest, "notin") {
        Operator::NotIn(parse_set(v, part)?)
    } else if let Some(v) = strip_word(rest, "in") {
        Operator::In(parse_set(v, part)?)
    } else {
        return Err(SelectorError::UnknownOperator(part.to_owned()));
    };

    Ok(Requirement {
        key: key.to_owned(),
        op,
    })
}

/// Strip a keyword operator that must be followed by whitespace or `(`.
fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(word)?;
    match rest.chars().next() {
        Some(c) if c.is_whitespace() || c == '(' => Some(rest.trim_start()),
        _ => None,
    }
}

fn parse_int(text: &str, part: &str) -> Result<i64, SelectorError> {
    text.trim()
        .parse()
        .map_err(|_| SelectorError::NotAnInteger(part.to_owned()))
}

fn parse_set(text: &str, part: &str) -> Result<Vec<String>, SelectorError> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| SelectorError::BadValueSet(part.to_owned()))?;
    let values: Vec<String> = inner
        .split(',')
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(SelectorError::BadValueSet(part.to_owned()));
    }
    Ok(values)
}
