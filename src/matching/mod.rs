//! Multi-predicate matching pipeline.
//!
//! A [`Matcher`] is built once per watch from a [`MatchCriteria`] value and
//! holds an ordered list of [`Predicate`]s. [`Matcher::evaluate`] is a
//! short-circuit AND over them in insertion order: structured selectors,
//! body patterns, title patterns, then required labels. The first failing
//! predicate names the reason.
//!
//! The matcher also reports, through [`FieldRequirements`], which lazily
//! populated item fields its predicates read, so the item source can skip
//! sub-fetches nobody needs.

pub mod selector;

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::item::{is_item_field, CandidateItem};
use selector::{Selector, SelectorError};

/// Raw match criteria for one watch, as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCriteria {
    /// Label-selector expressions over the flattened item view.
    pub selectors: Vec<String>,
    /// Regular expressions that must match the lower-cased body.
    pub body_patterns: Vec<String>,
    /// Regular expressions that must match the lower-cased title.
    pub title_patterns: Vec<String>,
    /// Labels that must all be present on the item.
    pub required_labels: Vec<String>,
}

/// Errors raised while building a [`Matcher`].
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Selector text failed to parse.
    #[error("unable to parse label selector '{selector}': {source}")]
    Selector {
        /// Offending selector text.
        selector: String,
        /// Parse failure.
        #[source]
        source: SelectorError,
    },
    /// Selector references a key outside the item view.
    #[error("unknown key '{key}' in selector '{selector}'")]
    UnknownKey {
        /// Unknown key.
        key: String,
        /// Selector that referenced it.
        selector: String,
    },
    /// Pattern failed to compile.
    #[error("unable to compile regex '{pattern}': {source}")]
    Pattern {
        /// Offending pattern.
        pattern: String,
        /// Compile failure.
        #[source]
        source: regex::Error,
    },
    /// A required label was blank.
    #[error("required label cannot be empty")]
    EmptyLabel,
}

/// Which lazily populated item fields a matcher reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldRequirements {
    /// The body must be fetched before evaluation.
    pub body: bool,
    /// The label list must be fetched before evaluation.
    pub labels: bool,
}

/// One pass/fail test derived from one configured criterion.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Structured selector over [`CandidateItem::fields`].
    Selector(Selector),
    /// Pattern over the lower-cased body.
    BodyPattern(Regex),
    /// Pattern over the lower-cased title.
    TitlePattern(Regex),
    /// Label that must be present.
    RequiredLabel(String),
}

impl Predicate {
    fn holds(&self, item: &CandidateItem, fields: &mut Option<BTreeMap<&'static str, String>>) -> bool {
        match self {
            Self::Selector(sel) => sel.matches(fields.get_or_insert_with(|| item.fields())),
            Self::BodyPattern(re) => re.is_match(&item.body.to_lowercase()),
            Self::TitlePattern(re) => re.is_match(&item.title.to_lowercase()),
            Self::RequiredLabel(label) => item.labels.iter().any(|l| l == label),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selector(sel) => write!(f, "selector: '{sel}'"),
            Self::BodyPattern(re) => write!(f, "bodyRegex: '{re}'"),
            Self::TitlePattern(re) => write!(f, "titleRegex: '{re}'"),
            Self::RequiredLabel(label) => write!(f, "requiredLabel: '{label}'"),
        }
    }
}

/// Outcome of evaluating a matcher against one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Whether every predicate held.
    pub matched: bool,
    /// First failing predicate, empty when matched.
    pub reason: String,
}

impl MatchResult {
    fn pass() -> Self {
        Self {
            matched: true,
            reason: String::new(),
        }
    }

    fn fail(predicate: &Predicate) -> Self {
        Self {
            matched: false,
            reason: format!("did not match {predicate}"),
        }
    }
}

/// Ordered conjunction of predicates for one watch.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    predicates: Vec<Predicate>,
    requirements: FieldRequirements,
}

impl Matcher {
    /// Build a matcher, validating every criterion.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError`] for an unparsable selector, a selector key
    /// outside the item view, an invalid pattern, or a blank label.
    pub fn build(criteria: &MatchCriteria) -> Result<Self, MatchError> {
        let mut predicates = Vec::new();
        let mut requirements = FieldRequirements::default();

        for text in &criteria.selectors {
            let sel = Selector::parse(text).map_err(|source| MatchError::Selector {
                selector: text.clone(),
                source,
            })?;
            for key in sel.keys() {
                if !is_item_field(key) {
                    return Err(MatchError::UnknownKey {
                        key: key.to_owned(),
                        selector: text.clone(),
                    });
                }
                if key == "body" {
                    requirements.body = true;
                }
            }
            predicates.push(Predicate::Selector(sel));
        }

        for pattern in &criteria.body_patterns {
            predicates.push(Predicate::BodyPattern(compile(pattern)?));
            requirements.body = true;
        }

        for pattern in &criteria.title_patterns {
            predicates.push(Predicate::TitlePattern(compile(pattern)?));
        }

        for label in &criteria.required_labels {
            if label.trim().is_empty() {
                return Err(MatchError::EmptyLabel);
            }
            predicates.push(Predicate::RequiredLabel(label.clone()));
            requirements.labels = true;
        }

        Ok(Self {
            predicates,
            requirements,
        })
    }

    /// Fields the item source must populate before calling [`Self::evaluate`].
    pub fn requirements(&self) -> FieldRequirements {
        self.requirements
    }

    /// Whether a predicate reads the item body.
    pub fn requires_body(&self) -> bool {
        self.requirements.body
    }

    /// Whether a predicate reads the item labels.
    pub fn requires_labels(&self) -> bool {
        self.requirements.labels
    }

    /// Predicates in evaluation order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Evaluate predicates in order, stopping at the first failure.
    pub fn evaluate(&self, item: &CandidateItem) -> MatchResult {
        let mut fields = None;
        for predicate in &self.predicates {
            if !predicate.holds(item, &mut fields) {
                return MatchResult::fail(predicate);
            }
        }
        MatchResult::pass()
    }
}

fn compile(pattern: &str) -> Result<Regex, MatchError> {
    Regex::new(pattern).map_err(|source| MatchError::Pattern {
        pattern: pattern.to_owned(),
        source,
    })
}
