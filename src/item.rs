//! Normalized view of an entry fetched from a watched collection.
//!
//! A [`CandidateItem`] carries the cheap core fields every listing returns,
//! plus `labels` and `body`, which stay empty until a matcher that needs them
//! causes the item source to fetch them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Keys available to structured selectors, in the order of [`CandidateItem::fields`].
pub const FIELD_KEYS: [&str; 9] = [
    "type",
    "repo.owner",
    "repo.name",
    "author.login",
    "body",
    "number",
    "title",
    "state",
    "subscription",
];

/// Whether `key` addresses a field of the flattened item view.
pub fn is_item_field(key: &str) -> bool {
    FIELD_KEYS.contains(&key)
}

/// A repository on the issue tracker, addressed as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Repository {
    /// Owning user or organisation.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl Repository {
    /// Create a repository reference.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Kind of tracker entry. Only issues are fetched today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// An issue.
    #[default]
    Issue,
}

impl ItemKind {
    /// Lower-case name used in selectors and mail subjects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
        }
    }
}

/// Open/closed state of an issue, spelled the way the tracker API spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueState {
    /// Issue is open.
    Open,
    /// Issue is closed.
    Closed,
}

impl IssueState {
    /// API spelling (`OPEN` / `CLOSED`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    /// Parse the API spelling. Case-sensitive, like the tracker.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// The viewer's subscription state for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    /// Not subscribed; notifications only on participation.
    Unsubscribed,
    /// Subscribed to all notifications.
    Subscribed,
    /// Explicitly ignoring notifications.
    Ignored,
}

impl SubscriptionState {
    /// API spelling (`SUBSCRIBED`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsubscribed => "UNSUBSCRIBED",
            Self::Subscribed => "SUBSCRIBED",
            Self::Ignored => "IGNORED",
        }
    }
}

/// One fetched entry, normalized for matching and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Opaque tracker node id, used for mutations.
    pub id: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Collection the entry was fetched from.
    pub repo: Repository,
    /// Per-repository number.
    pub number: u64,
    /// Title text.
    pub title: String,
    /// Open/closed state.
    pub state: IssueState,
    /// Viewer subscription state at fetch time.
    pub subscription: SubscriptionState,
    /// Author login, if the account still exists.
    pub author: Option<String>,
    /// Label names. Empty unless fetched.
    pub labels: Vec<String>,
    /// Plain-text body. Empty unless fetched.
    pub body: String,
}

impl CandidateItem {
    /// Flattened string-keyed view used by structured selectors.
    ///
    /// Nested fields use dot notation (`repo.name`). Every key in
    /// [`FIELD_KEYS`] is always present; missing values are empty strings.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("type", self.kind.as_str().to_owned()),
            ("repo.owner", self.repo.owner.clone()),
            ("repo.name", self.repo.name.clone()),
            ("author.login", self.author.clone().unwrap_or_default()),
            ("body", self.body.clone()),
            ("number", self.number.to_string()),
            ("title", self.title.clone()),
            ("state", self.state.as_str().to_owned()),
            ("subscription", self.subscription.as_str().to_owned()),
        ])
    }

    /// Short `owner/name#number` reference for logs and subjects.
    pub fn reference(&self) -> String {
        format!("{}#{}", self.repo, self.number)
    }
}

#[cfg(test)]
pub(crate) fn test_item() -> CandidateItem {
    CandidateItem {
        id: "I_kwDOtest".to_owned(),
        kind: ItemKind::Issue,
        repo: Repository::new("owner", "repo"),
        number: 1,
        title: "a test issue".to_owned(),
        state: IssueState::Open,
        subscription: SubscriptionState::Unsubscribed,
        author: Some("actor".to_owned()),
        labels: vec!["a/test/label".to_owned(), "another/label".to_owned()],
        body: "issue body".to_owned(),
    }
}
