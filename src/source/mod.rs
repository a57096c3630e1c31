//! Item sources: where candidate items come from.
//!
//! [`ItemSource`] is the contract the orchestrator polls. Implementations
//! must apply the native [`IssueFilter`] server-side, page through every
//! result, and populate the lazily fetched fields (`body`, `labels`) only
//! when the matcher asks for them. [`filter_candidates`] holds that last
//! step so every source shares it.

pub mod github;

use async_trait::async_trait;
use tracing::debug;

use crate::item::{CandidateItem, IssueState, Repository, SubscriptionState};
use crate::matching::Matcher;
use crate::metrics::{Counter, MetricsSink};

/// Errors from an item source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The addressed repository or item does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// HTTP transport failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Upstream responded with an error status.
    #[error("tracker returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// The query itself was rejected.
    #[error("query error: {0}")]
    Query(String),
    /// The response did not have the expected shape.
    #[error("response parse error: {0}")]
    Parse(String),
}

impl SourceError {
    /// Whether this is a [`SourceError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Filter the tracker evaluates natively when listing items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    /// Items must carry at least one of these labels. Empty means any.
    pub labels: Vec<String>,
    /// Items must be in one of these states. Empty means any.
    pub states: Vec<IssueState>,
}

/// A queryable issue tracker.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Login of the authenticated user.
    async fn who_am_i(&self) -> Result<String, SourceError>;

    /// Verify that `repo` exists and is visible.
    async fn check_repository(&self, repo: &Repository) -> Result<(), SourceError>;

    /// Every item in `repo` that passes `filter` and `matcher`.
    async fn list_candidates(
        &self,
        repo: &Repository,
        filter: &IssueFilter,
        matcher: &Matcher,
    ) -> Result<Vec<CandidateItem>, SourceError>;

    /// Set the viewer's subscription state on item `id`.
    async fn set_subscription(&self, id: &str, state: SubscriptionState) -> Result<(), SourceError>;
}

/// Per-item sub-fetches for fields left empty by the listing query.
#[async_trait]
pub trait FieldFetcher: Send + Sync {
    /// Plain-text body of `item`.
    async fn fetch_body(&self, item: &CandidateItem) -> Result<String, SourceError>;

    /// Every label name on `item`.
    async fn fetch_labels(&self, item: &CandidateItem) -> Result<Vec<String>, SourceError>;
}

/// Populate the fields `matcher` needs, evaluate, and keep the matches.
///
/// Non-matching items are counted under [`Counter::ItemFiltered`] with the
/// repository as label.
///
/// # Errors
///
/// The first sub-fetch failure aborts the page.
pub async fn filter_candidates<F>(
    fetcher: &F,
    items: Vec<CandidateItem>,
    matcher: &Matcher,
    metrics: &dyn MetricsSink,
) -> Result<Vec<CandidateItem>, SourceError>
where
    F: FieldFetcher + ?Sized,
{
    let needs = matcher.requirements();
    let mut matched = Vec::with_capacity(items.len());

    for mut item in items {
        if needs.body {
            item.body = fetcher.fetch_body(&item).await?;
        }
        if needs.labels {
            item.labels = fetcher.fetch_labels(&item).await?;
        }

        let result = matcher.evaluate(&item);
        if result.matched {
            matched.push(item);
        } else {
            debug!(item = %item.reference(), reason = %result.reason, "item filtered out by the matcher");
            metrics.increment(Counter::ItemFiltered, &item.repo.to_string());
        }
    }

    Ok(matched)
}
