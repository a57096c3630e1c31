//! GitHub GraphQL item source.
//!
//! Talks to the v4 API over `reqwest` with a bearer token. Transport errors,
//! 429 and 5xx responses are retried a bounded number of times with a linear
//! backoff; every request carries the client-wide timeout.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{filter_candidates, FieldFetcher, IssueFilter, ItemSource, SourceError};
use crate::item::{CandidateItem, IssueState, ItemKind, Repository, SubscriptionState};
use crate::matching::Matcher;
use crate::metrics::{Counter, MetricsSink};

/// Public GraphQL endpoint.
pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Issues requested per listing page.
pub const ISSUES_PAGE_SIZE: u32 = 25;

/// Labels requested per label page.
pub const LABELS_PAGE_SIZE: u32 = 100;

/// Message prefix GitHub uses when a node cannot be resolved.
const NOT_FOUND_PREFIX: &str = "Could not resolve to a";

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Personal access token shapes redacted from error bodies.
static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"ghp_[A-Za-z0-9_]{20,}", r"github_pat_[A-Za-z0-9_]{20,}"]
        .into_iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

const VIEWER_QUERY: &str = "query { viewer { login isViewer } }";

const REPOSITORY_QUERY: &str = "query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) { name }
}";

const ISSUES_QUERY: &str = "query($owner: String!, $name: String!, $first: Int!, $cursor: String, $filters: IssueFilters) {
  repository(owner: $owner, name: $name) {
    issues(first: $first, after: $cursor, filterBy: $filters) {
      nodes { id number title state viewerSubscription author { login } }
      pageInfo { endCursor hasNextPage }
    }
  }
}";

const BODY_QUERY: &str = "query($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) { issue(number: $number) { bodyText } }
}";

const LABELS_QUERY: &str = "query($owner: String!, $name: String!, $number: Int!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    issue(number: $number) {
      labels(first: $first, after: $cursor) {
        nodes { name }
        pageInfo { endCursor hasNextPage }
      }
    }
  }
}";

const UPDATE_SUBSCRIPTION_MUTATION: &str = "mutation($input: UpdateSubscriptionInput!) {
  updateSubscription(input: $input) { subscribable { viewerSubscription } }
}";

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    nodes: Vec<T>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct RepositoryData<T> {
    repository: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    viewer: Viewer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewer {
    login: String,
    is_viewer: bool,
}

#[derive(Debug, Deserialize)]
struct IssuesRepository {
    issues: Connection<IssueNode>,
}

#[derive(Debug, Deserialize)]
struct Actor {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    number: u64,
    title: String,
    state: IssueState,
    viewer_subscription: Option<SubscriptionState>,
    author: Option<Actor>,
}

impl IssueNode {
    fn into_item(self, repo: &Repository) -> CandidateItem {
        CandidateItem {
            id: self.id,
            kind: ItemKind::Issue,
            repo: repo.clone(),
            number: self.number,
            title: self.title,
            state: self.state,
            subscription: self
                .viewer_subscription
                .unwrap_or(SubscriptionState::Unsubscribed),
            author: self.author.map(|a| a.login),
            labels: Vec::new(),
            body: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IssueRepository<T> {
    issue: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueBody {
    body_text: String,
}

#[derive(Debug, Deserialize)]
struct IssueLabels {
    labels: Connection<LabelNode>,
}

#[derive(Debug, Deserialize)]
struct LabelNode {
    name: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// GitHub v4 API client implementing [`ItemSource`].
pub struct GitHubClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    retries: u32,
    metrics: Arc<dyn MetricsSink>,
}

impl GitHubClient {
    /// Client authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Request`] if the HTTP client cannot be built.
    pub fn new(
        token: &str,
        timeout: Duration,
        retries: u32,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("issuewatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: GITHUB_GRAPHQL_URL.to_owned(),
            token: token.to_owned(),
            retries,
            metrics,
        })
    }

    /// Point the client at another GraphQL endpoint (GitHub Enterprise).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, SourceError> {
        let payload = json!({ "query": query, "variables": variables });
        let mut attempt: u32 = 0;
        loop {
            match self.send_once(&payload).await {
                Ok(body) => return decode_response(&body),
                Err(e) if attempt < self.retries && is_retryable(&e) => {
                    attempt = attempt.saturating_add(1);
                    warn!(attempt, retries = self.retries, error = %e, "retrying tracker request");
                    tokio::time::sleep(RETRY_BACKOFF.saturating_mul(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, payload: &Value) -> Result<String, SourceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;
        check_http_response(response).await
    }

    /// Run `fut`, counting it under `ok` and, on failure, also under `err`.
    async fn counted<T>(
        &self,
        ok: Counter,
        err: Counter,
        label: &str,
        fut: impl std::future::Future<Output = Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        self.metrics.increment(ok, label);
        let result = fut.await;
        if result.is_err() {
            self.metrics.increment(err, label);
        }
        result
    }
}

#[async_trait]
impl ItemSource for GitHubClient {
    async fn who_am_i(&self) -> Result<String, SourceError> {
        debug!("executing whoami query");
        let data: ViewerData = self.query(VIEWER_QUERY, json!({})).await?;
        if !data.viewer.is_viewer {
            return Err(SourceError::Parse(
                "unexpected result, returned user is not viewer".to_owned(),
            ));
        }
        Ok(data.viewer.login)
    }

    async fn check_repository(&self, repo: &Repository) -> Result<(), SourceError> {
        let label = repo.to_string();
        debug!(repo = %label, "executing check repository query");
        let data: RepositoryData<IgnoredAny> = self
            .counted(
                Counter::RepoQuery,
                Counter::RepoQueryError,
                &label,
                self.query(REPOSITORY_QUERY, repo_variables(repo)),
            )
            .await?;
        match data.repository {
            Some(_) => Ok(()),
            None => Err(SourceError::NotFound(format!("repository {label}"))),
        }
    }

    async fn list_candidates(
        &self,
        repo: &Repository,
        filter: &IssueFilter,
        matcher: &Matcher,
    ) -> Result<Vec<CandidateItem>, SourceError> {
        let label = repo.to_string();
        let mut variables = repo_variables(repo);
        variables["first"] = json!(ISSUES_PAGE_SIZE);
        variables["filters"] = filter_variables(filter);
        variables["cursor"] = Value::Null;

        let mut matched = Vec::new();
        loop {
            debug!(repo = %label, cursor = %variables["cursor"], "executing list issues query");
            let data: RepositoryData<IssuesRepository> = self
                .counted(
                    Counter::IssueQuery,
                    Counter::IssueQueryError,
                    &label,
                    self.query(ISSUES_QUERY, variables.clone()),
                )
                .await?;
            let issues = data
                .repository
                .ok_or_else(|| SourceError::NotFound(format!("repository {label}")))?
                .issues;

            let items = issues.nodes.into_iter().map(|n| n.into_item(repo)).collect();
            matched.extend(filter_candidates(self, items, matcher, self.metrics.as_ref()).await?);

            match issues.page_info.end_cursor {
                Some(cursor) if issues.page_info.has_next_page => variables["cursor"] = json!(cursor),
                _ => break,
            }
        }

        debug!(repo = %label, count = matched.len(), "listed candidates");
        Ok(matched)
    }

    async fn set_subscription(&self, id: &str, state: SubscriptionState) -> Result<(), SourceError> {
        debug!(id, state = state.as_str(), "executing update subscription mutation");
        let variables = json!({
            "input": { "subscribableId": id, "state": state.as_str() }
        });
        let _: Value = self.query(UPDATE_SUBSCRIPTION_MUTATION, variables).await?;
        Ok(())
    }
}

#[async_trait]
impl FieldFetcher for GitHubClient {
    async fn fetch_body(&self, item: &CandidateItem) -> Result<String, SourceError> {
        let label = item.repo.to_string();
        let mut variables = repo_variables(&item.repo);
        variables["number"] = json!(item.number);
        let data: RepositoryData<IssueRepository<IssueBody>> = self
            .counted(
                Counter::BodyQuery,
                Counter::BodyQueryError,
                &label,
                self.query(BODY_QUERY, variables),
            )
            .await?;
        data.repository
            .and_then(|r| r.issue)
            .map(|i| i.body_text)
            .ok_or_else(|| SourceError::NotFound(format!("issue {}", item.reference())))
    }

    async fn fetch_labels(&self, item: &CandidateItem) -> Result<Vec<String>, SourceError> {
        let label = item.repo.to_string();
        let mut variables = repo_variables(&item.repo);
        variables["number"] = json!(item.number);
        variables["first"] = json!(LABELS_PAGE_SIZE);
        variables["cursor"] = Value::Null;

        let mut labels = Vec::new();
        loop {
            let data: RepositoryData<IssueRepository<IssueLabels>> = self
                .counted(
                    Counter::LabelQuery,
                    Counter::LabelQueryError,
                    &label,
                    self.query(LABELS_QUERY, variables.clone()),
                )
                .await?;
            let page = data
                .repository
                .and_then(|r| r.issue)
                .ok_or_else(|| SourceError::NotFound(format!("issue {}", item.reference())))?
                .labels;

            labels.extend(page.nodes.into_iter().map(|n| n.name));

            match page.page_info.end_cursor {
                Some(cursor) if page.page_info.has_next_page => variables["cursor"] = json!(cursor),
                _ => return Ok(labels),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn repo_variables(repo: &Repository) -> Value {
    json!({ "owner": repo.owner, "name": repo.name })
}

/// `IssueFilters` input. Empty lists become `null` so GitHub applies no filter.
fn filter_variables(filter: &IssueFilter) -> Value {
    let labels = if filter.labels.is_empty() {
        Value::Null
    } else {
        json!(filter.labels)
    };
    let states = if filter.states.is_empty() {
        Value::Null
    } else {
        json!(filter.states.iter().map(|s| s.as_str()).collect::<Vec<_>>())
    };
    json!({ "labels": labels, "states": states })
}

fn is_retryable(error: &SourceError) -> bool {
    match error {
        SourceError::Request(_) => true,
        SourceError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

fn decode_response<T: DeserializeOwned>(body: &str) -> Result<T, SourceError> {
    let response: GraphQlResponse<T> =
        serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))?;

    if !response.errors.is_empty() {
        if let Some(not_found) = response
            .errors
            .iter()
            .find(|e| e.message.starts_with(NOT_FOUND_PREFIX))
        {
            return Err(SourceError::NotFound(not_found.message.clone()));
        }
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(SourceError::Query(messages.join("; ")));
    }

    response
        .data
        .ok_or_else(|| SourceError::Parse("response carried neither data nor errors".to_owned()))
}

async fn check_http_response(response: reqwest::Response) -> Result<String, SourceError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(SourceError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for regex in TOKEN_PATTERNS.iter() {
        sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    sanitized
}
