//! Orchestrator: wires configuration, scheduler, item source and actions.
//!
//! A [`Watcher`] owns the [`Scheduler`]. Every validated configuration it
//! receives is reconciled into the running poll set; each poll tick lists
//! candidates per repository and dispatches every match. One repository's
//! fetch failure never stops the others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::actions::build_actions;
use crate::config::{Config, ValidatedConfig, WatchDefinition};
use crate::dispatch::Dispatcher;
use crate::item::{CandidateItem, Repository};
use crate::mail::{MailError, Mailer, SmtpMailer, SmtpSettings};
use crate::metrics::{Counter, MetricsSink};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::scheduler::{tick_callback, Scheduler, SchedulerError, TickCallback};
use crate::source::github::GitHubClient;
use crate::source::{ItemSource, SourceError};

/// Builds the external clients a configuration needs.
///
/// Validation calls this once per load, so every configuration generation
/// gets clients built from its own credentials.
pub trait ClientFactory: Send + Sync {
    /// Issue tracker client authenticated with `token`.
    fn item_source(&self, token: &str) -> Result<Arc<dyn ItemSource>, SourceError>;

    /// Mailer for `settings`.
    fn mailer(&self, settings: &SmtpSettings) -> Result<Arc<dyn Mailer>, MailError>;
}

/// Production [`ClientFactory`]: GitHub over GraphQL and SMTP via `lettre`.
pub struct GitHubClients {
    timeout: Duration,
    retries: u32,
    metrics: Arc<dyn MetricsSink>,
}

impl GitHubClients {
    /// Factory whose tracker clients use `timeout` per request and up to
    /// `retries` retries.
    pub fn new(timeout: Duration, retries: u32, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            timeout,
            retries,
            metrics,
        }
    }
}

impl ClientFactory for GitHubClients {
    fn item_source(&self, token: &str) -> Result<Arc<dyn ItemSource>, SourceError> {
        let client = GitHubClient::new(token, self.timeout, self.retries, Arc::clone(&self.metrics))?;
        Ok(Arc::new(client))
    }

    fn mailer(&self, settings: &SmtpSettings) -> Result<Arc<dyn Mailer>, MailError> {
        Ok(Arc::new(SmtpMailer::new(settings)?))
    }
}

/// Counts from one poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Matched items handed to the dispatcher.
    pub matched: u64,
    /// Failed repository fetches plus failed dispatches.
    pub errors: u64,
}

/// Run one tick of `watch`: list every repository and dispatch matches.
pub async fn poll_once(
    watch: &WatchDefinition,
    source: &dyn ItemSource,
    dispatcher: &Dispatcher,
    metrics: &dyn MetricsSink,
    now: DateTime<Utc>,
) -> PollSummary {
    metrics.increment(Counter::PollTick, &watch.name);
    info!(watch = %watch.name, tick = %now.to_rfc3339(), "polling");

    let mut summary = PollSummary::default();
    for repo in &watch.repositories {
        let items = match source
            .list_candidates(repo, &watch.filter, &watch.matcher)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                error!(watch = %watch.name, repo = %repo, error = %e, "unable to list items");
                metrics.increment(Counter::PollError, &watch.name);
                summary.errors = summary.errors.saturating_add(1);
                continue;
            }
        };

        debug!(watch = %watch.name, repo = %repo, count = items.len(), "matched items");
        for item in items {
            summary.matched = summary.matched.saturating_add(1);
            if let Err(e) = dispatcher.dispatch(&item).await {
                error!(
                    watch = %watch.name,
                    item = %item.reference(),
                    error = %e,
                    "unable to handle item"
                );
                metrics.increment(Counter::PollError, &watch.name);
                summary.errors = summary.errors.saturating_add(1);
            }
        }
    }
    summary
}

/// Tick callback running [`poll_once`] against state captured now.
pub fn poll_callback(
    watch: WatchDefinition,
    source: Arc<dyn ItemSource>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<dyn MetricsSink>,
) -> TickCallback {
    let watch = Arc::new(watch);
    tick_callback(move |now| {
        let watch = Arc::clone(&watch);
        let source = Arc::clone(&source);
        let dispatcher = Arc::clone(&dispatcher);
        let metrics = Arc::clone(&metrics);
        async move {
            poll_once(&watch, source.as_ref(), &dispatcher, metrics.as_ref(), now).await;
        }
    })
}

/// Every item currently matching `watch`, across all its repositories.
///
/// # Errors
///
/// Stops at the first repository that fails to list.
pub async fn collect_matches(
    watch: &WatchDefinition,
    source: &dyn ItemSource,
) -> Result<Vec<CandidateItem>, SourceError> {
    let mut all = Vec::new();
    for repo in &watch.repositories {
        all.extend(
            source
                .list_candidates(repo, &watch.filter, &watch.matcher)
                .await?,
        );
    }
    Ok(all)
}

/// Confirm `source` authenticates as `user` and return the login.
///
/// # Errors
///
/// Fails if the token is rejected or belongs to someone else.
pub async fn authenticate(source: &dyn ItemSource, user: &str) -> anyhow::Result<String> {
    debug!(user, "checking PAT");
    let login = source
        .who_am_i()
        .await
        .context("unable to authenticate with GitHub")?;
    if login != user {
        anyhow::bail!("configured user '{user}' does not match PAT user '{login}'");
    }
    Ok(login)
}

/// Result of checking every configured repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCheck {
    /// Every repository exists.
    AllFound,
    /// The first repository that does not exist.
    Missing {
        /// Watch referencing it.
        watch: String,
        /// The repository.
        repo: Repository,
    },
}

/// Authenticate as `config.user`, then look up every repository of every
/// watch, stopping at the first one that does not exist.
///
/// # Errors
///
/// Fails on authentication errors and on lookup errors other than not found.
pub async fn check_repositories(config: &Config, source: &dyn ItemSource) -> anyhow::Result<RepositoryCheck> {
    authenticate(source, &config.user).await?;

    for watch in &config.watches {
        for repo in &watch.repos {
            match source.check_repository(repo).await {
                Ok(()) => info!(watch = %watch.name, repo = %repo, "repository exists"),
                Err(e) if e.is_not_found() => {
                    error!(watch = %watch.name, repo = %repo, error = %e, "repository not found");
                    return Ok(RepositoryCheck::Missing {
                        watch: watch.name.clone(),
                        repo: repo.clone(),
                    });
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("unable to check repository {repo}"));
                }
            }
        }
    }
    Ok(RepositoryCheck::AllFound)
}

/// Long-running watcher: applies configurations and owns the poll set.
pub struct Watcher {
    scheduler: Scheduler,
    metrics: Arc<dyn MetricsSink>,
}

impl Watcher {
    /// Idle watcher with no polls.
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            scheduler: Scheduler::new(),
            metrics,
        }
    }

    /// Running poll set.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Reconcile the poll set against `config`.
    ///
    /// Each watch gets a fresh dispatcher over the clients `config` carries.
    ///
    /// # Errors
    ///
    /// Propagates [`SchedulerError`] from the reconciler.
    pub async fn apply(&mut self, config: &ValidatedConfig) -> Result<ReconcileReport, SchedulerError> {
        let metrics = Arc::clone(&self.metrics);
        let source = Arc::clone(&config.source);
        let mailer = config.mailer.clone();
        reconcile(&mut self.scheduler, &config.watches, |watch| {
            let actions = build_actions(&watch.actions, &source, mailer.as_ref());
            let dispatcher = Arc::new(Dispatcher::new(actions, Arc::clone(&metrics)));
            poll_callback(
                watch.clone(),
                Arc::clone(&source),
                dispatcher,
                Arc::clone(&metrics),
            )
        })
        .await
    }

    /// Apply every configuration from `updates` until `shutdown` resolves or
    /// the stream closes, then stop every poll.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration cannot be applied.
    pub async fn run<S>(
        &mut self,
        updates: &mut mpsc::Receiver<ValidatedConfig>,
        shutdown: S,
    ) -> anyhow::Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                next = updates.recv() => match next {
                    Some(config) => {
                        let applied = self.apply(&config).await.context("applying configuration");
                        if let Err(e) = applied {
                            break Err(e);
                        }
                    }
                    None => {
                        info!("configuration stream closed");
                        break Ok(());
                    }
                },
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
            }
        };

        self.scheduler.stop_all().await;
        result
    }

    /// Stop every poll. Idempotent.
    pub async fn stop(&mut self) {
        self.scheduler.stop_all().await;
    }
}
