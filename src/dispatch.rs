//! Concurrent action dispatch for matched items.
//!
//! A [`Dispatcher`] owns the actions enabled for one watch. Each call to
//! [`Dispatcher::dispatch`] runs every action in its own task, waits for all
//! of them, and reports every failure together.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::item::CandidateItem;
use crate::metrics::{Counter, MetricsSink};

/// What an action did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The side effect happened.
    Performed,
    /// Nothing to do for this item.
    Skipped,
}

/// Failure of a single action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The issue tracker rejected or failed the request.
    #[error("issue tracker: {0}")]
    Source(#[from] crate::source::SourceError),
    /// Mail delivery failed.
    #[error("mail: {0}")]
    Mail(#[from] crate::mail::MailError),
    /// The item could not be rendered.
    #[error("encoding item: {0}")]
    Encode(#[from] serde_json::Error),
    /// The action task panicked.
    #[error("action panicked: {0}")]
    Panicked(String),
}

/// A side effect triggered for every matched item.
#[async_trait]
pub trait Action: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Apply the action to `item`.
    async fn handle(&self, item: &CandidateItem) -> Result<ActionOutcome, ActionError>;
}

/// One failed action within a dispatch.
#[derive(Debug)]
pub struct ActionFailure {
    /// Action name.
    pub action: String,
    /// What went wrong.
    pub error: ActionError,
}

/// Every action failure from one dispatch.
#[derive(Debug, thiserror::Error)]
#[error("{}", render_failures(.failures))]
pub struct DispatchError {
    /// Failures, in action order.
    pub failures: Vec<ActionFailure>,
}

/// `N action(s) failed: name: error; name: error`
fn render_failures(failures: &[ActionFailure]) -> String {
    let details: Vec<String> = failures
        .iter()
        .map(|f| format!("{}: {}", f.action, f.error))
        .collect();
    format!("{} action(s) failed: {}", failures.len(), details.join("; "))
}

/// Runs a fixed set of actions concurrently for each item.
pub struct Dispatcher {
    actions: Vec<Arc<dyn Action>>,
    lock: Mutex<()>,
    metrics: Arc<dyn MetricsSink>,
}

impl Dispatcher {
    /// Dispatcher over `actions`.
    pub fn new(actions: Vec<Arc<dyn Action>>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            actions,
            lock: Mutex::new(()),
            metrics,
        }
    }

    /// Names of the configured actions.
    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name().to_owned()).collect()
    }

    /// Run every action on `item` concurrently and wait for all of them.
    ///
    /// Calls on the same dispatcher are serialized. A failing action does
    /// not cancel the others.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] naming every action that failed or panicked.
    pub async fn dispatch(&self, item: &CandidateItem) -> Result<(), DispatchError> {
        let _guard = self.lock.lock().await;

        let shared = Arc::new(item.clone());
        let handles: Vec<_> = self
            .actions
            .iter()
            .map(|action| {
                let action = Arc::clone(action);
                let item = Arc::clone(&shared);
                let name = action.name().to_owned();
                let handle = tokio::spawn(async move { action.handle(&item).await });
                (name, handle)
            })
            .collect();

        let mut failures = Vec::new();
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ActionError::Panicked(e.to_string())),
            };
            match result {
                Ok(ActionOutcome::Performed) => {
                    debug!(action = %name, item = %item.reference(), "action performed");
                    self.metrics.increment(Counter::ActionHandled, &name);
                }
                Ok(ActionOutcome::Skipped) => {
                    debug!(action = %name, item = %item.reference(), "action skipped");
                }
                Err(error) => {
                    warn!(action = %name, item = %item.reference(), error = %error, "action failed");
                    self.metrics.increment(Counter::ActionError, &name);
                    failures.push(ActionFailure {
                        action: name,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError { failures })
        }
    }
}
