//! Mail a JSON rendering of matched items.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::dispatch::{Action, ActionError, ActionOutcome};
use crate::item::{CandidateItem, SubscriptionState};
use crate::mail::Mailer;

/// Sends one plain-text mail per new item.
pub struct EmailAction {
    mailer: Arc<dyn Mailer>,
    to: String,
}

impl EmailAction {
    /// Action delivering to `to` through `mailer`.
    pub fn new(mailer: Arc<dyn Mailer>, to: &str) -> Self {
        Self {
            mailer,
            to: to.to_owned(),
        }
    }
}

/// `issuewatch: owner/repo#number: title`
pub fn subject_line(item: &CandidateItem) -> String {
    format!("issuewatch: {}: {}", item.reference(), item.title)
}

#[async_trait]
impl Action for EmailAction {
    fn name(&self) -> &str {
        "email"
    }

    async fn handle(&self, item: &CandidateItem) -> Result<ActionOutcome, ActionError> {
        // A subscribed user already gets the tracker's own notification.
        if item.subscription == SubscriptionState::Subscribed {
            debug!(item = %item.reference(), "not emailing, already subscribed");
            return Ok(ActionOutcome::Skipped);
        }

        let subject = subject_line(item);
        let body = serde_json::to_string_pretty(item)?;
        info!(item = %item.reference(), to = %self.to, "emailing item");
        self.mailer.send(&self.to, &subject, &body).await?;
        Ok(ActionOutcome::Performed)
    }
}
