//! Subscribe the authenticated user to matched items.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::dispatch::{Action, ActionError, ActionOutcome};
use crate::item::{CandidateItem, SubscriptionState};
use crate::source::ItemSource;

/// Sets the viewer's subscription to `SUBSCRIBED`.
pub struct SubscribeAction {
    source: Arc<dyn ItemSource>,
}

impl SubscribeAction {
    /// Action using `source` for the mutation.
    pub fn new(source: Arc<dyn ItemSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Action for SubscribeAction {
    fn name(&self) -> &str {
        "subscribe"
    }

    async fn handle(&self, item: &CandidateItem) -> Result<ActionOutcome, ActionError> {
        if item.subscription == SubscriptionState::Subscribed {
            debug!(item = %item.reference(), "already subscribed");
            return Ok(ActionOutcome::Skipped);
        }
        info!(item = %item.reference(), "subscribing to item");
        self.source
            .set_subscription(&item.id, SubscriptionState::Subscribed)
            .await?;
        Ok(ActionOutcome::Performed)
    }
}
