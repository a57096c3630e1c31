//! Side effects applied to matched items.

pub mod email;
pub mod subscribe;

use std::sync::Arc;

use tracing::warn;

use crate::config::ActionSet;
use crate::dispatch::Action;
use crate::mail::Mailer;
use crate::source::ItemSource;

pub use email::EmailAction;
pub use subscribe::SubscribeAction;

/// Instantiate the actions enabled in `set`, in a fixed order: subscribe,
/// then email.
///
/// An enabled email action without a mailer is skipped with a warning;
/// configuration validation rejects that combination up front.
pub fn build_actions(
    set: &ActionSet,
    source: &Arc<dyn ItemSource>,
    mailer: Option<&Arc<dyn Mailer>>,
) -> Vec<Arc<dyn Action>> {
    let mut actions: Vec<Arc<dyn Action>> = Vec::new();
    if set.subscribe {
        actions.push(Arc::new(SubscribeAction::new(Arc::clone(source))));
    }
    if let Some(to) = &set.email_to {
        match mailer {
            Some(mailer) => actions.push(Arc::new(EmailAction::new(Arc::clone(mailer), to))),
            None => warn!(to = %to, "email action enabled without smtp settings, skipping"),
        }
    }
    actions
}
