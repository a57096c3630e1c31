//! Bring the scheduler's task set in line with a freshly loaded configuration.

use std::collections::HashSet;

use tracing::info;

use crate::config::WatchDefinition;
use crate::scheduler::{Scheduler, SchedulerError, TickCallback};

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Polls removed because their watch disappeared.
    pub deleted: Vec<String>,
    /// Polls started for watches that were not running.
    pub added: Vec<String>,
    /// Polls restarted for watches that were already running.
    pub replaced: Vec<String>,
}

/// Reconcile `scheduler` against `watches`.
///
/// Every running poll whose name is absent from `watches` is deleted first.
/// Then every watch is (re-)added with an immediate first tick, unchanged
/// ones included, so each poll runs against the latest definition and the
/// clients built with it.
///
/// # Errors
///
/// Propagates the first [`SchedulerError`] from [`Scheduler::add`]. Deletes
/// and adds that already happened stay in effect.
pub async fn reconcile<F>(
    scheduler: &mut Scheduler,
    watches: &[WatchDefinition],
    mut make_callback: F,
) -> Result<ReconcileReport, SchedulerError>
where
    F: FnMut(&WatchDefinition) -> TickCallback,
{
    let wanted: HashSet<&str> = watches.iter().map(|w| w.name.as_str()).collect();
    let running = scheduler.list();
    let mut report = ReconcileReport::default();

    for name in running.iter().filter(|n| !wanted.contains(n.as_str())) {
        scheduler.delete(name).await;
        report.deleted.push(name.clone());
    }

    for watch in watches {
        let callback = make_callback(watch);
        scheduler
            .add(&watch.name, watch.interval, callback, true)
            .await?;
        if running.contains(&watch.name) {
            report.replaced.push(watch.name.clone());
        } else {
            report.added.push(watch.name.clone());
        }
    }

    info!(
        deleted = report.deleted.len(),
        added = report.added.len(),
        replaced = report.replaced.len(),
        "polls reconciled"
    );
    Ok(report)
}
