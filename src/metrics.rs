//! In-process counters for polls, fetches, matches and actions.
//!
//! Components take an `Arc<dyn MetricsSink>` and call
//! [`MetricsSink::increment`]; the default sink is [`Metrics`], a
//! mutex-guarded map that can be snapshotted or rendered in the Prometheus
//! text exposition format.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Mutex;

use tracing::warn;

/// Every counter the watcher records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    /// Poll task ticks, labelled by watch.
    PollTick,
    /// Failed fetch or dispatch during a tick, labelled by watch.
    PollError,
    /// Items fetched but rejected by the matcher, labelled by repository.
    ItemFiltered,
    /// Actions that performed their effect, labelled by action.
    ActionHandled,
    /// Actions that failed, labelled by action.
    ActionError,
    /// Successful configuration loads, labelled by path.
    ConfigLoad,
    /// Failed configuration loads, labelled by path.
    ConfigLoadError,
    /// Repository lookups, labelled by repository.
    RepoQuery,
    /// Failed repository lookups.
    RepoQueryError,
    /// Issue listing pages.
    IssueQuery,
    /// Failed issue listing pages.
    IssueQueryError,
    /// Label listing pages.
    LabelQuery,
    /// Failed label listing pages.
    LabelQueryError,
    /// Body fetches.
    BodyQuery,
    /// Failed body fetches.
    BodyQueryError,
}

impl Counter {
    /// All counters, in rendering order.
    pub const ALL: [Self; 15] = [
        Self::PollTick,
        Self::PollError,
        Self::ItemFiltered,
        Self::ActionHandled,
        Self::ActionError,
        Self::ConfigLoad,
        Self::ConfigLoadError,
        Self::RepoQuery,
        Self::RepoQueryError,
        Self::IssueQuery,
        Self::IssueQueryError,
        Self::LabelQuery,
        Self::LabelQueryError,
        Self::BodyQuery,
        Self::BodyQueryError,
    ];

    /// Snake-case counter name without prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PollTick => "poll_tick",
            Self::PollError => "poll_error",
            Self::ItemFiltered => "item_filtered",
            Self::ActionHandled => "action_handled",
            Self::ActionError => "action_error",
            Self::ConfigLoad => "config_load",
            Self::ConfigLoadError => "config_load_error",
            Self::RepoQuery => "repo_query",
            Self::RepoQueryError => "repo_query_error",
            Self::IssueQuery => "issue_query",
            Self::IssueQueryError => "issue_query_error",
            Self::LabelQuery => "label_query",
            Self::LabelQueryError => "label_query_error",
            Self::BodyQuery => "body_query",
            Self::BodyQueryError => "body_query_error",
        }
    }

    /// Name of the single label this counter carries.
    pub fn label_name(self) -> &'static str {
        match self {
            Self::PollTick | Self::PollError => "watch",
            Self::ActionHandled | Self::ActionError => "action",
            Self::ConfigLoad | Self::ConfigLoadError => "path",
            _ => "repo",
        }
    }
}

/// Destination for counter increments.
pub trait MetricsSink: Send + Sync {
    /// Add one to `counter` for `label`.
    fn increment(&self, counter: Counter, label: &str);
}

/// Sink that drops every increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: Counter, _label: &str) {}
}

/// Mutex-guarded counter registry.
#[derive(Debug, Default)]
pub struct Metrics {
    counts: Mutex<HashMap<(Counter, String), u64>>,
}

impl Metrics {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one counter/label pair.
    pub fn get(&self, counter: Counter, label: &str) -> u64 {
        match self.counts.lock() {
            Ok(map) => map.get(&(counter, label.to_owned())).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Sum of a counter over all labels.
    pub fn total(&self, counter: Counter) -> u64 {
        self.snapshot()
            .into_iter()
            .filter(|((c, _), _)| *c == counter)
            .fold(0u64, |acc, (_, v)| acc.saturating_add(v))
    }

    /// Sorted copy of every recorded value.
    pub fn snapshot(&self) -> BTreeMap<(Counter, String), u64> {
        match self.counts.lock() {
            Ok(map) => map.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Render every recorded counter in Prometheus text format.
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for counter in Counter::ALL {
            let mut rows = snapshot.iter().filter(|((c, _), _)| *c == counter).peekable();
            if rows.peek().is_none() {
                continue;
            }
            let name = format!("issuewatch_{}", counter.as_str());
            let _ = writeln!(out, "# TYPE {name} counter");
            for ((_, label), value) in rows {
                let _ = writeln!(
                    out,
                    "{name}{{{}=\"{}\"}} {value}",
                    counter.label_name(),
                    escape_label(label)
                );
            }
        }
        out
    }
}

impl MetricsSink for Metrics {
    fn increment(&self, counter: Counter, label: &str) {
        match self.counts.lock() {
            Ok(mut map) => {
                let slot = map.entry((counter, label.to_owned())).or_insert(0);
                *slot = slot.saturating_add(1);
            }
            Err(e) => warn!(error = %e, counter = counter.as_str(), "metrics lock poisoned"),
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
