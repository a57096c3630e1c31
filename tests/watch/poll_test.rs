//! Poll ticks and the watcher's configuration loop, against fake clients.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use issuewatch::actions::build_actions;
use issuewatch::config::{ActionSet, ValidatedConfig, WatchDefinition};
use issuewatch::dispatch::Dispatcher;
use issuewatch::item::{Repository, SubscriptionState};
use issuewatch::matching::{MatchCriteria, Matcher};
use issuewatch::metrics::{Counter, Metrics};
use issuewatch::source::{IssueFilter, ItemSource};
use issuewatch::watch::{collect_matches, poll_once, PollSummary, Watcher};

use crate::support::{issue, MockSource};

fn repo_a() -> Repository {
    Repository::new("owner", "alpha")
}

fn repo_b() -> Repository {
    Repository::new("owner", "beta")
}

fn subscribing_watch(name: &str, repositories: Vec<Repository>) -> WatchDefinition {
    WatchDefinition {
        name: name.to_owned(),
        repositories,
        filter: IssueFilter::default(),
        matcher: Arc::new(Matcher::default()),
        interval: Duration::from_secs(3600),
        actions: ActionSet {
            subscribe: true,
            email_to: None,
        },
    }
}

fn subscribed_ids(source: &MockSource) -> Vec<String> {
    source
        .subscriptions
        .lock()
        .expect("subscriptions lock")
        .iter()
        .filter(|(_, state)| *state == SubscriptionState::Subscribed)
        .map(|(id, _)| id.clone())
        .collect()
}

#[tokio::test]
async fn failing_repository_does_not_stop_the_others() {
    let b_item = issue("owner", "beta", 9);
    let source = Arc::new(
        MockSource::new("me")
            .with_failing(repo_a())
            .with_items(repo_b(), vec![b_item.clone()]),
    );
    let dyn_source: Arc<dyn ItemSource> = source.clone();
    let metrics = Arc::new(Metrics::new());
    let watch = subscribing_watch("bugs", vec![repo_a(), repo_b()]);
    let dispatcher = Dispatcher::new(
        build_actions(&watch.actions, &dyn_source, None),
        metrics.clone(),
    );

    let summary = poll_once(&watch, dyn_source.as_ref(), &dispatcher, metrics.as_ref(), Utc::now()).await;

    assert_eq!(summary, PollSummary { matched: 1, errors: 1 });
    assert_eq!(
        *source.list_calls.lock().expect("list lock"),
        vec![repo_a(), repo_b()]
    );
    assert_eq!(subscribed_ids(&source), vec![b_item.id]);
    assert_eq!(metrics.get(Counter::PollTick, "bugs"), 1);
    assert_eq!(metrics.get(Counter::PollError, "bugs"), 1);
    assert_eq!(metrics.get(Counter::ActionHandled, "subscribe"), 1);
}

#[tokio::test]
async fn only_matching_items_are_dispatched() {
    let mut wanted = issue("owner", "alpha", 1);
    wanted.title = "crash on startup".to_owned();
    let mut other = issue("owner", "alpha", 2);
    other.title = "docs typo".to_owned();
    let source = Arc::new(MockSource::new("me").with_items(repo_a(), vec![wanted.clone(), other]));
    let dyn_source: Arc<dyn ItemSource> = source.clone();

    let mut watch = subscribing_watch("crashes", vec![repo_a()]);
    watch.matcher = Arc::new(
        Matcher::build(&MatchCriteria {
            title_patterns: vec!["crash".to_owned()],
            ..Default::default()
        })
        .expect("matcher"),
    );
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Dispatcher::new(
        build_actions(&watch.actions, &dyn_source, None),
        metrics.clone(),
    );

    let summary = poll_once(&watch, dyn_source.as_ref(), &dispatcher, metrics.as_ref(), Utc::now()).await;
    assert_eq!(summary, PollSummary { matched: 1, errors: 0 });
    assert_eq!(subscribed_ids(&source), vec![wanted.id]);
}

#[tokio::test]
async fn already_subscribed_items_are_skipped() {
    let mut item = issue("owner", "alpha", 5);
    item.subscription = SubscriptionState::Subscribed;
    let source = Arc::new(MockSource::new("me").with_items(repo_a(), vec![item]));
    let dyn_source: Arc<dyn ItemSource> = source.clone();
    let watch = subscribing_watch("all", vec![repo_a()]);
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Dispatcher::new(
        build_actions(&watch.actions, &dyn_source, None),
        metrics.clone(),
    );

    let summary = poll_once(&watch, dyn_source.as_ref(), &dispatcher, metrics.as_ref(), Utc::now()).await;
    assert_eq!(summary, PollSummary { matched: 1, errors: 0 });
    assert!(source.subscriptions.lock().expect("subscriptions lock").is_empty());
    assert_eq!(metrics.get(Counter::ActionHandled, "subscribe"), 0);
}

#[tokio::test]
async fn collect_matches_stops_at_first_failure() {
    let source = MockSource::new("me")
        .with_items(repo_a(), vec![issue("owner", "alpha", 1)])
        .with_failing(repo_b());

    let ok = collect_matches(&subscribing_watch("a", vec![repo_a()]), &source)
        .await
        .expect("alpha lists");
    assert_eq!(ok.len(), 1);

    let err = collect_matches(&subscribing_watch("ab", vec![repo_a(), repo_b()]), &source).await;
    assert!(err.is_err());
}

fn config(source: &Arc<MockSource>, watches: Vec<WatchDefinition>) -> ValidatedConfig {
    ValidatedConfig {
        user: "me".to_owned(),
        interval: Duration::from_secs(3600),
        source: source.clone(),
        mailer: None,
        watches,
    }
}

#[tokio::test]
async fn apply_reconciles_successive_configurations() {
    let source = Arc::new(MockSource::new("me"));
    let mut watcher = Watcher::new(Arc::new(Metrics::new()));

    let report = watcher
        .apply(&config(&source, vec![
            subscribing_watch("a", vec![repo_a()]),
            subscribing_watch("b", vec![repo_b()]),
        ]))
        .await
        .expect("first apply");
    assert_eq!(report.added, vec!["a", "b"]);

    let report = watcher
        .apply(&config(&source, vec![subscribing_watch("b", vec![repo_b()])]))
        .await
        .expect("second apply");
    assert_eq!(report.deleted, vec!["a"]);
    assert_eq!(report.replaced, vec!["b"]);
    assert_eq!(watcher.scheduler().list(), vec!["b"]);

    watcher.stop().await;
    assert!(watcher.scheduler().is_stopped());
    assert!(watcher.scheduler().list().is_empty());
}

#[tokio::test]
async fn run_polls_new_configuration_and_stops_on_shutdown() {
    let item = issue("owner", "alpha", 3);
    let source = Arc::new(MockSource::new("me").with_items(repo_a(), vec![item.clone()]));
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(config(&source, vec![subscribing_watch("w", vec![repo_a()])]))
        .await
        .expect("send config");

    let polled = Arc::clone(&source);
    let shutdown = async move {
        while subscribed_ids(&polled).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    let mut watcher = Watcher::new(Arc::new(Metrics::new()));
    tokio::time::timeout(Duration::from_secs(5), watcher.run(&mut rx, shutdown))
        .await
        .expect("watcher stopped in time")
        .expect("run");

    assert_eq!(subscribed_ids(&source), vec![item.id]);
    assert!(watcher.scheduler().is_stopped());
    drop(tx);
}

#[tokio::test]
async fn run_returns_when_the_stream_closes() {
    let (tx, mut rx) = mpsc::channel::<ValidatedConfig>(1);
    drop(tx);
    let mut watcher = Watcher::new(Arc::new(Metrics::new()));
    watcher
        .run(&mut rx, std::future::pending())
        .await
        .expect("run");
    assert!(watcher.scheduler().is_stopped());
}
