//! Matcher construction and evaluation against realistic items.

use issuewatch::item::{CandidateItem, IssueState};
use issuewatch::matching::{MatchCriteria, MatchError, Matcher};

use crate::support::issue;

fn item() -> CandidateItem {
    let mut item = issue("kubernetes", "kubernetes", 4242);
    item.title = "Scheduler PANIC on node drain".to_owned();
    item.body = "Steps to reproduce:\nDrain a node. URGENT".to_owned();
    item.labels = vec!["kind/bug".to_owned(), "sig/scheduling".to_owned()];
    item
}

fn matcher(criteria: MatchCriteria) -> Matcher {
    Matcher::build(&criteria).expect("criteria should build")
}

#[test]
fn every_predicate_kind_passing_matches() {
    let m = matcher(MatchCriteria {
        selectors: vec![
            "type==issue, repo.owner=kubernetes".to_owned(),
            "state in (OPEN), number>4000, repo.name notin (website)".to_owned(),
        ],
        body_patterns: vec!["urgent".to_owned()],
        title_patterns: vec!["panic".to_owned()],
        required_labels: vec!["kind/bug".to_owned(), "sig/scheduling".to_owned()],
    });
    let result = m.evaluate(&item());
    assert!(result.matched, "{}", result.reason);
    assert!(result.reason.is_empty());
    assert_eq!(m.predicates().len(), 6);
}

#[test]
fn free_text_is_matched_case_insensitively_against_lowercase_text() {
    let m = matcher(MatchCriteria {
        title_patterns: vec!["^scheduler panic".to_owned()],
        ..Default::default()
    });
    assert!(m.evaluate(&item()).matched);

    let upper = matcher(MatchCriteria {
        title_patterns: vec!["PANIC".to_owned()],
        ..Default::default()
    });
    assert!(!upper.evaluate(&item()).matched);
}

#[test]
fn first_failing_predicate_in_insertion_order_is_reported() {
    let m = matcher(MatchCriteria {
        selectors: vec!["state=CLOSED".to_owned()],
        body_patterns: vec!["never present".to_owned()],
        title_patterns: vec!["also absent".to_owned()],
        required_labels: vec!["missing".to_owned()],
    });
    assert_eq!(m.evaluate(&item()).reason, "did not match selector: 'state=CLOSED'");

    let m = matcher(MatchCriteria {
        body_patterns: vec!["never present".to_owned()],
        title_patterns: vec!["also absent".to_owned()],
        required_labels: vec!["missing".to_owned()],
        ..Default::default()
    });
    assert_eq!(m.evaluate(&item()).reason, "did not match bodyRegex: 'never present'");

    let m = matcher(MatchCriteria {
        title_patterns: vec!["also absent".to_owned()],
        required_labels: vec!["missing".to_owned()],
        ..Default::default()
    });
    assert_eq!(m.evaluate(&item()).reason, "did not match titleRegex: 'also absent'");

    let m = matcher(MatchCriteria {
        required_labels: vec!["kind/bug".to_owned(), "missing".to_owned()],
        ..Default::default()
    });
    assert_eq!(m.evaluate(&item()).reason, "did not match requiredLabel: 'missing'");
}

#[test]
fn closed_item_fails_state_selector() {
    let m = matcher(MatchCriteria {
        selectors: vec!["state in (OPEN)".to_owned()],
        ..Default::default()
    });
    let mut closed = item();
    closed.state = IssueState::Closed;
    assert!(m.evaluate(&item()).matched);
    assert!(!m.evaluate(&closed).matched);
}

#[test]
fn requirements_follow_registered_predicates() {
    let selector_only = matcher(MatchCriteria {
        selectors: vec!["type==issue".to_owned()],
        ..Default::default()
    });
    assert!(!selector_only.requires_body());
    assert!(!selector_only.requires_labels());

    let with_body = matcher(MatchCriteria {
        selectors: vec!["type==issue".to_owned()],
        body_patterns: vec!["urgent".to_owned()],
        ..Default::default()
    });
    assert!(with_body.requires_body());
    assert!(!with_body.requires_labels());

    let with_title = matcher(MatchCriteria {
        title_patterns: vec!["panic".to_owned()],
        ..Default::default()
    });
    assert!(!with_title.requires_body());
    assert!(!with_title.requires_labels());

    let body_selector = matcher(MatchCriteria {
        selectors: vec!["body".to_owned()],
        ..Default::default()
    });
    assert!(body_selector.requires_body());
}

#[test]
fn lazily_empty_fields_do_not_match_their_predicates() {
    let m = matcher(MatchCriteria {
        body_patterns: vec!["urgent".to_owned()],
        required_labels: vec!["kind/bug".to_owned()],
        ..Default::default()
    });
    let mut unpopulated = item();
    unpopulated.body.clear();
    unpopulated.labels.clear();
    assert!(!m.evaluate(&unpopulated).matched);
    assert!(m.evaluate(&item()).matched);
}

#[test]
fn unknown_selector_key_is_rejected_at_build_time() {
    let err = Matcher::build(&MatchCriteria {
        selectors: vec!["type==issue, milestone=v1".to_owned()],
        ..Default::default()
    })
    .expect_err("unknown key");
    match err {
        MatchError::UnknownKey { key, .. } => assert_eq!(key, "milestone"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_criteria_are_rejected_at_build_time() {
    let bad_regex = Matcher::build(&MatchCriteria {
        body_patterns: vec!["(unclosed".to_owned()],
        ..Default::default()
    });
    assert!(matches!(bad_regex, Err(MatchError::Pattern { .. })));

    let bad_selector = Matcher::build(&MatchCriteria {
        selectors: vec!["state in OPEN".to_owned()],
        ..Default::default()
    });
    assert!(matches!(bad_selector, Err(MatchError::Selector { .. })));

    let empty_label = Matcher::build(&MatchCriteria {
        required_labels: vec!["  ".to_owned()],
        ..Default::default()
    });
    assert!(matches!(empty_label, Err(MatchError::EmptyLabel)));
}
