//! Authentication and repository checks behind `whoami` and `check`.

use issuewatch::config::Config;
use issuewatch::item::Repository;
use issuewatch::watch::{authenticate, check_repositories, RepositoryCheck};

use crate::support::MockSource;

fn config() -> Config {
    toml::from_str(
        r#"
user = "octocat"
pat_file = "/unused"

[[watches]]
name = "flakes"
repos = [{ owner = "cilium", name = "cilium" }, { owner = "cilium", name = "tetragon" }]
selectors = ["type==issue"]
"#,
    )
    .expect("config parses")
}

#[tokio::test]
async fn rejected_token_fails_before_any_repository_lookup() {
    let source = MockSource::new("octocat").with_rejected_token();

    let err = check_repositories(&config(), &source)
        .await
        .expect_err("bad token");

    assert!(
        err.to_string().contains("unable to authenticate with GitHub"),
        "{err:#}"
    );
    assert!(source.checked.lock().expect("checked lock").is_empty());
}

#[tokio::test]
async fn token_for_another_user_fails_before_any_repository_lookup() {
    let source = MockSource::new("mallory");

    let err = check_repositories(&config(), &source)
        .await
        .expect_err("wrong user");

    assert!(err.to_string().contains("does not match PAT user 'mallory'"), "{err:#}");
    assert!(source.checked.lock().expect("checked lock").is_empty());
}

#[tokio::test]
async fn first_missing_repository_is_reported() {
    let source = MockSource::new("octocat").with_missing(Repository::new("cilium", "cilium"));

    let outcome = check_repositories(&config(), &source).await.expect("check");

    assert_eq!(
        outcome,
        RepositoryCheck::Missing {
            watch: "flakes".to_owned(),
            repo: Repository::new("cilium", "cilium"),
        }
    );
    assert_eq!(
        *source.checked.lock().expect("checked lock"),
        vec![Repository::new("cilium", "cilium")]
    );
}

#[tokio::test]
async fn all_repositories_found() {
    let source = MockSource::new("octocat");
    let outcome = check_repositories(&config(), &source).await.expect("check");
    assert_eq!(outcome, RepositoryCheck::AllFound);
    assert_eq!(source.checked.lock().expect("checked lock").len(), 2);
}

#[tokio::test]
async fn authenticate_returns_the_login() {
    let source = MockSource::new("octocat");
    let login = authenticate(&source, "octocat").await.expect("authenticated");
    assert_eq!(login, "octocat");
}
