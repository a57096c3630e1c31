//! Validation of whole configuration files against fake clients.

use std::path::{Path, PathBuf};
use std::time::Duration;

use issuewatch::config::{load_config, ConfigError, EmailError, ValidatedConfig};
use issuewatch::item::Repository;

use crate::support::{MockClients, MockMailer, MockSource};

/// Temp dir holding a PAT file and a config file.
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("pat"), "ghp_token\n").expect("write pat");
        std::fs::write(dir.path().join("smtp"), "hunter2\n").expect("write smtp password");
        Self { dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Config with `body` appended to the `user`/`pat_file` header.
    pub fn config(&self, user: &str, body: &str) -> String {
        format!(
            "user = '{user}'\npat_file = '{}'\n{body}",
            self.path("pat").display()
        )
    }

    pub fn write(&self, contents: &str) -> PathBuf {
        let path = self.path("config.toml");
        std::fs::write(&path, contents).expect("write config");
        path
    }
}

pub fn watch_toml(name: &str) -> String {
    format!(
        r#"
[[watches]]
name = "{name}"
repos = [{{ owner = "cilium", name = "cilium" }}, {{ owner = "cilium", name = "tetragon" }}]
selectors = ["type==issue"]
title_regex = ["^ci:"]
states = ["OPEN"]
actions.subscribe.enabled = true
"#
    )
}

fn email_watch_toml() -> &'static str {
    r#"
[[watches]]
name = "mail"
repos = [{ owner = "cilium", name = "cilium" }]
required_labels = ["kind/bug"]
actions.email.enabled = true
actions.email.send_to = "me@example.com"
"#
}

fn email_section(fixture: &Fixture, port: u16) -> String {
    format!(
        "[email]\nusername = 'bot@example.com'\npassword_file = '{}'\nhost = 'smtp.example.com'\nport = {port}\n",
        fixture.path("smtp").display()
    )
}

async fn validate(path: &Path, clients: &MockClients) -> Result<ValidatedConfig, ConfigError> {
    load_config(path).expect("config parses").validate(clients).await
}

#[tokio::test]
async fn valid_config_checks_identity_and_repositories() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!(
        "{}{}",
        fixture.config("octocat", "interval_secs = 60\n"),
        watch_toml("flakes")
    ));
    let clients = MockClients::new(MockSource::new("octocat"));

    let config = validate(&path, &clients).await.expect("valid config");

    assert_eq!(config.user, "octocat");
    assert_eq!(config.interval, Duration::from_secs(60));
    assert_eq!(config.watch_names(), vec!["flakes"]);
    assert!(config.mailer.is_none());
    let watch = config.watch("flakes").expect("watch present");
    assert_eq!(watch.repositories.len(), 2);
    assert!(watch.actions.subscribe);
    assert_eq!(watch.interval, Duration::from_secs(60));
    assert_eq!(*clients.tokens.lock().expect("tokens lock"), vec!["ghp_token"]);
    assert_eq!(
        *clients.source.checked.lock().expect("checked lock"),
        vec![
            Repository::new("cilium", "cilium"),
            Repository::new("cilium", "tetragon")
        ]
    );
}

#[tokio::test]
async fn pat_for_another_user_is_rejected() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!("{}{}", fixture.config("octocat", ""), watch_toml("w")));
    let clients = MockClients::new(MockSource::new("someone-else"));

    let err = validate(&path, &clients).await.err().expect("mismatch");
    assert!(matches!(err, ConfigError::UserMismatch { .. }));
    assert!(err.to_string().contains("someone-else"), "{err}");
}

#[tokio::test]
async fn missing_repository_is_rejected() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!("{}{}", fixture.config("octocat", ""), watch_toml("w")));
    let clients = MockClients::new(
        MockSource::new("octocat").with_missing(Repository::new("cilium", "tetragon")),
    );

    let err = validate(&path, &clients).await.err().expect("missing repo");
    let message = err.to_string();
    assert!(message.contains("unable to validate watch 'w'"), "{message}");
    let source = std::error::Error::source(&err).expect("watch error source");
    assert!(source.to_string().contains("cilium/tetragon"), "{source}");
}

#[tokio::test]
async fn offline_errors_fail_before_any_client_is_built() {
    let fixture = Fixture::new();
    let body = r#"
[[watches]]
name = "nofilter"
repos = [{ owner = "cilium", name = "cilium" }]
"#;
    let path = fixture.write(&fixture.config("octocat", body));
    let clients = MockClients::new(MockSource::new("octocat"));

    let err = validate(&path, &clients).await.err().expect("no filters");
    assert!(err.to_string().contains("nofilter"), "{err}");
    assert!(clients.tokens.lock().expect("tokens lock").is_empty());
}

#[tokio::test]
async fn duplicate_watch_names_are_rejected() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!(
        "{}{}{}",
        fixture.config("octocat", ""),
        watch_toml("twice"),
        watch_toml("twice")
    ));
    let clients = MockClients::new(MockSource::new("octocat"));

    let err = validate(&path, &clients).await.err().expect("duplicate");
    let source = std::error::Error::source(&err).expect("watch error source");
    assert_eq!(source.to_string(), "duplicate watch name");
}

#[tokio::test]
async fn empty_user_and_missing_pat_file_are_rejected() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!("{}{}", fixture.config("", ""), watch_toml("w")));
    let clients = MockClients::new(MockSource::new("octocat"));
    assert!(matches!(
        validate(&path, &clients).await,
        Err(ConfigError::EmptyUser)
    ));

    let path = fixture.write(&format!(
        "user = 'octocat'\npat_file = '{}'\n{}",
        fixture.path("absent").display(),
        watch_toml("w")
    ));
    assert!(matches!(
        validate(&path, &clients).await,
        Err(ConfigError::Secret { .. })
    ));
}

#[tokio::test]
async fn email_action_requires_email_section() {
    let fixture = Fixture::new();
    let path = fixture.write(&fixture.config("octocat", email_watch_toml()));
    let clients = MockClients::new(MockSource::new("octocat"));

    let err = validate(&path, &clients).await.err().expect("no email section");
    assert!(matches!(err, ConfigError::Email(EmailError::MissingSection)));
}

#[tokio::test]
async fn email_port_must_be_submission_or_smtps() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!(
        "{}{}",
        fixture.config("octocat", &email_section(&fixture, 25)),
        email_watch_toml()
    ));
    let clients = MockClients::new(MockSource::new("octocat"));

    let err = validate(&path, &clients).await.err().expect("bad port");
    assert!(matches!(err, ConfigError::Email(EmailError::BadPort(25))));
}

#[tokio::test]
async fn valid_email_section_tests_the_connection() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!(
        "{}{}",
        fixture.config("octocat", &email_section(&fixture, 465)),
        email_watch_toml()
    ));
    let clients = MockClients::new(MockSource::new("octocat"));

    let config = validate(&path, &clients).await.expect("valid email config");
    assert!(config.mailer.is_some());
    assert_eq!(
        config.watch("mail").expect("watch").actions.email_to.as_deref(),
        Some("me@example.com")
    );
    assert_eq!(*clients.mailer.connects.lock().expect("connects lock"), 1);
    let smtp = clients.smtp.lock().expect("smtp lock");
    assert_eq!(smtp.len(), 1);
    assert_eq!(smtp[0].host, "smtp.example.com");
    assert_eq!(smtp[0].port, 465);
    assert_eq!(smtp[0].password, "hunter2");
}

#[tokio::test]
async fn failed_mail_connection_is_rejected() {
    let fixture = Fixture::new();
    let path = fixture.write(&format!(
        "{}{}",
        fixture.config("octocat", &email_section(&fixture, 587)),
        email_watch_toml()
    ));
    let clients = MockClients::with_mailer(
        MockSource::new("octocat"),
        MockMailer {
            fail_connect: true,
            ..Default::default()
        },
    );

    let err = validate(&path, &clients).await.err().expect("connect fails");
    assert!(matches!(err, ConfigError::Email(EmailError::Mail(_))));
}

#[test]
fn unreadable_or_malformed_files_name_the_problem() {
    let fixture = Fixture::new();
    let missing = load_config(&fixture.path("nope.toml")).expect_err("missing file");
    assert!(missing.to_string().contains("failed to read config"), "{missing}");

    let path = fixture.write("user = [unterminated");
    let malformed = load_config(&path).expect_err("malformed file");
    assert!(malformed.to_string().contains("failed to parse config"), "{malformed}");
}
