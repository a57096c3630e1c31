//! Configuration loading and validation.
//!
//! The configuration is a human-owned TOML file. [`load_config`] only parses
//! it; [`Config::validate`] checks every rule, reads the referenced secret
//! files, talks to the issue tracker and mail server to prove the
//! credentials work, and produces a [`ValidatedConfig`] ready to schedule.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::item::{IssueState, Repository};
use crate::mail::{MailError, Mailer, SmtpSettings, SMTPS_PORT, SUBMISSION_PORT};
use crate::matching::{MatchCriteria, MatchError, Matcher};
use crate::source::{IssueFilter, ItemSource, SourceError};
use crate::watch::ClientFactory;

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level configuration as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Login the PAT must authenticate as.
    #[serde(default)]
    pub user: String,

    /// File whose first line is the personal access token.
    #[serde(default)]
    pub pat_file: String,

    /// Default poll interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// SMTP settings, needed only when a watch enables email.
    #[serde(default)]
    pub email: Option<EmailConfig>,

    /// Watch definitions.
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

/// SMTP sender settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Login and sender address.
    #[serde(default)]
    pub username: String,

    /// File whose first line is the SMTP password.
    #[serde(default)]
    pub password_file: String,

    /// SMTP host.
    #[serde(default)]
    pub host: String,

    /// 587 (STARTTLS) or 465 (TLS).
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

/// One watch as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Unique name, used as the poll key.
    #[serde(default)]
    pub name: String,

    /// Per-watch poll interval override in seconds.
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Repositories to poll.
    #[serde(default)]
    pub repos: Vec<Repository>,

    /// Label selectors over the item fields.
    #[serde(default)]
    pub selectors: Vec<String>,

    /// Labels every match must carry.
    #[serde(default)]
    pub required_labels: Vec<String>,

    /// Labels passed to the tracker's own search.
    #[serde(default)]
    pub search_labels: Vec<String>,

    /// Patterns over the lower-cased body.
    #[serde(default)]
    pub body_regex: Vec<String>,

    /// Patterns over the lower-cased title.
    #[serde(default)]
    pub title_regex: Vec<String>,

    /// Issue states passed to the tracker's own search.
    #[serde(default)]
    pub states: Vec<String>,

    /// Actions fired for each match.
    #[serde(default)]
    pub actions: ActionConfig,
}

/// Action switches for a watch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionConfig {
    /// Subscribe action.
    #[serde(default)]
    pub subscribe: SubscribeActionConfig,

    /// Email action.
    #[serde(default)]
    pub email: EmailActionConfig,
}

/// Subscribe action switch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeActionConfig {
    /// Whether to subscribe to matches.
    #[serde(default)]
    pub enabled: bool,
}

/// Email action switch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailActionConfig {
    /// Whether to email matches.
    #[serde(default)]
    pub enabled: bool,

    /// Recipient address.
    #[serde(default)]
    pub send_to: String,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_smtp_port() -> u16 {
    SUBMISSION_PORT
}

// ---------------------------------------------------------------------------
// Validated form
// ---------------------------------------------------------------------------

/// Which actions a watch fires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    /// Subscribe the viewer.
    pub subscribe: bool,
    /// Mail this recipient.
    pub email_to: Option<String>,
}

impl ActionSet {
    /// Whether no action is enabled.
    pub fn is_empty(&self) -> bool {
        !self.subscribe && self.email_to.is_none()
    }
}

/// A validated watch, ready to schedule.
#[derive(Debug, Clone)]
pub struct WatchDefinition {
    /// Unique name, used as the poll key.
    pub name: String,
    /// Repositories to poll, in configured order.
    pub repositories: Vec<Repository>,
    /// Filter the tracker evaluates natively.
    pub filter: IssueFilter,
    /// Client-side predicates.
    pub matcher: Arc<Matcher>,
    /// Poll interval, never zero.
    pub interval: Duration,
    /// Actions fired for each match.
    pub actions: ActionSet,
}

/// A configuration that passed every check, with the clients it proved.
pub struct ValidatedConfig {
    /// Authenticated login.
    pub user: String,
    /// Default poll interval.
    pub interval: Duration,
    /// Issue tracker client authenticated with the configured PAT.
    pub source: Arc<dyn ItemSource>,
    /// Mailer, present when a watch enables email.
    pub mailer: Option<Arc<dyn Mailer>>,
    /// Watches, in configured order.
    pub watches: Vec<WatchDefinition>,
}

impl ValidatedConfig {
    /// Look up a watch by name.
    pub fn watch(&self, name: &str) -> Option<&WatchDefinition> {
        self.watches.iter().find(|w| w.name == name)
    }

    /// Watch names, in configured order.
    pub fn watch_names(&self) -> Vec<&str> {
        self.watches.iter().map(|w| w.name.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration rejected by validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `user` is blank.
    #[error("user cannot be empty")]
    EmptyUser,
    /// `pat_file` is blank.
    #[error("pat file cannot be empty")]
    EmptyPatFile,
    /// A secret file could not be read.
    #[error("unable to read secret from {path}: {source}")]
    Secret {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// No watches configured.
    #[error("expected at least one watch")]
    NoWatches,
    /// Default interval is zero.
    #[error("interval must be greater than zero")]
    ZeroInterval,
    /// The tracker client could not be built.
    #[error("unable to create issue tracker client: {0}")]
    Client(#[source] SourceError),
    /// The PAT was rejected.
    #[error("unable to validate pat: {0}")]
    Identity(#[source] SourceError),
    /// The PAT belongs to someone else.
    #[error("configured user '{configured}' does not match PAT user '{actual}'")]
    UserMismatch {
        /// Configured login.
        configured: String,
        /// Login the PAT resolved to.
        actual: String,
    },
    /// A watch failed validation.
    #[error("unable to validate watch '{name}': {source}")]
    Watch {
        /// Watch name as configured.
        name: String,
        /// What was wrong.
        #[source]
        source: WatchError,
    },
    /// The SMTP section failed validation.
    #[error("unable to validate email sender config: {0}")]
    Email(#[source] EmailError),
}

/// A single watch failed validation.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// `name` is blank.
    #[error("name cannot be empty")]
    EmptyName,
    /// Another watch already uses this name.
    #[error("duplicate watch name")]
    DuplicateName,
    /// `repos` is empty.
    #[error("expected at least one repository")]
    NoRepositories,
    /// No selector, label, pattern or state configured.
    #[error("expected at least one filter type")]
    NoFilters,
    /// Per-watch interval is zero.
    #[error("interval must be greater than zero")]
    ZeroInterval,
    /// A repository lookup failed.
    #[error("unable to validate repository {repo}: {source}")]
    Repository {
        /// Repository that failed.
        repo: Repository,
        /// Lookup failure.
        #[source]
        source: SourceError,
    },
    /// A selector or pattern is invalid.
    #[error(transparent)]
    Match(#[from] MatchError),
    /// A state is not `OPEN` or `CLOSED`.
    #[error("unknown issue state {0}")]
    UnknownState(String),
    /// Email action enabled without a recipient.
    #[error("send_to cannot be empty if email action is enabled")]
    MissingRecipient,
}

/// The SMTP section failed validation.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// No `[email]` section although a watch enables email.
    #[error("an email action is enabled but no [email] section is configured")]
    MissingSection,
    /// `username` is blank.
    #[error("username cannot be empty")]
    EmptyUsername,
    /// `password_file` is blank.
    #[error("password file cannot be empty")]
    EmptyPasswordFile,
    /// Password file unreadable.
    #[error("unable to read password from {path}: {source}")]
    Secret {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// `host` is blank.
    #[error("host cannot be empty")]
    EmptyHost,
    /// Port is not 587 or 465.
    #[error("port must be 587 (STARTTLS) or 465 (TLS), got {0}")]
    BadPort(u16),
    /// Building or testing the transport failed.
    #[error("unable to validate email config with dial: {0}")]
    Mail(#[source] MailError),
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every rule and prove the credentials work.
    ///
    /// Offline checks run first so a broken file fails without touching the
    /// network.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub async fn validate(&self, clients: &dyn ClientFactory) -> Result<ValidatedConfig, ConfigError> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::EmptyUser);
        }
        if self.pat_file.trim().is_empty() {
            return Err(ConfigError::EmptyPatFile);
        }
        let pat = read_first_line(&self.pat_file).map_err(|source| ConfigError::Secret {
            path: self.pat_file.clone(),
            source,
        })?;
        if self.watches.is_empty() {
            return Err(ConfigError::NoWatches);
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        let default_interval = Duration::from_secs(self.interval_secs);

        let mut names = HashSet::new();
        let mut prepared = Vec::with_capacity(self.watches.len());
        for watch in &self.watches {
            let def = watch
                .prepare(default_interval)
                .and_then(|def| {
                    if names.insert(def.name.clone()) {
                        Ok(def)
                    } else {
                        Err(WatchError::DuplicateName)
                    }
                })
                .map_err(|source| ConfigError::Watch {
                    name: watch.name.clone(),
                    source,
                })?;
            prepared.push(def);
        }

        let source = clients.item_source(&pat).map_err(ConfigError::Client)?;
        let actual = source.who_am_i().await.map_err(ConfigError::Identity)?;
        if actual != self.user {
            return Err(ConfigError::UserMismatch {
                configured: self.user.clone(),
                actual,
            });
        }

        for def in &prepared {
            for repo in &def.repositories {
                source
                    .check_repository(repo)
                    .await
                    .map_err(|e| ConfigError::Watch {
                        name: def.name.clone(),
                        source: WatchError::Repository {
                            repo: repo.clone(),
                            source: e,
                        },
                    })?;
            }
        }

        let mailer = if prepared.iter().any(|w| w.actions.email_to.is_some()) {
            let email = self
                .email
                .as_ref()
                .ok_or(ConfigError::Email(EmailError::MissingSection))?;
            Some(email.connect(clients).await.map_err(ConfigError::Email)?)
        } else {
            None
        };

        debug!(user = %actual, watches = prepared.len(), "configuration validated");
        Ok(ValidatedConfig {
            user: actual,
            interval: default_interval,
            source,
            mailer,
            watches: prepared,
        })
    }
}

impl WatchConfig {
    /// Offline checks; builds the definition without contacting the tracker.
    fn prepare(&self, default_interval: Duration) -> Result<WatchDefinition, WatchError> {
        if self.name.trim().is_empty() {
            return Err(WatchError::EmptyName);
        }
        if self.repos.is_empty() {
            return Err(WatchError::NoRepositories);
        }
        if self.selectors.is_empty()
            && self.required_labels.is_empty()
            && self.body_regex.is_empty()
            && self.title_regex.is_empty()
            && self.states.is_empty()
        {
            return Err(WatchError::NoFilters);
        }
        let interval = match self.interval_secs {
            Some(0) => return Err(WatchError::ZeroInterval),
            Some(secs) => Duration::from_secs(secs),
            None => default_interval,
        };

        let matcher = Matcher::build(&MatchCriteria {
            selectors: self.selectors.clone(),
            body_patterns: self.body_regex.clone(),
            title_patterns: self.title_regex.clone(),
            required_labels: self.required_labels.clone(),
        })?;

        let states = self
            .states
            .iter()
            .map(|s| IssueState::parse(s).ok_or_else(|| WatchError::UnknownState(s.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let email = &self.actions.email;
        if email.enabled && email.send_to.trim().is_empty() {
            return Err(WatchError::MissingRecipient);
        }

        Ok(WatchDefinition {
            name: self.name.clone(),
            repositories: self.repos.clone(),
            filter: IssueFilter {
                labels: self.search_labels.clone(),
                states,
            },
            matcher: Arc::new(matcher),
            interval,
            actions: ActionSet {
                subscribe: self.actions.subscribe.enabled,
                email_to: email.enabled.then(|| email.send_to.clone()),
            },
        })
    }
}

impl EmailConfig {
    async fn connect(&self, clients: &dyn ClientFactory) -> Result<Arc<dyn Mailer>, EmailError> {
        if self.username.trim().is_empty() {
            return Err(EmailError::EmptyUsername);
        }
        if self.password_file.trim().is_empty() {
            return Err(EmailError::EmptyPasswordFile);
        }
        let password = read_first_line(&self.password_file).map_err(|source| EmailError::Secret {
            path: self.password_file.clone(),
            source,
        })?;
        if self.host.trim().is_empty() {
            return Err(EmailError::EmptyHost);
        }
        if self.port != SUBMISSION_PORT && self.port != SMTPS_PORT {
            return Err(EmailError::BadPort(self.port));
        }

        let mailer = clients
            .mailer(&SmtpSettings {
                username: self.username.clone(),
                password,
                host: self.host.clone(),
                port: self.port,
            })
            .map_err(EmailError::Mail)?;
        mailer.test_connection().await.map_err(EmailError::Mail)?;
        Ok(mailer)
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Load the configuration from a TOML file. No validation.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Expand a leading `~/` to the home directory.
///
/// # Errors
///
/// Returns an error if the path starts with `~/` and the home directory
/// cannot be determined.
pub fn expand_home(path: &str) -> std::io::Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = directories::BaseDirs::new().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "cannot determine home directory")
            })?;
            Ok(home.home_dir().join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// First line of the file at `path`, trimmed.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_first_line(path: &str) -> std::io::Result<String> {
    let contents = std::fs::read_to_string(expand_home(path)?)?;
    Ok(contents.lines().next().unwrap_or_default().trim().to_owned())
}

/// Default directory for daily log files (`~/.issuewatch/logs`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_logs_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".issuewatch").join("logs"))
}
