//! issuewatch CLI entry point.
//!
//! `watch` runs until interrupted; every other subcommand is a one-shot
//! check against the configuration file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use issuewatch::config::{load_config, read_first_line, DEFAULT_CONFIG_FILE};
use issuewatch::config_watch::{load_validated, spawn_config_stream};
use issuewatch::logging::{self, LogOptions};
use issuewatch::metrics::Metrics;
use issuewatch::watch::{
    authenticate, check_repositories, collect_matches, ClientFactory, GitHubClients,
    RepositoryCheck, Watcher,
};

/// Exit code for `check` when a configured repository does not exist.
const EXIT_NOT_FOUND: u8 = 2;

/// issuewatch: subscribe to and mail new issues matching your watches.
#[derive(Parser)]
#[command(name = "issuewatch", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Emit JSON-formatted log lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Prefix log lines with timestamps.
    #[arg(long, global = true)]
    log_time: bool,

    /// Enable debug log messages.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Directory for daily JSON log files written by `watch`.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Times a failed tracker request is retried.
    #[arg(long, global = true, default_value_t = 3)]
    gh_retries: u32,

    /// Maximum seconds a single tracker request may take.
    #[arg(long, global = true, default_value_t = 300)]
    gh_timeout: u64,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Watch the tracker and act on new matches until interrupted.
    Watch,
    /// Load and fully validate the configuration file.
    ValidateConfig,
    /// Test authentication for the configured PAT.
    Whoami,
    /// Check every configured repository exists. Exits 2 if one does not.
    Check,
    /// Print the items currently matching a watch as a JSON array.
    List {
        /// Name of the watch.
        watch: String,
    },
    /// Print version and exit.
    Version,
}

impl Cli {
    fn log_options(&self) -> LogOptions {
        LogOptions {
            json: self.log_json,
            show_time: self.log_time,
            verbose: self.verbose,
        }
    }

    fn clients(&self, metrics: Arc<Metrics>) -> GitHubClients {
        GitHubClients::new(Duration::from_secs(self.gh_timeout), self.gh_retries, metrics)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Watch => handle_watch(&cli).await,
        Command::ValidateConfig => handle_validate(&cli).await,
        Command::Whoami => handle_whoami(&cli).await,
        Command::Check => handle_check(&cli).await,
        Command::List { watch } => handle_list(&cli, watch).await,
        Command::Version => {
            println!("issuewatch {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run the watcher until ctrl-c.
async fn handle_watch(cli: &Cli) -> anyhow::Result<ExitCode> {
    let logs_dir = match &cli.log_dir {
        Some(dir) => dir.clone(),
        None => issuewatch::config::default_logs_dir()?,
    };
    let _logging_guard = logging::init_with_file(cli.log_options(), &logs_dir)?;
    info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "issuewatch starting");

    let metrics = Arc::new(Metrics::new());
    let clients: Arc<dyn ClientFactory> = Arc::new(cli.clients(Arc::clone(&metrics)));

    let mut stream = spawn_config_stream(&cli.config, clients, metrics.clone()).await?;
    let mut watcher = Watcher::new(metrics.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "unable to listen for ctrl-c");
        }
    };
    let result = watcher.run(&mut stream.updates, shutdown).await;

    info!(counters = %metrics.render(), "issuewatch stopped");
    result.map(|()| ExitCode::SUCCESS)
}

/// Load and validate the configuration.
async fn handle_validate(cli: &Cli) -> anyhow::Result<ExitCode> {
    logging::init_cli(cli.log_options());
    let metrics = Arc::new(Metrics::new());
    let clients = cli.clients(metrics.clone());

    let config = load_validated(&cli.config, &clients, metrics.as_ref()).await?;
    info!(watches = ?config.watch_names(), "config is valid");
    Ok(ExitCode::SUCCESS)
}

/// Authenticate with the configured PAT and greet the user.
async fn handle_whoami(cli: &Cli) -> anyhow::Result<ExitCode> {
    logging::init_cli(cli.log_options());
    let config = load_config(&cli.config)?;
    if config.user.is_empty() {
        anyhow::bail!("need both user and pat");
    }
    let pat = read_first_line(&config.pat_file)
        .with_context(|| format!("unable to read PAT from pat file {}", config.pat_file))?;
    if pat.is_empty() {
        anyhow::bail!("need both user and pat");
    }

    let source = cli.clients(Arc::new(Metrics::new())).item_source(&pat)?;
    let login = authenticate(source.as_ref(), &config.user).await?;

    info!("Hello {login}!");
    Ok(ExitCode::SUCCESS)
}

/// Verify the PAT, then that every configured repository exists.
async fn handle_check(cli: &Cli) -> anyhow::Result<ExitCode> {
    logging::init_cli(cli.log_options());
    let config = load_config(&cli.config)?;
    let pat = read_first_line(&config.pat_file)
        .with_context(|| format!("unable to read PAT from pat file {}", config.pat_file))?;
    let source = cli.clients(Arc::new(Metrics::new())).item_source(&pat)?;

    match check_repositories(&config, source.as_ref()).await? {
        RepositoryCheck::AllFound => Ok(ExitCode::SUCCESS),
        RepositoryCheck::Missing { .. } => Ok(ExitCode::from(EXIT_NOT_FOUND)),
    }
}

/// Print every item currently matching `name`.
async fn handle_list(cli: &Cli, name: &str) -> anyhow::Result<ExitCode> {
    logging::init_cli(cli.log_options());
    let metrics = Arc::new(Metrics::new());
    let clients = cli.clients(metrics.clone());
    let config = load_validated(&cli.config, &clients, metrics.as_ref()).await?;

    let watch = config
        .watch(name)
        .ok_or_else(|| anyhow::anyhow!("unknown watch with name '{name}'"))?;
    let items = collect_matches(watch, config.source.as_ref())
        .await
        .context("unable to list issues")?;

    println!("{}", serde_json::to_string(&items)?);
    Ok(ExitCode::SUCCESS)
}
