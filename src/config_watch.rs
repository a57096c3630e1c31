//! Stream of validated configurations, reloaded when the file changes.
//!
//! The initial load must succeed. After that a [`notify`] watcher on the
//! file's directory triggers a reload on every modify or create event for
//! the file; each successful reload is sent on the stream, and a failed one
//! is logged and counted while the previous configuration stays live.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{expand_home, load_config, ValidatedConfig};
use crate::metrics::{Counter, MetricsSink};
use crate::watch::ClientFactory;

/// Quiet period after a change event before reloading, so one save that
/// produces several events triggers one reload.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Pending validated configurations.
const UPDATE_BUFFER: usize = 4;

/// Load, parse and validate the configuration at `path`.
///
/// Counts [`Counter::ConfigLoad`] on every attempt and
/// [`Counter::ConfigLoadError`] on failure.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub async fn load_validated(
    path: &Path,
    clients: &dyn ClientFactory,
    metrics: &dyn MetricsSink,
) -> anyhow::Result<ValidatedConfig> {
    let label = path.display().to_string();
    metrics.increment(Counter::ConfigLoad, &label);

    let result = match load_config(path) {
        Ok(config) => config
            .validate(clients)
            .await
            .context("unable to validate config"),
        Err(e) => Err(e),
    };
    if result.is_err() {
        metrics.increment(Counter::ConfigLoadError, &label);
    }
    result
}

/// Live configuration stream. Dropping it stops the file watcher.
pub struct ConfigStream {
    /// Validated configurations, the initial one first.
    pub updates: mpsc::Receiver<ValidatedConfig>,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Load `path` once, then keep reloading it on change.
///
/// # Errors
///
/// Returns an error if the initial load fails or the file watcher cannot
/// be set up.
pub async fn spawn_config_stream(
    path: &Path,
    clients: Arc<dyn ClientFactory>,
    metrics: Arc<dyn MetricsSink>,
) -> anyhow::Result<ConfigStream> {
    let path = resolve(path)?;

    debug!(path = %path.display(), "attempting initial load of config file");
    let initial = load_validated(&path, clients.as_ref(), metrics.as_ref())
        .await
        .context("unable to load initial config file")?;

    let (updates_tx, updates) = mpsc::channel(UPDATE_BUFFER);
    updates_tx
        .send(initial)
        .await
        .map_err(|_| anyhow::anyhow!("configuration receiver dropped"))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
    let file_name = path.file_name().map(ToOwned::to_owned);
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(evt) => {
                let relevant = matches!(evt.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && evt
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(ToOwned::to_owned) == file_name);
                if relevant && event_tx.send(()).is_err() {
                    debug!("config event receiver closed");
                }
            }
            Err(e) => warn!(error = %e, "config watcher error"),
        }
    })?;

    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("unable to watch {}", dir.display()))?;
    info!(path = %path.display(), "watching config file");

    let task = tokio::spawn(async move {
        while event_rx.recv().await.is_some() {
            tokio::time::sleep(DEBOUNCE).await;
            while event_rx.try_recv().is_ok() {}

            info!(path = %path.display(), "config file changed");
            match load_validated(&path, clients.as_ref(), metrics.as_ref()).await {
                Ok(config) => {
                    if updates_tx.send(config).await.is_err() {
                        debug!("configuration receiver dropped, stopping reloads");
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %format!("{e:#}"),
                        "unable to handle config change, keeping previous config"
                    );
                }
            }
        }
    });

    Ok(ConfigStream {
        updates,
        _watcher: watcher,
        task,
    })
}

fn resolve(path: &Path) -> anyhow::Result<PathBuf> {
    let expanded = match path.to_str() {
        Some(s) => expand_home(s)?,
        None => path.to_path_buf(),
    };
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    Ok(cwd.join(expanded))
}
