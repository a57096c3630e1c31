//! Dynamic poll scheduler.
//!
//! Keeps a set of named periodic tasks, one tokio task each. Tasks can be
//! added, replaced, deleted and stopped at runtime; every mutation that stops
//! a task waits for that task to acknowledge before returning, so at most one
//! task per name is ever running.
//!
//! The scheduler is owned by a single driver (`&mut self` on every mutating
//! call), which serializes mutations without an internal lock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Future returned by a tick callback.
pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked on every tick with the tick time.
pub type TickCallback = Arc<dyn Fn(DateTime<Utc>) -> TickFuture + Send + Sync>;

/// Wrap an async closure as a [`TickCallback`].
pub fn tick_callback<F, Fut>(f: F) -> TickCallback
where
    F: Fn(DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |now| Box::pin(f(now)))
}

/// Errors returned by scheduler mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// A poll was registered with a zero interval.
    #[error("poll '{name}' has a zero interval")]
    ZeroInterval {
        /// Poll name.
        name: String,
    },
    /// The scheduler has been stopped and accepts no new polls.
    #[error("scheduler is stopped")]
    Stopped,
}

struct PollTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    interval: Duration,
}

/// Named set of periodic poll tasks.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: HashMap<String, PollTask>,
    stopped: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Empty scheduler.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: HashMap::new(),
            stopped: false,
        }
    }

    /// Register `name` to run `callback` every `interval`.
    ///
    /// An existing task under the same name is stopped, and its exit
    /// awaited, before the new task starts. With `fire_immediately` the
    /// callback runs once right away; the first periodic tick always comes
    /// one full interval after the task starts.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ZeroInterval`] if `interval` is zero and
    /// [`SchedulerError::Stopped`] after [`Self::stop_all`]. Neither case
    /// touches the running task set.
    pub async fn add(
        &mut self,
        name: &str,
        interval: Duration,
        callback: TickCallback,
        fire_immediately: bool,
    ) -> Result<(), SchedulerError> {
        if self.stopped {
            return Err(SchedulerError::Stopped);
        }
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval {
                name: name.to_owned(),
            });
        }

        if let Some(old) = self.tasks.remove(name) {
            debug!(watch = name, "replacing running poll");
            stop_task(name, old).await;
        }

        let (cancel, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run_poll(
            name.to_owned(),
            interval,
            callback,
            fire_immediately,
            cancel_rx,
            self.shutdown.subscribe(),
        ));
        self.tasks.insert(
            name.to_owned(),
            PollTask {
                cancel,
                handle,
                interval,
            },
        );
        info!(
            watch = name,
            interval_secs = interval.as_secs_f64(),
            fire_immediately,
            "poll added"
        );
        Ok(())
    }

    /// Stop and remove `name`, waiting for its task to exit.
    ///
    /// Unknown names are logged and ignored.
    pub async fn delete(&mut self, name: &str) {
        match self.tasks.remove(name) {
            Some(task) => {
                stop_task(name, task).await;
                info!(watch = name, "poll deleted");
            }
            None => warn!(watch = name, "delete requested for unknown poll"),
        }
    }

    /// Names of every running poll, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Interval of a running poll.
    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        self.tasks.get(name).map(|t| t.interval)
    }

    /// Whether [`Self::stop_all`] has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Signal every task to stop and wait for all of them.
    ///
    /// Terminal and idempotent: later calls return immediately and later
    /// [`Self::add`] calls fail with [`SchedulerError::Stopped`].
    pub async fn stop_all(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.shutdown.send_replace(true);

        let count = self.tasks.len();
        for (name, task) in self.tasks.drain() {
            if let Err(e) = task.handle.await {
                warn!(watch = %name, error = %e, "poll task did not exit cleanly");
            }
        }
        info!(count, "all polls stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn stop_task(name: &str, task: PollTask) {
    // The receiver is gone if the task already exited.
    let _ = task.cancel.send(());
    if let Err(e) = task.handle.await {
        warn!(watch = name, error = %e, "poll task did not exit cleanly");
    }
}

async fn run_poll(
    name: String,
    period: Duration,
    callback: TickCallback,
    fire_immediately: bool,
    mut cancel: oneshot::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first immediate tick.
    interval.tick().await;

    if fire_immediately {
        run_tick(&name, &callback).await;
    }

    loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!(watch = %name, "poll cancelled");
                break;
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    debug!(watch = %name, "poll shutting down");
                    break;
                }
            }
            _ = interval.tick() => {
                run_tick(&name, &callback).await;
            }
        }
    }
}

async fn run_tick(name: &str, callback: &TickCallback) {
    let fut = callback(Utc::now());
    if let Err(e) = tokio::spawn(fut).await {
        error!(watch = name, error = %e, "poll callback panicked");
    }
}
