//! Bundle progress monitoring.
//!
//! A bundle is complete once every task in it has written at least one
//! output. Progress is observed by polling the database: count the tasks,
//! count the tasks with outputs, sleep, and count again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AstraConfig;
use crate::storage::{Database, DatabaseError};

/// Errors that can occur while watching a bundle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Timed out with {completed} of {total} tasks complete")]
    TimedOut { completed: i64, total: i64 },

    #[error("Monitor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Snapshot of a bundle's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleProgress {
    pub bundle_id: i64,
    /// Tasks with at least one output.
    pub completed: i64,
    pub total: i64,
    /// Time since watching started.
    pub elapsed: Duration,
}

impl BundleProgress {
    fn new(bundle_id: i64) -> Self {
        Self {
            bundle_id,
            completed: 0,
            total: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Completed share of the bundle; an empty bundle counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total > 0 {
            (self.completed as f64 / self.total as f64).min(1.0)
        } else {
            1.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Polls a bundle until all of its tasks have outputs.
#[derive(Debug, Clone)]
pub struct BundleWatcher {
    /// Time between polls.
    pub interval: Duration,
    /// Give up after this long.
    pub timeout: Option<Duration>,
}

impl Default for BundleWatcher {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

impl BundleWatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    pub fn from_config(config: &AstraConfig) -> Self {
        Self::new(config.watch_interval())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Watches a bundle, logging progress as it increases.
    pub async fn watch(&self, db: &Database, bundle_id: i64) -> Result<BundleProgress, MonitorError> {
        self.watch_with(db, bundle_id, |progress| {
            tracing::info!(
                bundle_id = progress.bundle_id,
                completed = progress.completed,
                total = progress.total,
                progress_pct = format!("{:.1}%", progress.fraction() * 100.0),
                elapsed_secs = progress.elapsed.as_secs(),
                "Bundle progress"
            );
        })
        .await
    }

    /// Watches a bundle, calling `on_progress` with the first reading and
    /// then whenever the completed count increases.
    pub async fn watch_with<F>(
        &self,
        db: &Database,
        bundle_id: i64,
        on_progress: F,
    ) -> Result<BundleProgress, MonitorError>
    where
        F: FnMut(&BundleProgress),
    {
        let stop = AtomicBool::new(false);
        self.poll(db, bundle_id, on_progress, &stop).await
    }

    async fn poll<F>(
        &self,
        db: &Database,
        bundle_id: i64,
        mut on_progress: F,
        stop: &AtomicBool,
    ) -> Result<BundleProgress, MonitorError>
    where
        F: FnMut(&BundleProgress),
    {
        let start = Instant::now();
        let mut progress = BundleProgress::new(bundle_id);
        progress.total = db.count_tasks(bundle_id).await?;
        progress.completed = db.count_tasks_with_outputs(bundle_id).await?;
        on_progress(&progress);

        while !progress.is_complete() {
            if stop.load(Ordering::Relaxed) {
                tracing::debug!(bundle_id, "Bundle watch stopped");
                break;
            }

            let elapsed = start.elapsed();
            let mut pause = self.interval;
            if let Some(timeout) = self.timeout {
                if elapsed >= timeout {
                    return Err(MonitorError::TimedOut {
                        completed: progress.completed,
                        total: progress.total,
                    });
                }
                pause = pause.min(timeout - elapsed);
            }
            tokio::time::sleep(pause).await;

            let completed = db.count_tasks_with_outputs(bundle_id).await?;
            if completed > progress.completed {
                progress.completed = completed;
                progress.elapsed = start.elapsed();
                on_progress(&progress);
            }
        }

        progress.elapsed = start.elapsed();
        Ok(progress)
    }
}

/// A background task that watches a bundle and publishes its progress.
///
/// Call [`BundleMonitor::stop`] to cancel or [`BundleMonitor::wait`] to
/// wait for the bundle to finish.
pub struct BundleMonitor {
    stop_flag: Arc<AtomicBool>,
    receiver: watch::Receiver<BundleProgress>,
    handle: Option<JoinHandle<Result<BundleProgress, MonitorError>>>,
}

impl BundleMonitor {
    /// Start watching `bundle_id` in a tokio task.
    pub fn spawn(db: Database, bundle_id: i64, watcher: BundleWatcher) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let (sender, receiver) = watch::channel(BundleProgress::new(bundle_id));

        let handle = tokio::spawn(async move {
            watcher
                .poll(
                    &db,
                    bundle_id,
                    |progress| {
                        sender.send_replace(progress.clone());
                    },
                    &flag,
                )
                .await
        });

        Self {
            stop_flag,
            receiver,
            handle: Some(handle),
        }
    }

    /// Latest published progress.
    pub fn progress(&self) -> BundleProgress {
        self.receiver.borrow().clone()
    }

    /// A receiver that is notified whenever progress changes.
    pub fn subscribe(&self) -> watch::Receiver<BundleProgress> {
        self.receiver.clone()
    }

    /// Waits for the watcher to finish.
    pub async fn wait(mut self) -> Result<BundleProgress, MonitorError> {
        match self.handle.take() {
            Some(handle) => handle.await?,
            None => Ok(self.progress()),
        }
    }

    /// Signals the watcher to stop and waits for it to finish.
    ///
    /// Returns the last progress seen.
    pub async fn stop(self) -> Result<BundleProgress, MonitorError> {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.wait().await
    }
}

impl Drop for BundleMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
