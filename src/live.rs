//! Live Migration Loop.
//!
//! One task runs passes strictly one after another. Triggers go through a
//! channel of capacity one: a trigger arriving while a pass runs queues a
//! single follow-up pass, further triggers coalesce into it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_full::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{LiftError, LiftResult};
use crate::migration::MigrationId;

/// What one live pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The schema source produced no new steps.
    Unchanged,
    Applied(MigrationId),
}

/// One evaluation of the schema source.
#[async_trait]
pub trait LivePass: Send + Sync + 'static {
    async fn run_pass(&self) -> LiftResult<PassOutcome>;
}

/// Requests a pass. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Trigger(mpsc::Sender<()>);

impl Trigger {
    /// `true` if a pass was queued, `false` if one was already waiting.
    pub fn fire(&self) -> bool {
        self.0.try_send(()).is_ok()
    }
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    pub passes: usize,
    pub applied: usize,
    pub failed: usize,
}

/// Owned handle to a running live loop.
pub struct LiveHandle {
    trigger: Trigger,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<LiveStats>,
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl LiveHandle {
    /// Spawn the loop. No pass runs until the first trigger.
    pub fn start<P: LivePass>(pass: Arc<P>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(pass, rx, stop_rx));
        Self {
            trigger: Trigger(tx),
            stop: Some(stop_tx),
            task,
            debouncer: None,
        }
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Fire a pass whenever `path` changes, after `debounce` of quiet.
    ///
    /// Watches the parent directory so editors that replace the file on
    /// save keep triggering.
    pub fn watch_file(&mut self, path: &Path, debounce: Duration) -> LiftResult<()> {
        let file_name = path
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| LiftError::Watch(format!("{} is not a file", path.display())))?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let trigger = self.trigger();
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let touched = events.iter().any(|event| {
                        event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    });
                    if touched {
                        let queued = trigger.fire();
                        debug!(queued, "schema source changed");
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!("file watcher: {}", e);
                    }
                }
            }
        })
        .map_err(|e| LiftError::Watch(e.to_string()))?;

        debouncer
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| LiftError::Watch(format!("{}: {}", dir.display(), e)))?;
        self.debouncer = Some(debouncer);
        Ok(())
    }

    /// Stop watching, let an in-flight pass finish, and drop any queued one.
    pub async fn stop(mut self) -> LiveStats {
        self.debouncer.take();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("live loop task failed: {}", e);
                LiveStats::default()
            }
        }
    }
}

async fn run_loop<P: LivePass>(
    pass: Arc<P>,
    mut triggers: mpsc::Receiver<()>,
    mut stop: oneshot::Receiver<()>,
) -> LiveStats {
    let mut stats = LiveStats::default();
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            next = triggers.recv() => {
                if next.is_none() {
                    break;
                }
                stats.passes += 1;
                match pass.run_pass().await {
                    Ok(PassOutcome::Applied(id)) => {
                        stats.applied += 1;
                        info!(id = %id, "live migration applied");
                    }
                    Ok(PassOutcome::Unchanged) => debug!("no schema changes"),
                    Err(e) => {
                        stats.failed += 1;
                        error!("live pass failed: {}", e);
                    }
                }
            }
        }
    }
    stats
}
