//! Migration commands.
//!
//! [`Lift`] ties the project layout, the configuration and the engine
//! together; each command is implemented in its own submodule:
//! - `up`: apply pending migrations
//! - `down`: roll back applied migrations
//! - `create`: save the schema source as a new migration
//! - `watch`: live mode against the ephemeral history
//! - `status`: local history against the database

mod create;
mod down;
mod status;
mod up;
mod watch;

pub use create::{SaveOptions, SaveOutcome};
pub use down::{DownOptions, DownSummary};
pub use status::{MigrationStatus, StatusEntry, StatusReport};
pub use up::{UpOptions, UpSummary};
pub use watch::WatchSession;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::apply::ApplyController;
use crate::clock::{Clock, TokioClock};
use crate::config::Config;
use crate::engine::{ListMigrationsInput, MigrationEngine};
use crate::error::{LiftError, LiftResult};
use crate::hooks::{HookRunner, ProcessHookRunner};
use crate::lockfile::{LockFile, LockStore};
use crate::migration::{Migration, RemoteMigration};
use crate::report::{Reporter, SilentReporter};
use crate::store::MigrationStore;

/// A project: schema source, migrations directory and engine.
pub struct Lift<E> {
    project_dir: PathBuf,
    config: Config,
    engine: Arc<E>,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn HookRunner>,
    reporter: Arc<dyn Reporter>,
}

impl<E> Lift<E>
where
    E: MigrationEngine,
{
    pub fn new(project_dir: impl Into<PathBuf>, config: Config, engine: E) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
            engine: Arc::new(engine),
            clock: Arc::new(TokioClock::new()),
            hooks: Arc::new(ProcessHookRunner),
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn schema_path(&self) -> PathBuf {
        self.project_dir.join(&self.config.schema)
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.project_dir.join(&self.config.migrations_dir)
    }

    /// Shut the engine down. Call once when the command is finished.
    pub async fn stop(&self) {
        self.engine.stop().await;
    }

    fn store(&self) -> MigrationStore {
        MigrationStore::new(self.migrations_dir())
    }

    fn dev_store(&self) -> MigrationStore {
        MigrationStore::dev(&self.migrations_dir())
    }

    fn lock_store(&self) -> LockStore {
        LockStore::new(&self.migrations_dir())
    }

    fn read_schema(&self) -> LiftResult<String> {
        let path = self.schema_path();
        std::fs::read_to_string(&path).map_err(|e| LiftError::io(path, e))
    }

    /// Lock file and permanent history. Refuses an unresolved lock conflict
    /// before anything else is read.
    fn load_local(&self) -> LiftResult<(LockFile, Vec<Migration>)> {
        let lock = self.lock_store().load()?;
        let local = self.store().load()?;
        lock.report_untracked(&local);
        Ok((lock, local))
    }

    async fn list_remote(&self, source_config: &str) -> LiftResult<Vec<RemoteMigration>> {
        let remote = self
            .engine
            .list_applied_migrations(ListMigrationsInput {
                source_config: source_config.to_string(),
            })
            .await?;
        debug!(count = remote.len(), "listed applied migrations");
        Ok(remote)
    }

    fn apply_controller<'a>(&'a self, reporter: &'a dyn Reporter) -> ApplyController<'a, E> {
        ApplyController::new(&*self.engine, &*self.clock, &*self.hooks, reporter)
            .with_policy(self.config.apply.poll_policy())
            .with_hook_policy(self.config.hooks.on_failure)
    }
}

/// `350ms`, `1.2s`, `2m 5s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

fn count_migrations(n: usize) -> String {
    if n == 1 {
        "1 migration".to_string()
    } else {
        format!("{} migrations", n)
    }
}
