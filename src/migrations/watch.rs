//! Live mode: apply every schema edit as an ephemeral migration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Lift, UpOptions};
use crate::engine::MigrationEngine;
use crate::error::LiftResult;
use crate::generate::GeneratorPipeline;
use crate::live::{LiveHandle, LivePass, PassOutcome};
use crate::migration::{LocalMigrationWithDatabaseSteps, Migration, MigrationId};
use crate::report::SilentReporter;
use crate::store::migration_file_map;

#[derive(Debug, Default)]
struct LiveState {
    /// Last snapshot the database was migrated to, permanent or ephemeral.
    last: Option<Migration>,
    /// Last schema source a pass finished with, even one without steps.
    last_source: Option<String>,
}

/// The pass the live loop runs on every schema change.
pub struct WatchSession<E> {
    lift: Arc<Lift<E>>,
    generators: GeneratorPipeline,
    state: Mutex<LiveState>,
}

impl<E> WatchSession<E>
where
    E: MigrationEngine + 'static,
{
    fn new(lift: Arc<Lift<E>>, last: Option<Migration>) -> Self {
        let generators =
            GeneratorPipeline::new(lift.config.generators.clone(), lift.project_dir.clone());
        Self {
            lift,
            generators,
            state: Mutex::new(LiveState {
                last,
                last_source: None,
            }),
        }
    }
}

#[async_trait]
impl<E> LivePass for WatchSession<E>
where
    E: MigrationEngine + 'static,
{
    async fn run_pass(&self) -> LiftResult<PassOutcome> {
        let mut state = self.state.lock().await;
        let lift = &self.lift;

        let datamodel = lift.read_schema()?;
        let unchanged = match (&state.last_source, &state.last) {
            (Some(source), _) => *source == datamodel,
            (None, Some(last)) => last.datamodel == datamodel,
            (None, None) => false,
        };
        if unchanged {
            return Ok(PassOutcome::Unchanged);
        }

        // Same path as save: lockstep checked, pending steps assumed.
        let id = MigrationId::watch(Utc::now());
        let draft = lift.draft_migration(id, &datamodel).await?;
        let Some(planned) = draft.migration else {
            debug!("schema source changed without schema steps");
            state.last_source = Some(datamodel);
            return Ok(PassOutcome::Unchanged);
        };

        // Live migrations are always forced.
        let outcome = lift
            .apply_controller(&SilentReporter)
            .apply(0, &planned.migration, &datamodel, true)
            .await?;
        let applied = LocalMigrationWithDatabaseSteps {
            migration: planned.migration,
            database_steps: outcome.database_steps,
        };

        let files = migration_file_map(&applied, state.last.as_ref())?;
        lift.dev_store().write(applied.id(), &files)?;

        if !self.generators.is_empty() {
            let reports = self.generators.run().await;
            let failed = reports.iter().filter(|r| !r.success()).count();
            debug!(generators = reports.len(), failed, "generators finished");
        }

        let id = applied.id().clone();
        state.last_source = Some(datamodel);
        state.last = Some(applied.migration);
        Ok(PassOutcome::Applied(id))
    }
}

impl<E> Lift<E>
where
    E: MigrationEngine + 'static,
{
    /// Start live mode.
    ///
    /// Pending permanent migrations are applied first. The returned handle
    /// owns the loop; call [`LiveHandle::stop`] to end it.
    pub async fn watch(self: Arc<Self>) -> LiftResult<LiveHandle> {
        let up = self
            .up(UpOptions {
                short: true,
                ..Default::default()
            })
            .await?;
        if !up.is_noop() {
            info!(count = up.migrations.len(), "applied pending migrations before watching");
        }

        let (_lock, local) = self.load_local()?;
        let dev = self.dev_store();
        let last = dev.load()?.pop().or_else(|| local.last().cloned());
        dev.ensure_exists()?;

        let session = Arc::new(WatchSession::new(self.clone(), last));
        let mut handle = LiveHandle::start(session);
        handle.watch_file(&self.schema_path(), self.config.watch.debounce())?;
        handle.trigger().fire();
        Ok(handle)
    }
}
