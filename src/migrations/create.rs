//! Save the schema source as a new permanent migration.

use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use super::Lift;
use crate::engine::{InferMigrationStepsInput, MigrationEngine};
use crate::error::LiftResult;
use crate::lockfile::LockFile;
use crate::migration::{DatamodelStep, LocalMigrationWithDatabaseSteps, Migration, MigrationId};
use crate::reconcile::reconcile;
use crate::store::migration_file_map;

/// A migration inferred against the reconciled history.
pub(super) struct Draft {
    pub lock: LockFile,
    pub local: Vec<Migration>,
    /// `None` when the schema source matches the history.
    pub migration: Option<LocalMigrationWithDatabaseSteps>,
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub name: Option<String>,
    /// Infer the migration but write nothing.
    pub preview: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The schema source matches the history.
    UpToDate,
    Preview(LocalMigrationWithDatabaseSteps),
    Saved { id: MigrationId, dir: PathBuf },
}

impl fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveOutcome::UpToDate => f.write_str("Everything up-to-date"),
            SaveOutcome::Preview(m) => write!(
                f,
                "Migration {} would contain {} datamodel step(s) and {} database step(s)",
                m.id(),
                m.migration.datamodel_steps.len(),
                m.database_steps.len()
            ),
            SaveOutcome::Saved { id, dir } => write!(
                f,
                "Created migration {} in {}. Run lift up to apply it.",
                id,
                dir.display()
            ),
        }
    }
}

impl<E> Lift<E>
where
    E: MigrationEngine,
{
    /// Infer steps for the schema source on top of the pending history and
    /// persist them as a new migration.
    pub async fn save(&self, options: SaveOptions) -> LiftResult<SaveOutcome> {
        let datamodel = self.read_schema()?;
        let id = MigrationId::new(Utc::now(), options.name.as_deref());
        let Draft {
            mut lock,
            local,
            migration,
        } = self.draft_migration(id, &datamodel).await?;

        let Some(migration) = migration else {
            return Ok(SaveOutcome::UpToDate);
        };
        if options.preview {
            return Ok(SaveOutcome::Preview(migration));
        }

        let files = migration_file_map(&migration, local.last())?;
        let dir = self.store().write(migration.id(), &files)?;
        lock.push(migration.id().clone());
        self.lock_store().save(&lock)?;
        self.dev_store().clear()?;

        info!(id = %migration.id(), dir = %dir.display(), "migration saved");
        Ok(SaveOutcome::Saved {
            id: migration.migration.id,
            dir,
        })
    }

    /// Reconcile the local history, then infer a migration `id` from the
    /// pending migrations' steps to `datamodel`.
    pub(super) async fn draft_migration(&self, id: MigrationId, datamodel: &str) -> LiftResult<Draft> {
        let (lock, local) = self.load_local()?;
        let remote = self.list_remote(datamodel).await?;
        let reconciliation = reconcile(&local, &remote, MigrationId::is_ephemeral)?;

        let assumed = reconciliation
            .pending
            .iter()
            .flat_map(|m| m.datamodel_steps.iter().cloned())
            .collect();
        let migration = self.infer_migration(id, datamodel, assumed).await?;
        Ok(Draft {
            lock,
            local,
            migration,
        })
    }

    /// Ask the planner for the steps from `assumed` to `datamodel`.
    /// `None` when there is nothing to migrate.
    async fn infer_migration(
        &self,
        id: MigrationId,
        datamodel: &str,
        assumed: Vec<DatamodelStep>,
    ) -> LiftResult<Option<LocalMigrationWithDatabaseSteps>> {
        let output = self
            .engine
            .infer_migration_steps(InferMigrationStepsInput {
                source_config: datamodel.to_string(),
                datamodel: datamodel.to_string(),
                migration_id: id.clone(),
                assume_to_be_applied: assumed,
            })
            .await?;

        debug!(
            id = %id,
            datamodel_steps = output.datamodel_steps.len(),
            database_steps = output.database_steps.len(),
            "inferred migration"
        );
        if output.datamodel_steps.is_empty() {
            return Ok(None);
        }

        Ok(Some(LocalMigrationWithDatabaseSteps {
            migration: Migration::new(id, datamodel, output.datamodel_steps),
            database_steps: output.database_steps,
        }))
    }
}
